//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that captured frames contain
//! expected test patterns. Useful for integration testing with virtual cameras.

use thiserror::Error;

use crate::traits::{Format, Frame};

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values resulting from converting the YUV values
/// used by the mock device's color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Minimum luminance rise across a frame for it to count as a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// Why a frame or frame sequence failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The frame is too small for the sampled position.
    #[error("no pixel at ({x}, {y})")]
    Pixel {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// A color bar did not have the expected color.
    #[error("color bar {bar} at ({x}, {y}): expected RGB{expected:?}, got RGB{actual:?}")]
    ColorBar {
        /// Bar number, left to right.
        bar: usize,
        /// Sampled column.
        x: u32,
        /// Sampled row.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Color found.
        actual: (u8, u8, u8),
    },

    /// Luminance fell while moving right.
    #[error("gradient not increasing at x={x}: luminance {luminance} < previous {previous}")]
    GradientDecreasing {
        /// Sampled column.
        x: u32,
        /// Luminance at `x`.
        luminance: f32,
        /// Luminance at the previous sample.
        previous: f32,
    },

    /// Luminance barely changed across the frame.
    #[error("insufficient luminance change for gradient: {change} (expected at least 50)")]
    FlatGradient {
        /// Rise from left to right edge.
        change: f32,
    },

    /// No frames to check.
    #[error("cannot validate an empty frame sequence")]
    EmptySequence,

    /// A frame's sequence number did not increase.
    #[error("frame {position}: sequence {current} does not follow {previous}")]
    SequenceNotIncreasing {
        /// Position in the slice.
        position: usize,
        /// Sequence of the previous frame.
        previous: u32,
        /// Sequence of this frame.
        current: u32,
    },
}

/// Validates that a YUYV frame contains the SMPTE color bar pattern.
///
/// Checks the center of each of the 8 vertical stripes against the expected
/// color, with a tolerance for YUV-to-RGB conversion inaccuracies.
///
/// # Errors
///
/// Returns the first stripe that is out of bounds or the wrong color.
pub fn validate_color_bars(frame: &Frame, format: &Format) -> Result<(), ValidationError> {
    let width = format.width;
    let bar_width = width / 8;
    let center_y = format.height / 2;

    for ((bar, expected), x) in SMPTE_COLOR_BARS
        .iter()
        .enumerate()
        .zip((bar_width / 2..).step_by(bar_width.max(1) as usize))
    {
        let actual = frame
            .pixel_at(x, center_y, width)
            .ok_or(ValidationError::Pixel { x, y: center_y })?;

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(ValidationError::ColorBar {
                bar,
                x,
                y: center_y,
                expected: *expected,
                actual,
            });
        }
    }

    Ok(())
}

/// Validates that a YUYV frame contains a horizontal gradient.
///
/// Samples the center row every 10 pixels: luminance must never drop by more
/// than rounding noise and must rise noticeably from left to right.
///
/// # Errors
///
/// Returns where the gradient broke, or how flat it was.
pub fn validate_gradient(frame: &Frame, format: &Format) -> Result<(), ValidationError> {
    let width = format.width;
    let center_y = format.height / 2;

    let mut first: Option<f32> = None;
    let mut previous: Option<f32> = None;

    for x in (0..width).step_by(10) {
        let (r, g, b) = frame
            .pixel_at(x, center_y, width)
            .ok_or(ValidationError::Pixel { x, y: center_y })?;

        // Rec. 601 luma
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(previous) = previous {
            if luminance < previous - 1.0 {
                return Err(ValidationError::GradientDecreasing {
                    x,
                    luminance,
                    previous,
                });
            }
        }
        first.get_or_insert(luminance);
        previous = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, previous) {
        let change = last - first;
        if change < MIN_GRADIENT_RISE {
            return Err(ValidationError::FlatGradient { change });
        }
    }

    Ok(())
}

/// Validates that frame sequence numbers strictly increase.
///
/// Gaps are allowed: the handoff keeps only the newest frame, so a slow
/// consumer legitimately skips sequence numbers.
///
/// # Errors
///
/// Fails on an empty slice or a sequence number that repeats or goes back.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<(), ValidationError> {
    if frames.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (position, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let previous = prev.metadata.sequence;
            let current = curr.metadata.sequence;
            if current <= previous {
                return Err(ValidationError::SequenceNotIncreasing {
                    position: position + 1,
                    previous,
                    current,
                });
            }
        }
    }

    Ok(())
}

/// Check if two RGB colors match within `tolerance` per channel.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
