//! Brightness model shared by the hardware path and the preview path.
//!
//! Every theme scales its base intensities through [`final_brightness`], and
//! the preview surface turns the same value into an alpha with
//! [`preview_alpha`]. Keeping a single formula means the preview always
//! matches what the LEDs show.

use crate::geometry::PixelFrame;

/// Maximum value of both pixel intensity and theme brightness.
pub const FULL: i32 = 255;

/// Scale a base pixel intensity by a theme brightness level.
///
/// `round(pixel * theme_brightness / 255)`, clamped to `[0, 255]`. Inputs
/// outside the range are clamped first.
pub fn final_brightness(pixel: i32, theme_brightness: i32) -> u8 {
    let pixel = pixel.clamp(0, FULL);
    let level = theme_brightness.clamp(0, FULL);
    // Integer rounding: (a * b + 127) / 255 == round(a * b / 255) for a, b in 0..=255
    (((pixel * level) + FULL / 2) / FULL).clamp(0, FULL) as u8
}

/// Alpha used by a preview renderer for one pixel, in `[0.0, 1.0]`.
pub fn preview_alpha(pixel: i32, theme_brightness: i32) -> f32 {
    final_brightness(pixel, theme_brightness) as f32 / FULL as f32
}

/// Apply [`final_brightness`] to every pixel of a frame.
pub fn apply_to_frame(frame: &PixelFrame, theme_brightness: i32) -> PixelFrame {
    if theme_brightness >= FULL {
        return frame.clone();
    }
    frame.map(|p| final_brightness(p as i32, theme_brightness))
}

/// Preview alphas for a whole frame at full theme brightness.
///
/// Frames leaving the engine already carry theme brightness, so the
/// preview only normalizes them.
pub fn preview_alphas(frame: &PixelFrame) -> Vec<f32> {
    frame
        .as_slice()
        .iter()
        .map(|&p| preview_alpha(p as i32, FULL))
        .collect()
}
