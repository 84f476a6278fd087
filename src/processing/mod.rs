//! Image pipeline: decode, fit to the panel, adapt to its palette.

pub mod geometry;
pub mod palette;

use std::path::Path;

use anyhow::Result;
use image::RgbImage;

use crate::color_mode::ColorMode;
use crate::display::DisplayKind;

/// Produce the frame for `path` at `(width, height)` in `mode`.
///
/// Blocking; callers on the runtime go through `spawn_blocking`.
pub fn render_photo(
    path: &Path,
    (width, height): (u32, u32),
    mode: ColorMode,
    kind: DisplayKind,
) -> Result<RgbImage> {
    let decoded = geometry::load_oriented(path)?;
    let fitted = geometry::normalize(&decoded, width, height)?;
    Ok(palette::apply(fitted, mode, kind))
}
