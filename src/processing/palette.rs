//! Color adaptation for limited-gamut e-paper panels.

use image::imageops::{self, ColorMap};
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::color_mode::ColorMode;
use crate::display::DisplayKind;

/// Measured output of a six-color Spectra panel: black, white, red, yellow,
/// green, blue.
pub const SPECTRA_PALETTE: [[u8; 3]; 6] = [
    [0x00, 0x00, 0x00],
    [0xFF, 0xFF, 0xFF],
    [0xA0, 0x20, 0x20],
    [0xF0, 0xE0, 0x50],
    [0x60, 0x80, 0x50],
    [0x50, 0x80, 0xB8],
];

const SPECTRA_CONTRAST: f32 = 1.2;
const SPECTRA_COLOR: f32 = 1.3;
const WARMTH_BRIGHTNESS: f32 = 1.12;
const WARMTH_CHANNELS: [f32; 3] = [1.15, 0.92, 0.75];

/// Adapt `img` for the panel according to `mode`.
///
/// Modes that need a six-color panel fall back to the identity on other
/// hardware.
pub fn apply(mut img: RgbImage, mode: ColorMode, kind: DisplayKind) -> RgbImage {
    match mode {
        ColorMode::Pimoroni => img,
        _ if !kind.is_six_color() => {
            debug!(%mode, "palette: mode needs a six-color panel; passing through");
            img
        }
        ColorMode::SpectraPalette => {
            enhance_contrast(&mut img, SPECTRA_CONTRAST);
            enhance_color(&mut img, SPECTRA_COLOR);
            dither_to_palette(&img, &SPECTRA_PALETTE)
        }
        ColorMode::WarmthBoost => {
            enhance_brightness(&mut img, WARMTH_BRIGHTNESS);
            scale_channels(&mut img, WARMTH_CHANNELS);
            img
        }
    }
}

/// ITU-R 601 luma, truncated like an 8-bit grayscale conversion.
fn luma(px: [u8; 3]) -> u8 {
    let [r, g, b] = px.map(u32::from);
    ((r * 299 + g * 587 + b * 114) / 1000) as u8
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Move `value` away from `base` by `factor` (1.0 leaves it unchanged).
fn extrapolate(base: f32, value: u8, factor: f32) -> u8 {
    to_u8(base + factor * (f32::from(value) - base))
}

/// Push every channel away from the rounded mean luma of the whole image.
pub fn enhance_contrast(img: &mut RgbImage, factor: f32) {
    let count = u64::from(img.width()) * u64::from(img.height());
    if count == 0 {
        return;
    }
    let sum: u64 = img.pixels().map(|p| u64::from(luma(p.0))).sum();
    let mean = ((sum as f64 / count as f64) + 0.5).floor() as f32;
    for px in img.pixels_mut() {
        px.0 = px.0.map(|c| extrapolate(mean, c, factor));
    }
}

/// Push every channel away from the pixel's own luma.
pub fn enhance_color(img: &mut RgbImage, factor: f32) {
    for px in img.pixels_mut() {
        let gray = f32::from(luma(px.0));
        px.0 = px.0.map(|c| extrapolate(gray, c, factor));
    }
}

pub fn enhance_brightness(img: &mut RgbImage, factor: f32) {
    for px in img.pixels_mut() {
        px.0 = px.0.map(|c| to_u8(f32::from(c) * factor));
    }
}

/// Multiply each channel by its own factor.
pub fn scale_channels(img: &mut RgbImage, factors: [f32; 3]) {
    for px in img.pixels_mut() {
        for (c, f) in px.0.iter_mut().zip(factors) {
            *c = to_u8(f32::from(*c) * f);
        }
    }
}

/// Index of the entry closest to `px` in RGB space. `palette` must not be empty.
fn nearest(palette: &[[u8; 3]], px: [u8; 3]) -> usize {
    let dist = |entry: &[u8; 3]| -> u32 {
        entry
            .iter()
            .zip(px)
            .map(|(e, v)| u32::from(e.abs_diff(v)).pow(2))
            .sum()
    };
    palette
        .iter()
        .enumerate()
        .min_by_key(|(_, entry)| dist(entry))
        .map_or(0, |(i, _)| i)
}

/// A fixed panel palette usable with [`imageops::dither`].
struct PaletteMap<'a>(&'a [[u8; 3]]);

impl ColorMap for PaletteMap<'_> {
    type Color = Rgb<u8>;

    fn index_of(&self, color: &Rgb<u8>) -> usize {
        nearest(self.0, color.0)
    }

    fn lookup(&self, index: usize) -> Option<Rgb<u8>> {
        self.0.get(index).copied().map(Rgb)
    }

    fn has_lookup(&self) -> bool {
        true
    }

    fn map_color(&self, color: &mut Rgb<u8>) {
        color.0 = self.0[self.index_of(color)];
    }
}

/// Quantize to `palette` with Floyd–Steinberg error diffusion.
///
/// Every output pixel is a palette entry. An empty palette returns the
/// input unchanged.
pub fn dither_to_palette(img: &RgbImage, palette: &[[u8; 3]]) -> RgbImage {
    let mut out = img.clone();
    if !palette.is_empty() {
        imageops::dither(&mut out, &PaletteMap(palette));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_matches_integer_conversion() {
        assert_eq!(luma([255, 255, 255]), 255);
        assert_eq!(luma([255, 0, 0]), 76);
        assert_eq!(luma([0, 0, 0]), 0);
    }

    #[test]
    fn nearest_picks_closest_entry() {
        assert_eq!(nearest(&SPECTRA_PALETTE, [250, 10, 10]), 2);
        assert_eq!(nearest(&SPECTRA_PALETTE, [250, 250, 250]), 1);
        assert_eq!(nearest(&SPECTRA_PALETTE, [0, 0, 0]), 0);
    }

    #[test]
    fn dithered_gradient_stays_on_the_palette() {
        let img = RgbImage::from_fn(24, 16, |x, y| Rgb([(x * 10) as u8, (y * 15) as u8, 128]));
        let out = dither_to_palette(&img, &SPECTRA_PALETTE);
        assert_eq!(out.dimensions(), img.dimensions());
        assert!(out.pixels().all(|p| SPECTRA_PALETTE.contains(&p.0)));
        // A mid-gray field needs both black and white to be approximated.
        let gray = dither_to_palette(&RgbImage::from_pixel(8, 8, Rgb([128; 3])), &[[0; 3], [255; 3]]);
        assert!(gray.pixels().any(|p| p.0 == [0; 3]));
        assert!(gray.pixels().any(|p| p.0 == [255; 3]));
    }

    #[test]
    fn empty_palette_is_identity() {
        let img = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));
        assert_eq!(dither_to_palette(&img, &[]), img);
    }

    #[test]
    fn brightness_clamps_at_white() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([240, 100, 0]));
        enhance_brightness(&mut img, 1.12);
        assert_eq!(img.get_pixel(0, 0).0, [255, 112, 0]);
    }

    #[test]
    fn color_enhancement_leaves_grays_alone() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([90, 90, 90]));
        enhance_color(&mut img, 1.3);
        assert!(img.pixels().all(|p| p.0 == [90, 90, 90]));
    }
}
