//! Decode with EXIF orientation, then crop and resize to the panel.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, bail};
use fast_image_resize as fir;
use image::{DynamicImage, ImageReader, RgbImage, RgbaImage, imageops};
use tracing::debug;

/// Decode `path` and apply its EXIF orientation, if any.
pub fn load_oriented(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to sniff format of {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let orientation = read_orientation(path).unwrap_or(1);
    Ok(apply_orientation(img, orientation))
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    debug!(path = %path.display(), orientation, "exif orientation");
    Some(orientation)
}

/// Map EXIF orientation codes 1..=8 onto flips and rotations.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Region to keep so the crop matches the target aspect ratio.
///
/// Wider sources are cropped around the center; taller (or equal) sources
/// keep the band one third of the way down, where faces usually sit.
/// Returns `(x, y, width, height)`.
pub fn crop_region(width: u32, height: u32, target_w: u32, target_h: u32) -> (u32, u32, u32, u32) {
    let img_ratio = f64::from(width) / f64::from(height);
    let target_ratio = f64::from(target_w) / f64::from(target_h);
    if img_ratio > target_ratio {
        let new_w = ((f64::from(height) * target_ratio).round() as u32).clamp(1, width);
        ((width - new_w) / 2, 0, new_w, height)
    } else {
        let new_h = ((f64::from(width) / target_ratio).round() as u32).clamp(1, height);
        (0, (height - new_h) / 3, width, new_h)
    }
}

/// Flatten to opaque RGB, compositing any alpha onto white.
pub fn flatten_to_rgb(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = u32::from(a);
        let over_white = |c: u8| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([over_white(r), over_white(g), over_white(b)])
    })
}

/// Crop and resize `img` to exactly `target_w` x `target_h`.
pub fn normalize(img: &DynamicImage, target_w: u32, target_h: u32) -> Result<RgbImage> {
    if target_w == 0 || target_h == 0 {
        bail!("target dimensions must be positive");
    }
    if img.width() == 0 || img.height() == 0 {
        bail!("source image is empty");
    }
    let rgb = flatten_to_rgb(img);
    let (x, y, w, h) = crop_region(rgb.width(), rgb.height(), target_w, target_h);
    let cropped = imageops::crop_imm(&rgb, x, y, w, h).to_image();
    debug!(
        src_w = rgb.width(),
        src_h = rgb.height(),
        x,
        y,
        w,
        h,
        "geometry: crop"
    );
    resize_rgb(&cropped, target_w, target_h)
}

fn resize_rgb(source: &RgbImage, target_w: u32, target_h: u32) -> Result<RgbImage> {
    if source.dimensions() == (target_w, target_h) {
        return Ok(source.clone());
    }
    let rgba = DynamicImage::ImageRgb8(source.clone()).to_rgba8();
    let src_view = fir::images::ImageRef::new(
        rgba.width(),
        rgba.height(),
        rgba.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options =
        fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("resize failed")?;
    let resized = RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .context("failed to construct resized image")?;
    Ok(DynamicImage::ImageRgba8(resized).to_rgb8())
}
