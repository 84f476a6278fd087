//! The display sink contract and the PNG preview sink.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use image::{ImageFormat, RgbImage};
use tracing::{debug, info, warn};

use crate::error::SinkError;

/// A panel (or stand-in) that accepts finished frames.
///
/// Implementations classify their failures through [`SinkError`] so callers
/// can decide whether a write is worth repeating.
pub trait DisplaySink: Send + Sync {
    /// Native panel resolution as `(width, height)`.
    fn resolution(&self) -> (u32, u32);

    /// Driver identifier, used to infer the panel gamut.
    fn descriptor(&self) -> &str;

    /// Stage a frame. `saturation` is advisory and may be ignored.
    fn set_image(&self, frame: &RgbImage, saturation: Option<f32>) -> Result<(), SinkError>;

    /// Push the staged frame to the panel.
    fn present(&self) -> Result<(), SinkError>;

    /// Release the underlying device. Called once on shutdown.
    fn release(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Panel gamut, which decides the usable palette modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    SixColor,
    SevenColor,
}

impl DisplayKind {
    pub fn detect(descriptor: &str, resolution: (u32, u32)) -> Self {
        let lower = descriptor.to_ascii_lowercase();
        if lower.contains("e673") || lower.contains("spectra") {
            return Self::SixColor;
        }
        match resolution {
            (1600, 1200) => Self::SixColor,
            (800, 480) => Self::SevenColor,
            (w, h) => {
                warn!(descriptor, width = w, height = h, "unknown display, assuming seven-color");
                Self::SevenColor
            }
        }
    }

    pub fn is_six_color(self) -> bool {
        matches!(self, Self::SixColor)
    }
}

/// Writes every presented frame to a PNG file.
///
/// Stands in for the panel on development hosts and feeds the `--render`
/// preview.
pub struct PngSink {
    output: PathBuf,
    width: u32,
    height: u32,
    descriptor: String,
    staged: Mutex<Option<RgbImage>>,
}

impl PngSink {
    pub fn new(
        output: impl Into<PathBuf>,
        (width, height): (u32, u32),
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            output: output.into(),
            width,
            height,
            descriptor: descriptor.into(),
            staged: Mutex::new(None),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// A poisoned lock never recovers, so it is not worth a retry.
    fn lock_staged(&self) -> Result<MutexGuard<'_, Option<RgbImage>>, SinkError> {
        self.staged
            .lock()
            .map_err(|_| SinkError::Rejected("staged frame lock poisoned".into()))
    }

    fn write_png(&self, frame: &RgbImage) -> Result<(), SinkError> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.output.with_extension("png.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            frame
                .write_to(&mut writer, ImageFormat::Png)
                .map_err(|err| SinkError::Rejected(err.to_string()))?;
            writer
                .into_inner()
                .map_err(|err| SinkError::Io(err.into_error()))?
                .sync_all()?;
        }
        fs::rename(&tmp, &self.output)?;
        Ok(())
    }
}

impl DisplaySink for PngSink {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn set_image(&self, frame: &RgbImage, saturation: Option<f32>) -> Result<(), SinkError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(SinkError::Rejected(format!(
                "frame is {}x{}, panel is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        debug!(?saturation, "png sink: frame staged");
        let mut staged = self.lock_staged()?;
        *staged = Some(frame.clone());
        Ok(())
    }

    fn present(&self) -> Result<(), SinkError> {
        let staged = self.lock_staged()?;
        let Some(frame) = staged.as_ref() else {
            return Err(SinkError::Rejected("no frame staged".into()));
        };
        self.write_png(frame)?;
        info!(output = %self.output.display(), "png sink: frame presented");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn descriptor_wins_over_resolution() {
        assert_eq!(
            DisplayKind::detect("inky_e673", (800, 480)),
            DisplayKind::SixColor
        );
        assert_eq!(
            DisplayKind::detect("Spectra 13.3", (1, 1)),
            DisplayKind::SixColor
        );
    }

    #[test]
    fn resolution_fallback() {
        assert_eq!(DisplayKind::detect("", (1600, 1200)), DisplayKind::SixColor);
        assert_eq!(DisplayKind::detect("", (800, 480)), DisplayKind::SevenColor);
        assert_eq!(DisplayKind::detect("", (640, 400)), DisplayKind::SevenColor);
    }

    #[test]
    fn png_sink_rejects_wrong_geometry() {
        let dir = tempdir().unwrap();
        let sink = PngSink::new(dir.path().join("out.png"), (4, 2), "inky_e673");
        let err = sink
            .set_image(&RgbImage::new(2, 4), None)
            .expect_err("size mismatch");
        assert!(!err.is_transient());
    }

    #[test]
    fn png_sink_writes_presented_frame() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("frame").join("out.png");
        let sink = PngSink::new(&out, (4, 2), "inky_e673");
        assert!(sink.present().is_err());
        sink.set_image(&RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30])), Some(0.5))
            .unwrap();
        sink.present().unwrap();
        let back = image::open(&out).unwrap().to_rgb8();
        assert_eq!(back.dimensions(), (4, 2));
        assert_eq!(back.get_pixel(3, 1).0, [10, 20, 30]);
    }

    #[test]
    fn poisoned_frame_lock_is_not_retried() {
        let dir = tempdir().unwrap();
        let sink = PngSink::new(dir.path().join("out.png"), (4, 2), "inky_e673");
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = sink.staged.lock().unwrap();
            panic!("render thread died");
        }));
        assert!(sink.staged.is_poisoned());

        let err = sink.present().expect_err("poisoned lock");
        assert!(matches!(err, SinkError::Rejected(_)));
        assert!(!err.is_transient());
        let err = sink
            .set_image(&RgbImage::new(4, 2), None)
            .expect_err("poisoned lock");
        assert!(!err.is_transient());
    }
}
