use std::fmt;

use serde::{Deserialize, Serialize};

/// Baseline saturation hint handed to the panel driver.
pub const BASELINE_SATURATION: f32 = 0.5;
/// Saturation hint used while the warmth boost is active.
pub const WARMTH_SATURATION: f32 = 0.3;

/// How photos are adapted to the panel's palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Vendor defaults: no processing before the driver.
    Pimoroni,
    /// Quantize to the measured six-color palette with error diffusion.
    SpectraPalette,
    /// Brighten and shift toward warm tones.
    WarmthBoost,
}

impl ColorMode {
    /// Button cycling order.
    pub const ALL: [Self; 3] = [Self::Pimoroni, Self::SpectraPalette, Self::WarmthBoost];

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// Advisory saturation for the display sink.
    pub fn saturation(self) -> f32 {
        match self {
            Self::WarmthBoost => WARMTH_SATURATION,
            Self::Pimoroni | Self::SpectraPalette => BASELINE_SATURATION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pimoroni => "pimoroni",
            Self::SpectraPalette => "spectra_palette",
            Self::WarmthBoost => "warmth_boost",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
