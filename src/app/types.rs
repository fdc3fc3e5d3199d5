use std::str::FromStr;

use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tonemap {
    #[default]
    Srgb,
    Gamma,
    FalseColor,
    PositiveNegative,
}

impl Tonemap {
    pub const ALL: [Tonemap; 4] = [
        Self::Srgb,
        Self::Gamma,
        Self::FalseColor,
        Self::PositiveNegative,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Srgb => "sRGB",
            Self::Gamma => "Gamma",
            Self::FalseColor => "FC",
            Self::PositiveNegative => "+/-",
        }
    }

    pub fn shader_code(self) -> u32 {
        match self {
            Self::Srgb => 0,
            Self::Gamma => 1,
            Self::FalseColor => 2,
            Self::PositiveNegative => 3,
        }
    }
}

impl TryFrom<u32> for Tonemap {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.shader_code() == code)
            .ok_or_else(|| anyhow!("invalid tonemap code {code}"))
    }
}

impl FromStr for Tonemap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srgb" => Ok(Self::Srgb),
            "gamma" => Ok(Self::Gamma),
            "fc" | "falsecolor" | "false-color" => Ok(Self::FalseColor),
            "+/-" | "posneg" | "positivenegative" | "positive-negative" => {
                Ok(Self::PositiveNegative)
            }
            other => Err(anyhow!(
                "unknown tonemap '{other}' (supported: srgb, gamma, falsecolor, posneg)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Signed difference.
    #[default]
    Error,
    AbsoluteError,
    SquaredError,
    RelativeAbsoluteError,
    RelativeSquaredError,
    /// Squared error of the RGB triple relative to the squared reference mean.
    RelativeSquaredError2,
    LogAbsoluteError,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Self::Error,
        Self::AbsoluteError,
        Self::SquaredError,
        Self::RelativeAbsoluteError,
        Self::RelativeSquaredError,
        Self::RelativeSquaredError2,
        Self::LogAbsoluteError,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "E",
            Self::AbsoluteError => "AE",
            Self::SquaredError => "SE",
            Self::RelativeAbsoluteError => "RAE",
            Self::RelativeSquaredError => "RSE",
            Self::RelativeSquaredError2 => "RSE2",
            Self::LogAbsoluteError => "LAE",
        }
    }

    pub fn shader_code(self) -> u32 {
        match self {
            Self::Error => 0,
            Self::AbsoluteError => 1,
            Self::SquaredError => 2,
            Self::RelativeAbsoluteError => 3,
            Self::RelativeSquaredError => 4,
            Self::RelativeSquaredError2 => 5,
            Self::LogAbsoluteError => 6,
        }
    }
}

impl TryFrom<u32> for Metric {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.shader_code() == code)
            .ok_or_else(|| anyhow!("invalid metric code {code}"))
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.label().eq_ignore_ascii_case(wanted) || format!("{m:?}").eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow!("unknown metric '{wanted}' (supported: E, AE, SE, RAE, RSE, RSE2, LAE)"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistogramScale {
    Linear,
    #[default]
    Log,
}

impl HistogramScale {
    pub fn label(self) -> &'static str {
        match self {
            Self::Linear => "Linear",
            Self::Log => "Log",
        }
    }
}

impl FromStr for HistogramScale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "lin" => Ok(Self::Linear),
            "log" => Ok(Self::Log),
            other => Err(anyhow!("unknown histogram scale '{other}' (supported: linear, log)")),
        }
    }
}

/// Interpolation used when resizing exported buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResizeMode {
    #[default]
    Nearest,
    Bilinear,
}

/// Keyboard modifiers that change how scroll input maps to zoom.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScrollModifier {
    #[default]
    None,
    /// Ten times finer steps.
    Fine,
    /// Amount is a log2 scale delta instead of a step count.
    Logarithmic,
}

/// Step direction when cycling through images or channel groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Modifiers held while drawing or reading values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CanvasModifiers {
    /// Show the reference in place of the current image.
    pub compare: bool,
    /// Draw the current image alone, ignoring the reference.
    pub raw: bool,
    /// Pixel value labels show 8-bit sRGB codes instead of floats.
    pub alt: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonemapSettings {
    pub exposure: f32,
    pub offset: f32,
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            offset: 0.0,
            gamma: 2.2,
        }
    }
}
