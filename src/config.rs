use std::fs;
use std::path::Path;

use fast_image_resize as fr;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub crop: CropConfig,
    pub prepare: PrepareConfig,
    pub cache: CacheConfig,
}

/// Tunable constants for the border-crop comparator. The defaults follow the
/// values that work well on typical scan backgrounds, but none of them is
/// load-bearing behavior.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CropConfig {
    /// Normalized 0..1 per-pixel color difference above which a pixel counts
    /// as content rather than border.
    pub color_threshold: f32,
    /// Fraction of the perpendicular extent that may be "content" pixels
    /// before an edge scan stops advancing.
    pub count_threshold: f32,
    /// Sample every Nth pixel along a scanned row/column.
    pub sample_stride: u32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            color_threshold: 0.10,
            count_threshold: 0.01,
            sample_stride: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrepareConfig {
    /// Resampling filter used for viewport downscaling.
    pub resize_filter: String,
    /// Pages kept resident behind the current page.
    pub retain_behind: usize,
    /// Pages kept resident ahead of the current page.
    pub retain_ahead: usize,
    /// Rasterization scale for paginated (PDF) archives.
    pub pdf_render_scale: f32,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            resize_filter: "catmull-rom".to_string(),
            retain_behind: 1,
            retain_ahead: 2,
            pdf_render_scale: 2.0,
        }
    }
}

impl PrepareConfig {
    pub fn filter_type(&self) -> AppResult<fr::FilterType> {
        filter_from_name(&self.resize_filter)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Name-keyed decode cache capacity for random-access archives.
    pub decode_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            decode_max_entries: 16,
        }
    }
}

impl Config {
    pub fn load_from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        if !path.is_file() {
            return Err(AppError::invalid_argument(format!(
                "config path is not a regular file: {}",
                path.display()
            )));
        }

        let raw = fs::read_to_string(path).map_err(|source| {
            AppError::io_with_context(source, format!("failed to read config: {}", path.display()))
        })?;
        let parsed = toml::from_str::<Self>(&raw).map_err(|source| {
            AppError::invalid_argument(format!(
                "failed to parse config {}: {source}",
                path.display()
            ))
        })?;

        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.crop.sample_stride == 0 {
            return Err(AppError::invalid_argument(
                "crop.sample_stride must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.crop.color_threshold) {
            return Err(AppError::invalid_argument(
                "crop.color_threshold must be within 0..1",
            ));
        }
        if !(0.0..=1.0).contains(&self.crop.count_threshold) {
            return Err(AppError::invalid_argument(
                "crop.count_threshold must be within 0..1",
            ));
        }
        if !self.prepare.pdf_render_scale.is_finite() || self.prepare.pdf_render_scale <= 0.0 {
            return Err(AppError::invalid_argument(
                "prepare.pdf_render_scale must be a positive finite value",
            ));
        }
        self.prepare.filter_type().map(|_| ())
    }
}

fn filter_from_name(name: &str) -> AppResult<fr::FilterType> {
    match name {
        "box" => Ok(fr::FilterType::Box),
        "bilinear" => Ok(fr::FilterType::Bilinear),
        "hamming" => Ok(fr::FilterType::Hamming),
        "catmull-rom" => Ok(fr::FilterType::CatmullRom),
        "mitchell" => Ok(fr::FilterType::Mitchell),
        "gaussian" => Ok(fr::FilterType::Gaussian),
        "lanczos3" => Ok(fr::FilterType::Lanczos3),
        other => Err(AppError::invalid_argument(format!(
            "unknown resize filter: {other}"
        ))),
    }
}
