use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::Level;

use crate::error::AppError;
use crate::tracking::{ReferenceImage, TrackingConfiguration};

const ENV_PREFIX: &str = "CARDLENS";
// Extraction runs on the presentation loop; larger crops stall it.
const MAX_REGION_LONG_SIDE: u32 = 4096;

/// Top-level settings for one AR session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tracking: TrackingSettings,
    pub pipeline: PipelineSettings,
    pub classifier: ClassifierSettings,
    pub replay: ReplaySettings,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracking: TrackingSettings::default(),
            pipeline: PipelineSettings::default(),
            classifier: ClassifierSettings::default(),
            replay: ReplaySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub reference_images: Vec<ReferenceImage>,
    pub max_tracked_images: usize,
    pub light_estimation: bool,
    pub auto_focus: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            reference_images: Vec::new(),
            max_tracked_images: 1,
            light_estimation: true,
            auto_focus: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Long side of the rectified region handed to the classifier, in pixels.
    pub region_long_side: u32,
    /// Upper bound on a single classification. Zero disables the timeout.
    pub classifier_timeout_ms: u64,
    pub classifier_concurrency: usize,
    /// Distance between the card's near edge and its label, in metres.
    pub label_gap: f32,
    pub label_scale: f32,
    pub event_buffer_size: usize,
    pub command_buffer_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            region_long_side: 224,
            classifier_timeout_ms: 2000,
            classifier_concurrency: 4,
            label_gap: 0.012,
            label_scale: 0.00075,
            event_buffer_size: 64,
            command_buffer_size: 16,
        }
    }
}

impl PipelineSettings {
    pub fn classifier_timeout(&self) -> Option<Duration> {
        (self.classifier_timeout_ms > 0).then(|| Duration::from_millis(self.classifier_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub template_dir: Option<PathBuf>,
    pub min_confidence: f32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            template_dir: None,
            min_confidence: 0.75,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    pub script: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from an optional TOML file, then applies `CARDLENS__*`
    /// environment overrides (e.g. `CARDLENS__PIPELINE__LABEL_GAP=0.02`).
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn tracking_configuration(&self) -> TrackingConfiguration {
        TrackingConfiguration {
            reference_images: self.tracking.reference_images.clone(),
            max_tracked_images: self.tracking.max_tracked_images,
            light_estimation: self.tracking.light_estimation,
            auto_focus: self.tracking.auto_focus,
        }
    }

    pub fn max_log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str| Err(AppError::InvalidConfiguration(msg.to_string()));

        if self.tracking.max_tracked_images == 0 {
            return invalid("Max tracked images must be greater than 0");
        }
        for reference in &self.tracking.reference_images {
            let positive = |v: f64| v.is_finite() && v > 0.0;
            if !positive(reference.physical_width) || !positive(reference.physical_height) {
                return Err(AppError::InvalidConfiguration(format!(
                    "Reference image '{}' must have a positive physical size",
                    reference.name
                )));
            }
        }
        if self.pipeline.region_long_side == 0 {
            return invalid("Region long side must be greater than 0");
        }
        if self.pipeline.region_long_side > MAX_REGION_LONG_SIDE {
            return Err(AppError::InvalidConfiguration(format!(
                "Region long side must be at most {}",
                MAX_REGION_LONG_SIDE
            )));
        }
        if self.pipeline.classifier_concurrency == 0 {
            return invalid("Classifier concurrency must be greater than 0");
        }
        if self.pipeline.event_buffer_size == 0 || self.pipeline.command_buffer_size == 0 {
            return invalid("Channel buffer sizes must be greater than 0");
        }
        let label_scale = self.pipeline.label_scale;
        if !(label_scale.is_finite() && label_scale > 0.0) {
            return invalid("Label scale must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return invalid("Minimum confidence must be between 0.0 and 1.0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tracking.max_tracked_images, 1);
        assert_eq!(
            settings.pipeline.classifier_timeout(),
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn zero_timeout_disables_timeout() {
        let mut settings = Settings::default();
        settings.pipeline.classifier_timeout_ms = 0;
        assert_eq!(settings.pipeline.classifier_timeout(), None);
    }

    #[test]
    fn rejects_non_positive_reference_size() {
        let mut settings = Settings::default();
        settings.tracking.reference_images.push(ReferenceImage::new("island", 0.063, 0.0));
        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_nan_reference_size() {
        let mut settings = Settings::default();
        settings
            .tracking
            .reference_images
            .push(ReferenceImage::new("island", f64::NAN, 0.088));
        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn caps_region_long_side() {
        let mut settings = Settings::default();
        settings.pipeline.region_long_side = MAX_REGION_LONG_SIDE;
        assert!(settings.validate().is_ok());
        settings.pipeline.region_long_side = 20_000;
        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut settings = Settings::default();
        settings.classifier.min_confidence = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn loads_settings_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[tracking]
max_tracked_images = 2

[[tracking.reference_images]]
name = "island"
physical_width = 0.063
physical_height = 0.088

[pipeline]
label_gap = 0.02
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.tracking.max_tracked_images, 2);
        assert_eq!(settings.tracking.reference_images.len(), 1);
        assert_eq!(settings.tracking.reference_images[0].name, "island");
        assert_eq!(settings.pipeline.label_gap, 0.02);
        assert_eq!(settings.pipeline.region_long_side, 224);
        assert_eq!(settings.max_log_level(), Level::DEBUG);
    }
}
