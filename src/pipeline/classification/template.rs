use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use tracing::{debug, info};

use crate::error::{AppError, ClassificationError};
use crate::pipeline::classification::classifier::{Classification, Classifier, Label};
use crate::pipeline::extraction::ImageRegion;

const THUMBNAIL_SIDE: u32 = 16;
const TEMPLATE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

struct Template {
    label: Label,
    thumbnail: RgbImage,
}

/// Nearest-template classifier over downsampled reference images.
///
/// Each template and each query is shrunk to a 16x16 RGB thumbnail and
/// compared by mean absolute channel difference. The closest template wins
/// if its similarity reaches `min_confidence`.
#[derive(Clone)]
pub struct TemplateClassifier {
    templates: Arc<Vec<Template>>,
    min_confidence: f32,
}

impl TemplateClassifier {
    pub fn from_images(
        images: impl IntoIterator<Item = (Label, DynamicImage)>,
        min_confidence: f32,
    ) -> Self {
        let templates = images
            .into_iter()
            .map(|(label, image)| Template {
                label,
                thumbnail: thumbnail(&image.to_rgb8()),
            })
            .collect();
        Self {
            templates: Arc::new(templates),
            min_confidence,
        }
    }

    /// Loads every image in `dir`, labelled by file stem.
    pub fn from_dir(dir: &Path, min_confidence: f32) -> Result<Self, AppError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase)
                    .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext.as_str()))
            })
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let image = image::open(&path)
                .map_err(|e| AppError::Model(format!("{}: {}", path.display(), e)))?;
            debug!("Loaded template '{}' from {}", stem, path.display());
            images.push((Label::new(stem), image));
        }

        info!("Template classifier loaded {} templates", images.len());
        Ok(Self::from_images(images, min_confidence))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn best_match(&self, region: &RgbImage) -> Result<Classification, ClassificationError> {
        let query = thumbnail(region);
        let (template, score) = self
            .templates
            .iter()
            .map(|t| (t, similarity(&query, &t.thumbnail)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| {
                ClassificationError::ModelUnavailable("no templates loaded".to_string())
            })?;

        if score < self.min_confidence {
            return Err(ClassificationError::InferenceFailed(format!(
                "best match '{}' scored {:.2}, below {:.2}",
                template.label, score, self.min_confidence
            )));
        }
        Ok(Classification::new(template.label.clone(), score))
    }
}

#[async_trait]
impl Classifier for TemplateClassifier {
    async fn classify(&self, region: &ImageRegion) -> Result<Classification, ClassificationError> {
        if self.templates.is_empty() {
            return Err(ClassificationError::ModelUnavailable(
                "no templates loaded".to_string(),
            ));
        }
        let classifier = self.clone();
        let image = region.image.clone();
        tokio::task::spawn_blocking(move || classifier.best_match(&image))
            .await
            .map_err(|e| ClassificationError::InferenceFailed(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "TemplateClassifier"
    }
}

fn thumbnail(image: &RgbImage) -> RgbImage {
    imageops::resize(image, THUMBNAIL_SIDE, THUMBNAIL_SIDE, FilterType::Triangle)
}

fn similarity(a: &RgbImage, b: &RgbImage) -> f32 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    let samples = a.as_raw().len().max(1) as f32;
    1.0 - total as f32 / (samples * 255.0)
}
