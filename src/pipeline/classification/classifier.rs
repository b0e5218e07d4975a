use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::error::ClassificationError;
use crate::pipeline::extraction::ImageRegion;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: Label,
    pub confidence: f32,
}

impl Classification {
    pub fn new(label: Label, confidence: f32) -> Self {
        Self { label, confidence }
    }
}

/// A single-label image classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, region: &ImageRegion) -> Result<Classification, ClassificationError>;
    fn name(&self) -> &'static str;
}
