use std::time::Duration;

use thiserror::Error;

use crate::tracking::AnchorId;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Tracking Error: {0}")]
    Tracking(#[from] TrackingError),
    #[error("Failed to load classifier model: {0}")]
    Model(String),
    #[error("Session Error: {0}")]
    Session(String),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse replay script: {0}")]
    Script(#[from] serde_json::Error),
}

// Tracking subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error("Unknown reference image '{0}'")]
    UnknownReference(String),
    #[error("Unknown anchor '{0}'")]
    UnknownAnchor(String),
    #[error("Failed to load frame {path}: {reason}")]
    FrameLoad { path: String, reason: String },
    #[error("Tracking session is not configured with any reference images")]
    NoReferenceImages,
}

// Region extraction errors, terminal for the anchor's lifecycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("No camera frame available")]
    FrameUnavailable,
    #[error("Projected region ({x:.1}, {y:.1}) lies outside the {width}x{height} frame")]
    OutOfBounds {
        x: f64,
        y: f64,
        width: u32,
        height: u32,
    },
    #[error("Reference image lies behind the camera")]
    BehindCamera,
    #[error("Degenerate region: {0}")]
    Degenerate(#[from] HomographyError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("Classifier model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnnotationError {
    #[error("No scene node for anchor {0}")]
    TargetMissing(AnchorId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("Singular system while solving homography")]
    Singular,
    #[error("Point projects to infinity")]
    PointAtInfinity,
}
