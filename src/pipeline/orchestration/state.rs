use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AnnotationError, ClassificationError, ExtractionError};
use crate::pipeline::annotation::Annotation;
use crate::pipeline::classification::{Classification, Label};
use crate::pipeline::extraction::ImageRegion;
use crate::tracking::{AnchorId, TrackedAnchor};

/// Where one anchor is in its recognise-and-label lifecycle. An anchor that
/// is not in the orchestrator's map is untracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPhase {
    Detected,
    Extracting,
    Classifying,
    Annotated,
    Failed,
}

impl AnchorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorPhase::Detected => "Detected",
            AnchorPhase::Extracting => "Extracting",
            AnchorPhase::Classifying => "Classifying",
            AnchorPhase::Annotated => "Annotated",
            AnchorPhase::Failed => "Failed",
        }
    }

    pub fn can_advance_to(&self, next: AnchorPhase) -> bool {
        matches!(
            (self, next),
            (AnchorPhase::Detected, AnchorPhase::Extracting)
                | (AnchorPhase::Extracting, AnchorPhase::Classifying)
                | (AnchorPhase::Extracting, AnchorPhase::Failed)
                | (AnchorPhase::Classifying, AnchorPhase::Annotated)
                | (AnchorPhase::Classifying, AnchorPhase::Failed)
        )
    }
}

impl fmt::Display for AnchorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Extraction(ExtractionError),
    Classification(ClassificationError),
    Annotation(AnnotationError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Extraction(e) => write!(f, "extraction: {}", e),
            FailureReason::Classification(e) => write!(f, "classification: {}", e),
            FailureReason::Annotation(e) => write!(f, "annotation: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    Pending,
    Succeeded(Label),
    Failed(ClassificationError),
}

/// The single classification attempt made for one anchor lifecycle.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub anchor_id: AnchorId,
    pub region: Arc<ImageRegion>,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    dispatched: Instant,
}

impl ClassificationRequest {
    pub fn pending(anchor_id: AnchorId, region: Arc<ImageRegion>) -> Self {
        Self {
            anchor_id,
            region,
            state: RequestState::Pending,
            created_at: Utc::now(),
            dispatched: Instant::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }

    pub fn elapsed(&self) -> Duration {
        self.dispatched.elapsed()
    }
}

/// Delivered back to the presentation loop once per dispatched request.
#[derive(Debug)]
pub struct ClassificationCompletion {
    pub anchor_id: AnchorId,
    pub generation: u64,
    pub outcome: Result<Classification, ClassificationError>,
}

#[derive(Debug, Clone, Default)]
pub struct AnchorTimings {
    pub extraction: Option<Duration>,
    pub classification: Option<Duration>,
}

/// Everything the orchestrator knows about one tracked anchor.
#[derive(Debug, Clone)]
pub struct AnchorEntry {
    pub anchor: TrackedAnchor,
    pub generation: u64,
    pub phase: AnchorPhase,
    pub request: Option<ClassificationRequest>,
    pub annotation: Option<Annotation>,
    pub failure: Option<FailureReason>,
    pub timings: AnchorTimings,
}

impl AnchorEntry {
    pub fn new(anchor: TrackedAnchor, generation: u64) -> Self {
        Self {
            anchor,
            generation,
            phase: AnchorPhase::Detected,
            request: None,
            annotation: None,
            failure: None,
            timings: AnchorTimings::default(),
        }
    }

    pub(crate) fn advance(&mut self, next: AnchorPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        tracing::debug!("Anchor {}: {} -> {}", self.anchor.id, self.phase, next);
        self.phase = next;
    }

    pub(crate) fn fail(&mut self, reason: FailureReason) {
        self.advance(AnchorPhase::Failed);
        self.failure = Some(reason);
    }

    pub fn label(&self) -> Option<&str> {
        self.annotation.as_ref().map(|a| a.text.as_str())
    }

    pub fn snapshot(&self) -> AnchorSnapshot {
        AnchorSnapshot {
            anchor_id: self.anchor.id,
            reference: self.anchor.reference.name.clone(),
            detected_at: self.anchor.detected_at,
            phase: self.phase,
            label: self.label().map(str::to_string),
            failure: self.failure.as_ref().map(ToString::to_string),
            extraction_us: self.timings.extraction.map(|d| d.as_micros() as u64),
            classification_us: self.timings.classification.map(|d| d.as_micros() as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchorSnapshot {
    pub anchor_id: AnchorId,
    pub reference: String,
    pub detected_at: DateTime<Utc>,
    pub phase: AnchorPhase,
    pub label: Option<String>,
    pub failure: Option<String>,
    pub extraction_us: Option<u64>,
    pub classification_us: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_legal() {
        use AnchorPhase::*;
        assert!(Detected.can_advance_to(Extracting));
        assert!(Extracting.can_advance_to(Failed));
        assert!(Classifying.can_advance_to(Annotated));
        assert!(!Detected.can_advance_to(Classifying));
        assert!(!Annotated.can_advance_to(Classifying));
        assert!(!Failed.can_advance_to(Detected));
    }

    #[test]
    fn snapshot_carries_detection_time() {
        use crate::common::geometry::Pose;
        use crate::tracking::ReferenceImage;

        let anchor = TrackedAnchor::new(
            AnchorId::new(),
            ReferenceImage::new("card", 0.063, 0.088),
            Pose::identity(),
        );
        let mut entry = AnchorEntry::new(anchor.clone(), 1);
        entry.advance(AnchorPhase::Extracting);
        entry.fail(FailureReason::Extraction(ExtractionError::FrameUnavailable));

        let snapshot = entry.snapshot();
        assert_eq!(snapshot.detected_at, anchor.detected_at);
        assert_eq!(snapshot.reference, "card");
        assert_eq!(snapshot.phase, AnchorPhase::Failed);
    }
}
