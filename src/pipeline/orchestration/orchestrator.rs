use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::common::frame::CameraFrame;
use crate::error::AnnotationError;
use crate::pipeline::annotation::AnnotationPresenter;
use crate::pipeline::classification::ClassifierHandle;
use crate::pipeline::extraction::{ImageRegion, RegionExtractor};
use crate::pipeline::orchestration::state::{
    AnchorEntry, AnchorPhase, AnchorSnapshot, ClassificationCompletion, ClassificationRequest,
    FailureReason, RequestState,
};
use crate::tracking::{AnchorId, TrackedAnchor, TrackingEvent};

/// Drives every detected anchor through extract → classify → annotate.
///
/// Lives on the presentation loop: tracking events and classification
/// completions must both be fed in from there, so the anchor map and the
/// scene are only ever touched by one task. Classification itself runs on
/// spawned tasks and reports back through the completion channel returned
/// by [`PipelineOrchestrator::new`].
pub struct PipelineOrchestrator {
    extractor: Box<dyn RegionExtractor>,
    classifier: ClassifierHandle,
    presenter: AnnotationPresenter,
    anchors: IndexMap<AnchorId, AnchorEntry>,
    current_frame: Option<CameraFrame>,
    completion_tx: mpsc::UnboundedSender<ClassificationCompletion>,
    next_generation: u64,
}

impl PipelineOrchestrator {
    pub fn new(
        extractor: Box<dyn RegionExtractor>,
        classifier: ClassifierHandle,
        presenter: AnnotationPresenter,
    ) -> (Self, mpsc::UnboundedReceiver<ClassificationCompletion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        (
            Self {
                extractor,
                classifier,
                presenter,
                anchors: IndexMap::new(),
                current_frame: None,
                completion_tx,
                next_generation: 0,
            },
            completion_rx,
        )
    }

    #[instrument(skip_all, fields(event = event.kind()))]
    pub fn handle_event(&mut self, event: TrackingEvent) {
        match event {
            TrackingEvent::FrameUpdated(frame) => self.current_frame = Some(frame),
            TrackingEvent::AnchorAdded(anchor) => self.on_anchor_added(anchor),
            TrackingEvent::AnchorUpdated(anchor) => self.on_anchor_updated(anchor),
            TrackingEvent::AnchorRemoved(anchor_id) => self.on_anchor_removed(anchor_id),
        }
    }

    fn on_anchor_added(&mut self, anchor: TrackedAnchor) {
        if let Some(entry) = self.anchors.get(&anchor.id) {
            debug!(
                "Ignoring repeated detection of anchor {} ({})",
                anchor.id, entry.phase
            );
            return;
        }

        self.next_generation += 1;
        let mut entry = AnchorEntry::new(anchor, self.next_generation);
        let anchor_id = entry.anchor.id;
        debug!(
            "Detected anchor {} for reference '{}'",
            anchor_id, entry.anchor.reference.name
        );
        self.presenter.present_anchor(&entry.anchor);

        entry.advance(AnchorPhase::Extracting);
        let start = Instant::now();
        let extracted = self
            .extractor
            .extract(self.current_frame.as_ref(), &entry.anchor);
        entry.timings.extraction = Some(start.elapsed());

        match extracted {
            Ok(region) => {
                let region = Arc::new(region);
                entry.request = Some(ClassificationRequest::pending(anchor_id, region.clone()));
                entry.advance(AnchorPhase::Classifying);
                self.dispatch(anchor_id, entry.generation, region);
            }
            Err(e) => {
                warn!("Region extraction failed for anchor {}: {}", anchor_id, e);
                entry.fail(FailureReason::Extraction(e));
            }
        }

        self.anchors.insert(anchor_id, entry);
    }

    fn dispatch(&self, anchor_id: AnchorId, generation: u64, region: Arc<ImageRegion>) {
        let classifier = self.classifier.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = classifier.classify(region).await;
            let completion = ClassificationCompletion {
                anchor_id,
                generation,
                outcome,
            };
            if completion_tx.send(completion).is_err() {
                debug!("Session closed before anchor {} was classified", anchor_id);
            }
        });
    }

    fn on_anchor_updated(&mut self, anchor: TrackedAnchor) {
        match self.anchors.get_mut(&anchor.id) {
            Some(entry) => {
                self.presenter.move_anchor(&anchor);
                entry.anchor.pose = anchor.pose;
            }
            None => debug!("Update for untracked anchor {}", anchor.id),
        }
    }

    fn on_anchor_removed(&mut self, anchor_id: AnchorId) {
        if let Some(entry) = self.anchors.shift_remove(&anchor_id) {
            debug!("Anchor {} removed in phase {}", anchor_id, entry.phase);
        }
        self.presenter.remove_anchor(anchor_id);
    }

    /// Applies a classification result. Results from an earlier lifecycle
    /// of the anchor are dropped.
    pub fn complete(&mut self, completion: ClassificationCompletion) {
        let ClassificationCompletion {
            anchor_id,
            generation,
            outcome,
        } = completion;

        let entry = match self.anchors.get_mut(&anchor_id) {
            Some(entry)
                if entry.generation == generation && entry.phase == AnchorPhase::Classifying =>
            {
                entry
            }
            _ => {
                debug!("Discarding stale classification for anchor {}", anchor_id);
                return;
            }
        };

        entry.timings.classification = entry.request.as_ref().map(ClassificationRequest::elapsed);

        match outcome {
            Ok(classification) => {
                if let Some(request) = entry.request.as_mut() {
                    request.state = RequestState::Succeeded(classification.label.clone());
                }
                match self.presenter.annotate(anchor_id, &classification.label) {
                    Some(annotation) => {
                        entry.annotation = Some(annotation);
                        entry.advance(AnchorPhase::Annotated);
                    }
                    None => entry.fail(FailureReason::Annotation(AnnotationError::TargetMissing(
                        anchor_id,
                    ))),
                }
            }
            Err(e) => {
                warn!("Classification failed for anchor {}: {}", anchor_id, e);
                if let Some(request) = entry.request.as_mut() {
                    request.state = RequestState::Failed(e.clone());
                }
                entry.fail(FailureReason::Classification(e));
            }
        }
    }

    /// Forgets every anchor and clears the scene. In-flight results are
    /// discarded when they arrive.
    pub fn reset(&mut self) {
        info!("Resetting pipeline: dropping {} anchors", self.anchors.len());
        self.anchors.clear();
        self.presenter.clear();
        self.current_frame = None;
    }

    pub fn phase(&self, anchor_id: AnchorId) -> Option<AnchorPhase> {
        self.anchors.get(&anchor_id).map(|entry| entry.phase)
    }

    pub fn entry(&self, anchor_id: AnchorId) -> Option<&AnchorEntry> {
        self.anchors.get(&anchor_id)
    }

    pub fn pending_requests(&self) -> usize {
        self.anchors
            .values()
            .filter(|entry| entry.request.as_ref().is_some_and(ClassificationRequest::is_pending))
            .count()
    }

    pub fn presenter(&self) -> &AnnotationPresenter {
        &self.presenter
    }

    pub fn snapshot(&self) -> Vec<AnchorSnapshot> {
        self.anchors.values().map(AnchorEntry::snapshot).collect()
    }
}
