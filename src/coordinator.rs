use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::error::AppError;
use crate::pipeline::annotation::{AnnotationPresenter, PresenterSettings};
use crate::pipeline::classification::{Classifier, ClassifierBuilder};
use crate::pipeline::extraction::{PlanarRegionExtractor, RegionExtractor};
use crate::pipeline::orchestration::{
    AnchorSnapshot, ClassificationCompletion, PipelineOrchestrator,
};
use crate::tracking::{
    ReferenceImage, RunOptions, TrackingConfiguration, TrackingEvent, TrackingSession,
};

pub enum SessionCommand {
    ResetTracking {
        responder: oneshot::Sender<Result<(), AppError>>,
    },
    Snapshot {
        responder: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub tracker: &'static str,
    pub tracking_active: bool,
    pub pending_requests: usize,
    pub anchors: Vec<AnchorSnapshot>,
}

impl SessionSnapshot {
    /// Nothing left to happen: the event stream has ended and no
    /// classification is outstanding.
    pub fn is_idle(&self) -> bool {
        !self.tracking_active && self.pending_requests == 0
    }
}

/// Cloneable control surface for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// Restarts tracking with reset options. Every anchor, annotation and
    /// in-flight classification of the previous run is forgotten.
    pub async fn reset_tracking(&self) -> Result<(), AppError> {
        let (responder, response_rx) = oneshot::channel();
        self.send(SessionCommand::ResetTracking { responder }).await?;
        response_rx.await.map_err(|_| session_gone())?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        let (responder, response_rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { responder }).await?;
        response_rx.await.map_err(|_| session_gone())
    }

    /// Polls until the session goes idle and returns the final snapshot.
    pub async fn wait_idle(&self, poll_interval: Duration) -> Result<SessionSnapshot, AppError> {
        loop {
            let snapshot = self.snapshot().await?;
            if snapshot.is_idle() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    async fn send(&self, command: SessionCommand) -> Result<(), AppError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| session_gone())
    }
}

fn session_gone() -> AppError {
    AppError::Session("presentation loop is not running".to_string())
}

/// The presentation loop. Owns the orchestrator (and through it the scene)
/// so every mutation happens on this one task.
struct PresentationLoop {
    orchestrator: PipelineOrchestrator,
    tracker: Box<dyn TrackingSession>,
    configuration: TrackingConfiguration,
    events: Option<mpsc::Receiver<TrackingEvent>>,
    completion_rx: mpsc::UnboundedReceiver<ClassificationCompletion>,
    command_rx: mpsc::Receiver<SessionCommand>,
    cancel_token: CancellationToken,
}

impl PresentationLoop {
    async fn run(mut self) {
        info!("Presentation loop started with {}", self.tracker.name());
        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                Some(command) = self.command_rx.recv() => self.handle_command(command),
                Some(completion) = self.completion_rx.recv() => {
                    self.orchestrator.complete(completion)
                }
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.orchestrator.handle_event(event),
                    None => {
                        info!("Tracking event stream ended");
                        self.events = None;
                    }
                },
            }
        }
        info!("Presentation loop stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ResetTracking { responder } => {
                let result = self.reset_tracking();
                if let Err(e) = &result {
                    error!("Failed to reset tracking: {}", e);
                }
                let _ = responder.send(result);
            }
            SessionCommand::Snapshot { responder } => {
                let _ = responder.send(self.snapshot());
            }
        }
    }

    fn reset_tracking(&mut self) -> Result<(), AppError> {
        self.orchestrator.reset();
        self.events = None;
        let events = self.tracker.run(&self.configuration, RunOptions::reset())?;
        self.events = Some(events);
        info!("Tracking restarted");
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tracker: self.tracker.name(),
            tracking_active: self.events.is_some(),
            pending_requests: self.orchestrator.pending_requests(),
            anchors: self.orchestrator.snapshot(),
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TrackingEvent>>) -> Option<TrackingEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub struct Coordinator {
    session_task: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    handle: SessionHandle,
}

impl Coordinator {
    pub fn builder(settings: Settings) -> CoordinatorBuilder {
        CoordinatorBuilder::new(settings)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Waits for the presentation loop to exit.
    pub async fn join(&mut self) -> Result<(), AppError> {
        if let Some(task) = self.session_task.take() {
            task.await.map_err(|e| AppError::Session(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CoordinatorBuilder {
    settings: Settings,
    tracker: Option<Box<dyn TrackingSession>>,
    classifier: Option<Arc<dyn Classifier>>,
    extractor: Option<Box<dyn RegionExtractor>>,
}

impl CoordinatorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            tracker: None,
            classifier: None,
            extractor: None,
        }
    }

    pub fn tracker(mut self, tracker: Box<dyn TrackingSession>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replaces the planar extractor built from the settings.
    pub fn extractor(mut self, extractor: Box<dyn RegionExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Adds a reference image on top of those in the settings.
    pub fn reference_image(mut self, reference: ReferenceImage) -> Self {
        self.settings.tracking.reference_images.push(reference);
        self
    }

    pub fn max_tracked_images(mut self, max_tracked_images: usize) -> Self {
        self.settings.tracking.max_tracked_images = max_tracked_images;
        self
    }

    pub fn classifier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.pipeline.classifier_timeout_ms =
            timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    pub fn region_long_side(mut self, region_long_side: u32) -> Self {
        self.settings.pipeline.region_long_side = region_long_side;
        self
    }

    pub fn label_gap(mut self, label_gap: f32) -> Self {
        self.settings.pipeline.label_gap = label_gap;
        self
    }

    /// Starts tracking and spawns the presentation loop. Must be called
    /// from within a tokio runtime.
    pub fn build(self) -> Result<Coordinator, AppError> {
        self.settings.validate()?;
        let mut tracker = self
            .tracker
            .ok_or(AppError::Session("Tracking session not set".to_string()))?;
        let classifier = self
            .classifier
            .ok_or(AppError::Model("Classifier not set".to_string()))?;

        let pipeline = &self.settings.pipeline;
        let extractor: Box<dyn RegionExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Box::new(PlanarRegionExtractor::new(pipeline.region_long_side)),
        };
        let classifier = ClassifierBuilder::new(classifier)
            .timeout(pipeline.classifier_timeout())
            .concurrency(pipeline.classifier_concurrency)
            .build();
        let presenter = AnnotationPresenter::new(PresenterSettings {
            label_gap: pipeline.label_gap,
            label_scale: pipeline.label_scale,
            ..PresenterSettings::default()
        });
        let (orchestrator, completion_rx) =
            PipelineOrchestrator::new(extractor, classifier, presenter);

        let configuration = self.settings.tracking_configuration();
        let events = tracker.run(&configuration, RunOptions::default())?;
        debug!(
            "Tracking {} reference images with {}",
            configuration.reference_images.len(),
            tracker.name()
        );

        let (command_tx, command_rx) = mpsc::channel(pipeline.command_buffer_size);
        let cancel_token = CancellationToken::new();
        let presentation = PresentationLoop {
            orchestrator,
            tracker,
            configuration,
            events: Some(events),
            completion_rx,
            command_rx,
            cancel_token: cancel_token.clone(),
        };
        let session_task = tokio::spawn(presentation.run());

        Ok(Coordinator {
            session_task: Some(session_task),
            cancel_token: cancel_token.clone(),
            handle: SessionHandle {
                command_tx,
                cancel_token,
            },
        })
    }
}
