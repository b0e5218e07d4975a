use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::frame::CameraFrame;
use crate::common::geometry::{Camera, CameraIntrinsics, Pose};
use crate::error::{AppError, TrackingError};
use crate::tracking::anchor::{AnchorId, ReferenceImage, TrackedAnchor};
use crate::tracking::event::TrackingEvent;
use crate::tracking::session::{RunOptions, TrackingConfiguration, TrackingSession};

/// A recorded tracking session: frames and anchor notifications in order.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    pub steps: Vec<ReplayStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayStep {
    #[serde(default)]
    pub delay_ms: u64,
    pub event: ScriptEvent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptEvent {
    Frame {
        image: PathBuf,
        camera: ScriptCamera,
    },
    AnchorAdded {
        anchor: String,
        reference: String,
        #[serde(default)]
        pose: ScriptPose,
    },
    AnchorUpdated {
        anchor: String,
        #[serde(default)]
        pose: ScriptPose,
    },
    AnchorRemoved {
        anchor: String,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScriptPose {
    #[serde(default)]
    pub position: [f64; 3],
    /// Roll, pitch, yaw in radians.
    #[serde(default)]
    pub rotation: [f64; 3],
}

impl From<ScriptPose> for Pose {
    fn from(pose: ScriptPose) -> Self {
        Pose::from_euler(pose.position, pose.rotation)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScriptCamera {
    #[serde(flatten)]
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub pose: ScriptPose,
}

impl ReplayScript {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks references and anchor names before anything is emitted.
    fn validate(&self, configuration: &TrackingConfiguration) -> Result<(), TrackingError> {
        if configuration.reference_images.is_empty() {
            return Err(TrackingError::NoReferenceImages);
        }
        let mut known = std::collections::HashSet::new();
        for step in &self.steps {
            match &step.event {
                ScriptEvent::Frame { .. } => {}
                ScriptEvent::AnchorAdded {
                    anchor, reference, ..
                } => {
                    if configuration.reference(reference).is_none() {
                        return Err(TrackingError::UnknownReference(reference.clone()));
                    }
                    known.insert(anchor.as_str());
                }
                ScriptEvent::AnchorUpdated { anchor, .. } => {
                    if !known.contains(anchor.as_str()) {
                        return Err(TrackingError::UnknownAnchor(anchor.clone()));
                    }
                }
                ScriptEvent::AnchorRemoved { anchor } => {
                    // A removed name is unknown again until the next anchor_added.
                    if !known.remove(anchor.as_str()) {
                        return Err(TrackingError::UnknownAnchor(anchor.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Tracking session that plays back a [`ReplayScript`]. Every run mints
/// fresh anchor identities, the way a real session does after a reset.
pub struct ReplayTracker {
    script: ReplayScript,
    base_dir: PathBuf,
    buffer_size: usize,
    task: Option<JoinHandle<()>>,
}

impl ReplayTracker {
    pub fn new(script: ReplayScript, base_dir: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            script,
            base_dir: base_dir.into(),
            buffer_size,
            task: None,
        }
    }

    /// Loads a script; frame paths inside it resolve relative to its directory.
    pub fn from_file(path: &Path, buffer_size: usize) -> Result<Self, AppError> {
        let script = ReplayScript::from_json(&std::fs::read_to_string(path)?)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::new(script, base_dir, buffer_size))
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl TrackingSession for ReplayTracker {
    fn run(
        &mut self,
        configuration: &TrackingConfiguration,
        options: RunOptions,
    ) -> Result<mpsc::Receiver<TrackingEvent>, TrackingError> {
        self.script.validate(configuration)?;
        self.stop();

        info!(
            "Starting replay session: {} steps, {} reference images, max tracked {}",
            self.script.steps.len(),
            configuration.reference_images.len(),
            configuration.max_tracked_images,
        );
        debug!(
            "Light estimation {}, auto focus {}, reset {}",
            configuration.light_estimation, configuration.auto_focus, options.reset_tracking,
        );

        let (event_tx, event_rx) = mpsc::channel(self.buffer_size);
        let player = ScriptPlayer::new(self.base_dir.clone(), configuration.clone(), event_tx);
        let steps = self.script.steps.clone();
        self.task = Some(tokio::spawn(player.play(steps)));
        Ok(event_rx)
    }

    fn name(&self) -> &'static str {
        "ReplayTracker"
    }
}

impl Drop for ReplayTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ScriptPlayer {
    base_dir: PathBuf,
    configuration: TrackingConfiguration,
    event_tx: mpsc::Sender<TrackingEvent>,
    tracked: HashMap<String, (AnchorId, ReferenceImage)>,
    ignored: std::collections::HashSet<String>,
}

impl ScriptPlayer {
    fn new(
        base_dir: PathBuf,
        configuration: TrackingConfiguration,
        event_tx: mpsc::Sender<TrackingEvent>,
    ) -> Self {
        Self {
            base_dir,
            configuration,
            event_tx,
            tracked: HashMap::new(),
            ignored: std::collections::HashSet::new(),
        }
    }

    /// Plays every step in order. A step that cannot be translated (an
    /// unreadable frame, say) is skipped and the rest of the script still runs.
    async fn play(mut self, steps: Vec<ReplayStep>) {
        for (index, step) in steps.into_iter().enumerate() {
            if step.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
            }
            let event = match self.translate(step.event).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping replay step {}: {}", index, e);
                    continue;
                }
            };
            debug!("Replaying {}", event.kind());
            if self.event_tx.send(event).await.is_err() {
                debug!("Replay receiver dropped, stopping");
                return;
            }
        }
        info!("Replay finished");
    }

    async fn translate(
        &mut self,
        event: ScriptEvent,
    ) -> Result<Option<TrackingEvent>, TrackingError> {
        let event = match event {
            ScriptEvent::Frame { image, camera } => {
                let path = self.base_dir.join(image);
                let frame = load_frame(path, camera).await?;
                Some(TrackingEvent::FrameUpdated(frame))
            }
            ScriptEvent::AnchorAdded {
                anchor,
                reference,
                pose,
            } => {
                if let Some((id, reference)) = self.tracked.get(&anchor) {
                    // Re-detection of an image that is already tracked.
                    Some(TrackingEvent::AnchorAdded(TrackedAnchor::new(
                        *id,
                        reference.clone(),
                        pose.into(),
                    )))
                } else if self.tracked.len() >= self.configuration.max_tracked_images {
                    warn!(
                        "Ignoring anchor '{}': already tracking {} images",
                        anchor,
                        self.tracked.len()
                    );
                    self.ignored.insert(anchor);
                    None
                } else {
                    let reference = self
                        .configuration
                        .reference(&reference)
                        .cloned()
                        .ok_or(TrackingError::UnknownReference(reference))?;
                    let id = AnchorId::new();
                    self.ignored.remove(&anchor);
                    self.tracked.insert(anchor, (id, reference.clone()));
                    Some(TrackingEvent::AnchorAdded(TrackedAnchor::new(
                        id,
                        reference,
                        pose.into(),
                    )))
                }
            }
            ScriptEvent::AnchorUpdated { anchor, pose } => match self.tracked.get(&anchor) {
                Some((id, reference)) => Some(TrackingEvent::AnchorUpdated(TrackedAnchor::new(
                    *id,
                    reference.clone(),
                    pose.into(),
                ))),
                None if self.ignored.contains(&anchor) => None,
                None => return Err(TrackingError::UnknownAnchor(anchor)),
            },
            ScriptEvent::AnchorRemoved { anchor } => match self.tracked.remove(&anchor) {
                Some((id, _)) => Some(TrackingEvent::AnchorRemoved(id)),
                None if self.ignored.remove(&anchor) => None,
                None => return Err(TrackingError::UnknownAnchor(anchor)),
            },
        };
        Ok(event)
    }
}

async fn load_frame(path: PathBuf, camera: ScriptCamera) -> Result<CameraFrame, TrackingError> {
    let display = path.display().to_string();
    let image = tokio::task::spawn_blocking(move || image::open(&path))
        .await
        .map_err(|e| TrackingError::FrameLoad {
            path: display.clone(),
            reason: e.to_string(),
        })?
        .map_err(|e| TrackingError::FrameLoad {
            path: display,
            reason: e.to_string(),
        })?;
    let camera = Camera::new(camera.intrinsics, camera.pose.into());
    Ok(CameraFrame::new(image, camera, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn configuration(max_tracked_images: usize) -> TrackingConfiguration {
        TrackingConfiguration {
            reference_images: vec![
                ReferenceImage::new("island", 0.063, 0.088),
                ReferenceImage::new("forest", 0.063, 0.088),
            ],
            max_tracked_images,
            light_estimation: true,
            auto_focus: true,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<TrackingEvent>) -> Vec<TrackingEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    const TWO_CARDS: &str = r#"{
        "steps": [
            { "event": { "type": "anchor_added", "anchor": "a", "reference": "island",
                         "pose": { "position": [0.0, 0.0, 0.5],
                                   "rotation": [-1.5707963, 0.0, 0.0] } } },
            { "event": { "type": "anchor_added", "anchor": "b", "reference": "forest" } },
            { "event": { "type": "anchor_updated", "anchor": "b" } },
            { "event": { "type": "anchor_removed", "anchor": "a" } }
        ]
    }"#;

    #[test]
    fn parses_script_events() {
        let script = ReplayScript::from_json(TWO_CARDS).unwrap();
        assert_eq!(script.steps.len(), 4);
        assert!(matches!(
            &script.steps[0].event,
            ScriptEvent::AnchorAdded { reference, .. } if reference == "island"
        ));
        assert!(matches!(
            &script.steps[3].event,
            ScriptEvent::AnchorRemoved { anchor } if anchor == "a"
        ));
    }

    #[tokio::test]
    async fn replays_anchor_lifecycle() {
        let script = ReplayScript::from_json(TWO_CARDS).unwrap();
        let mut tracker = ReplayTracker::new(script, ".", 8);
        let rx = tracker.run(&configuration(2), RunOptions::default()).unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 4);
        let TrackingEvent::AnchorAdded(a) = &events[0] else {
            panic!("expected anchor_added, got {}", events[0].kind());
        };
        assert_eq!(a.reference.name, "island");
        assert!((a.pose.position().z - 0.5).abs() < 1e-12);
        assert!(matches!(&events[3], TrackingEvent::AnchorRemoved(id) if *id == a.id));
    }

    #[tokio::test]
    async fn drops_anchors_beyond_max_tracked() {
        let script = ReplayScript::from_json(TWO_CARDS).unwrap();
        let mut tracker = ReplayTracker::new(script, ".", 8);
        let rx = tracker.run(&configuration(1), RunOptions::default()).unwrap();
        let events = collect(rx).await;

        let kinds: Vec<_> = events.iter().map(TrackingEvent::kind).collect();
        assert_eq!(kinds, vec!["anchor_added", "anchor_removed"]);
    }

    #[tokio::test]
    async fn each_run_mints_fresh_anchor_ids() {
        let script = ReplayScript::from_json(TWO_CARDS).unwrap();
        let mut tracker = ReplayTracker::new(script, ".", 8);
        let first = collect(tracker.run(&configuration(2), RunOptions::default()).unwrap()).await;
        let second = collect(tracker.run(&configuration(2), RunOptions::reset()).unwrap()).await;

        let (TrackingEvent::AnchorAdded(a1), TrackingEvent::AnchorAdded(a2)) =
            (&first[0], &second[0])
        else {
            panic!("expected anchor_added events");
        };
        assert_ne!(a1.id, a2.id);
    }

    #[test]
    fn rejects_unknown_reference() {
        let script = ReplayScript::from_json(
            r#"{ "steps": [
                { "event": { "type": "anchor_added", "anchor": "a", "reference": "swamp" } }
            ] }"#,
        )
        .unwrap();
        assert_eq!(
            script.validate(&configuration(1)),
            Err(TrackingError::UnknownReference("swamp".to_string()))
        );
    }

    #[test]
    fn rejects_update_for_unknown_anchor() {
        let script = ReplayScript::from_json(
            r#"{ "steps": [ { "event": { "type": "anchor_removed", "anchor": "ghost" } } ] }"#,
        )
        .unwrap();
        assert_eq!(
            script.validate(&configuration(1)),
            Err(TrackingError::UnknownAnchor("ghost".to_string()))
        );
    }

    #[test]
    fn rejects_anchor_reused_after_removal() {
        let script = ReplayScript::from_json(
            r#"{ "steps": [
                { "event": { "type": "anchor_added", "anchor": "a", "reference": "island" } },
                { "event": { "type": "anchor_removed", "anchor": "a" } },
                { "event": { "type": "anchor_removed", "anchor": "a" } },
                { "event": { "type": "anchor_added", "anchor": "b", "reference": "forest" } }
            ] }"#,
        )
        .unwrap();
        assert_eq!(
            script.validate(&configuration(1)),
            Err(TrackingError::UnknownAnchor("a".to_string()))
        );
    }

    #[tokio::test]
    async fn readded_anchor_can_be_updated_again() {
        let script = ReplayScript::from_json(
            r#"{ "steps": [
                { "event": { "type": "anchor_added", "anchor": "a", "reference": "island" } },
                { "event": { "type": "anchor_removed", "anchor": "a" } },
                { "event": { "type": "anchor_added", "anchor": "a", "reference": "island" } },
                { "event": { "type": "anchor_updated", "anchor": "a" } }
            ] }"#,
        )
        .unwrap();
        let mut tracker = ReplayTracker::new(script, ".", 8);
        let events = collect(tracker.run(&configuration(1), RunOptions::default()).unwrap()).await;

        let kinds: Vec<_> = events.iter().map(TrackingEvent::kind).collect();
        assert_eq!(
            kinds,
            vec!["anchor_added", "anchor_removed", "anchor_added", "anchor_updated"]
        );
    }

    #[tokio::test]
    async fn unreadable_frame_is_skipped() {
        let script = ReplayScript::from_json(
            r#"{ "steps": [
                { "event": { "type": "frame", "image": "missing.png",
                             "camera": { "fx": 30.0, "fy": 30.0, "cx": 16.0, "cy": 12.0 } } },
                { "event": { "type": "anchor_added", "anchor": "a", "reference": "island" } },
                { "event": { "type": "anchor_removed", "anchor": "a" } }
            ] }"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ReplayTracker::new(script, dir.path(), 8);
        let events = collect(tracker.run(&configuration(1), RunOptions::default()).unwrap()).await;

        let kinds: Vec<_> = events.iter().map(TrackingEvent::kind).collect();
        assert_eq!(kinds, vec!["anchor_added", "anchor_removed"]);
    }

    #[tokio::test]
    async fn loads_frames_relative_to_script() {
        let dir = tempfile::tempdir().unwrap();
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 24, Rgb([10, 20, 30]))
            .save(dir.path().join("frame.png"))
            .unwrap();
        let script_path = dir.path().join("session.json");
        std::fs::write(
            &script_path,
            r#"{ "steps": [ { "delay_ms": 1, "event": { "type": "frame", "image": "frame.png",
                "camera": { "fx": 30.0, "fy": 30.0, "cx": 16.0, "cy": 12.0 } } } ] }"#,
        )
        .unwrap();

        let mut tracker = ReplayTracker::from_file(&script_path, 4).unwrap();
        let events = collect(tracker.run(&configuration(1), RunOptions::default()).unwrap()).await;

        assert_eq!(events.len(), 1);
        let TrackingEvent::FrameUpdated(frame) = &events[0] else {
            panic!("expected frame_updated");
        };
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(frame.camera().intrinsics.cx, 16.0);
    }
}
