use tokio::sync::mpsc;

use crate::error::TrackingError;
use crate::tracking::anchor::ReferenceImage;
use crate::tracking::event::TrackingEvent;

/// What a tracking session should look for and how.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfiguration {
    pub reference_images: Vec<ReferenceImage>,
    pub max_tracked_images: usize,
    pub light_estimation: bool,
    pub auto_focus: bool,
}

impl TrackingConfiguration {
    pub fn reference(&self, name: &str) -> Option<&ReferenceImage> {
        self.reference_images.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub reset_tracking: bool,
    pub remove_existing_anchors: bool,
}

impl RunOptions {
    pub fn reset() -> Self {
        Self {
            reset_tracking: true,
            remove_existing_anchors: true,
        }
    }
}

/// A camera tracking subsystem. Each `run` starts (or restarts) the session
/// and hands back the event stream for that run; streams from earlier runs
/// are abandoned.
pub trait TrackingSession: Send {
    fn run(
        &mut self,
        configuration: &TrackingConfiguration,
        options: RunOptions,
    ) -> Result<mpsc::Receiver<TrackingEvent>, TrackingError>;

    fn name(&self) -> &'static str;
}
