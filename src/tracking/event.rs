use crate::common::frame::CameraFrame;
use crate::tracking::anchor::{AnchorId, TrackedAnchor};

/// Notifications emitted by a tracking session, in capture order.
#[derive(Debug, Clone)]
pub enum TrackingEvent {
    FrameUpdated(CameraFrame),
    AnchorAdded(TrackedAnchor),
    AnchorUpdated(TrackedAnchor),
    AnchorRemoved(AnchorId),
}

impl TrackingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackingEvent::FrameUpdated(_) => "frame_updated",
            TrackingEvent::AnchorAdded(_) => "anchor_added",
            TrackingEvent::AnchorUpdated(_) => "anchor_updated",
            TrackingEvent::AnchorRemoved(_) => "anchor_removed",
        }
    }
}
