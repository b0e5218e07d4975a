pub mod anchor;
pub mod event;
pub mod replay;
pub mod session;

pub use anchor::{AnchorId, ReferenceImage, TrackedAnchor};
pub use event::TrackingEvent;
pub use replay::{ReplayScript, ReplayTracker};
pub use session::{RunOptions, TrackingConfiguration, TrackingSession};
