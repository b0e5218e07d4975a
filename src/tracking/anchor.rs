use chrono::{DateTime, Utc};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::common::geometry::Pose;

/// Stable identity of one detected physical image instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId(Uuid);

impl AnchorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A known image the tracking subsystem looks for. Sizes are in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub name: String,
    pub physical_width: f64,
    pub physical_height: f64,
}

impl ReferenceImage {
    pub fn new(name: impl Into<String>, physical_width: f64, physical_height: f64) -> Self {
        Self {
            name: name.into(),
            physical_width,
            physical_height,
        }
    }

    /// Corners of the image in the anchor's local XZ plane: top-left,
    /// top-right, bottom-right, bottom-left.
    pub fn local_corners(&self) -> [Point3<f64>; 4] {
        let hw = self.physical_width / 2.0;
        let hh = self.physical_height / 2.0;
        [
            Point3::new(-hw, 0.0, -hh),
            Point3::new(hw, 0.0, -hh),
            Point3::new(hw, 0.0, hh),
            Point3::new(-hw, 0.0, hh),
        ]
    }
}

/// Snapshot of an image anchor as reported by the tracking subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAnchor {
    pub id: AnchorId,
    pub reference: ReferenceImage,
    pub pose: Pose,
    pub detected_at: DateTime<Utc>,
}

impl TrackedAnchor {
    pub fn new(id: AnchorId, reference: ReferenceImage, pose: Pose) -> Self {
        Self {
            id,
            reference,
            pose,
            detected_at: Utc::now(),
        }
    }
}
