use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Arc;
use uuid::Uuid;

use crate::common::geometry::Camera;

/// A captured camera image together with the camera that took it.
#[derive(Clone, Debug)]
pub struct CameraFrame {
    frame_id: Uuid,
    image: Arc<DynamicImage>,
    camera: Camera,
    captured_at: DateTime<Utc>,
}

impl CameraFrame {
    pub fn new(image: DynamicImage, camera: Camera, captured_at: DateTime<Utc>) -> Self {
        Self {
            frame_id: Uuid::new_v4(),
            image: Arc::new(image),
            camera,
            captured_at,
        }
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}
