//! Rigid poses and pinhole projection.
//!
//! World units are metres. Cameras follow the +Z forward, +X right, +Y down
//! convention so projected pixel coordinates grow right and down.

use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a local frame, expressed in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    isometry: Isometry3<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            isometry: Isometry3::from_parts(Translation3::from(position), orientation),
        }
    }

    pub fn identity() -> Self {
        Self {
            isometry: Isometry3::identity(),
        }
    }

    /// Builds a pose from a position and roll/pitch/yaw angles in radians.
    pub fn from_euler(position: [f64; 3], euler: [f64; 3]) -> Self {
        Self::new(
            Vector3::from(position),
            UnitQuaternion::from_euler_angles(euler[0], euler[1], euler[2]),
        )
    }

    pub fn position(&self) -> Vector3<f64> {
        self.isometry.translation.vector
    }

    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.isometry.rotation
    }

    /// Maps a point from this pose's local frame into world coordinates.
    pub fn to_world(&self, local: &Point3<f64>) -> Point3<f64> {
        self.isometry * local
    }

    /// Maps a world point into this pose's local frame.
    pub fn to_local(&self, world: &Point3<f64>) -> Point3<f64> {
        self.isometry.inverse_transform_point(world)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// A calibrated pinhole camera placed in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    /// Camera-to-world transform.
    pub pose: Pose,
}

impl Camera {
    pub fn new(intrinsics: CameraIntrinsics, pose: Pose) -> Self {
        Self { intrinsics, pose }
    }

    /// Projects a world point to pixel coordinates. Returns `None` when the
    /// point is on or behind the image plane.
    pub fn project(&self, world: &Point3<f64>) -> Option<Point2<f64>> {
        let p = self.pose.to_local(world);
        if p.z <= f64::EPSILON {
            return None;
        }
        let k = &self.intrinsics;
        Some(Point2::new(
            k.fx * p.x / p.z + k.cx,
            k.fy * p.y / p.z + k.cy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn camera() -> Camera {
        Camera::new(
            CameraIntrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 240.0,
            },
            Pose::identity(),
        )
    }

    #[test]
    fn projects_point_on_optical_axis_to_principal_point() {
        let p = camera().project(&Point3::new(0.0, 0.0, 2.0)).unwrap();
        assert!((p.x - 320.0).abs() < 1e-9);
        assert!((p.y - 240.0).abs() < 1e-9);
    }

    #[test]
    fn point_behind_camera_does_not_project() {
        assert!(camera().project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn pose_round_trips_points() {
        let pose = Pose::from_euler([0.1, -0.2, 0.5], [-FRAC_PI_2, 0.0, 0.3]);
        let local = Point3::new(0.03, 0.0, -0.04);
        let back = pose.to_local(&pose.to_world(&local));
        assert!((back - local).norm() < 1e-12);
    }

    #[test]
    fn tilted_anchor_maps_local_z_to_world_y() {
        let pose = Pose::from_euler([0.0, 0.0, 0.5], [-FRAC_PI_2, 0.0, 0.0]);
        let world = pose.to_world(&Point3::new(0.0, 0.0, 0.1));
        assert!((world - Point3::new(0.0, 0.1, 0.5)).norm() < 1e-12);
    }
}
