pub mod frame;
pub mod geometry;

pub use frame::CameraFrame;
pub use geometry::{Camera, CameraIntrinsics, Pose};
