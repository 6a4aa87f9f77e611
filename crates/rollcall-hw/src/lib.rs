//! rollcall-hw — camera capture for the attendance daemon.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError};
pub use frame::Frame;
