// Pose detection pipeline

pub mod batch;
pub mod detection;
pub mod events;
pub mod geometry;
pub mod registry;
pub mod types;
#[cfg(feature = "usls")]
pub mod usls_landmarker;
