pub mod boxes;
pub mod mtcnn;

pub use boxes::BoundingBox;
pub use mtcnn::{DetectedFace, MtcnnDetector};
