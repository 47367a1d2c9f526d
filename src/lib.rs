//! Face detection and embedding extraction over pretrained ONNX models.
//!
//! The crate turns a raw image buffer plus a shape descriptor into one
//! fixed-length embedding vector per detected face. Detection uses an
//! MTCNN-style cascade; embeddings come from a FaceNet network with
//! VGGFace2 weights. Build a [`FacePipeline`] once at startup and call
//! [`FacePipeline::next`] per frame:
//!
//! ```no_run
//! use facepipe::{Config, FacePipeline};
//!
//! # fn main() -> facepipe::Result<()> {
//! let pipeline = FacePipeline::new(&Config::default())?;
//! let frame = vec![0u8; 480 * 640 * 3];
//! let (embeddings, token) = pipeline.next(&frame, &[480, 640, 3], "cam-0")?;
//! println!("{} people in frame {token}", embeddings.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod detect;
pub mod embed;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod tracker;

pub use config::{ComputeBackend, Config};
pub use detect::{BoundingBox, DetectedFace, MtcnnDetector};
pub use embed::{Embedding, FaceEmbedder};
pub use error::{FacepipeError, Result};
pub use pipeline::FacePipeline;
pub use tracker::{ConfirmedSighting, IdentityTracker};
