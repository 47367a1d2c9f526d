//! Face embedding extraction.
//!
//! Wraps the pretrained FaceNet network (VGGFace2 training regime) behind a
//! batch interface: N normalized face crops in, N fixed-length feature
//! vectors out, index-aligned. The exported network L2-normalizes its
//! output internally, so the vectors are used as-is.

use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;

use crate::error::{FacepipeError, Result};

/// Fixed-length face feature vector.
pub type Embedding = Vec<f32>;

pub struct FaceEmbedder {
    session: Mutex<Session>,
    image_size: u32,
}

impl FaceEmbedder {
    pub fn new(session: Session, image_size: u32) -> Self {
        Self {
            session: Mutex::new(session),
            image_size,
        }
    }

    /// Embed a batch of CHW face crops, one vector per crop.
    ///
    /// Every crop must hold `3 * image_size * image_size` values. An empty
    /// batch short-circuits to an empty result without touching the model.
    pub fn embed(&self, crops: &[Vec<f32>]) -> Result<Vec<Embedding>> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.image_size as usize;
        let batch = pack_batch(crops, size)?;
        let input_tensor =
            Tensor::from_array(([crops.len(), 3, size, size], batch.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| FacepipeError::Other("model session lock poisoned".to_string()))?;
        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        let embedding_output = outputs
            .iter()
            .next()
            .ok_or_else(|| FacepipeError::Other("no embedding output".to_string()))?;
        let (shape, data) = embedding_output.1.try_extract_tensor::<f32>()?;

        let dim = embedding_dim(shape, crops.len())?;
        Ok(data.chunks(dim).map(|chunk| chunk.to_vec()).collect())
    }
}

/// Validate the network's output shape and return the embedding length.
///
/// The output must be `[batch, dim]` with a non-zero dim; anything else
/// means the wrong model file is loaded.
fn embedding_dim(shape: &[i64], batch: usize) -> Result<usize> {
    if shape.len() != 2 || shape[0] as usize != batch || shape[1] < 1 {
        return Err(FacepipeError::Other(format!(
            "unexpected embedding output shape {:?} for batch of {}",
            shape, batch
        )));
    }
    Ok(shape[1] as usize)
}

/// Concatenate crops into a flat NCHW buffer, checking each crop's length.
fn pack_batch(crops: &[Vec<f32>], size: usize) -> Result<Vec<f32>> {
    let crop_len = 3 * size * size;
    let mut batch = Vec::with_capacity(crops.len() * crop_len);
    for crop in crops {
        if crop.len() != crop_len {
            return Err(FacepipeError::InvalidShape {
                expected: crop_len,
                actual: crop.len(),
            });
        }
        batch.extend_from_slice(crop);
    }
    Ok(batch)
}
