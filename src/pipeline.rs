//! The face pipeline: decode, detect, embed.
//!
//! [`FacePipeline`] is the explicit process-wide context: all four model
//! sessions load once at construction and are immutable afterwards, so
//! lifetime and threading assumptions are visible at the call site rather
//! than hidden in module globals.

use std::path::Path;

use image::RgbImage;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};

use crate::config::{ComputeBackend, Config, RuntimeConfig};
use crate::decode::decode_image;
use crate::detect::{DetectedFace, MtcnnDetector};
use crate::embed::{Embedding, FaceEmbedder};
use crate::error::Result;
use crate::registry::{model_path, ModelKind};

pub struct FacePipeline {
    detector: MtcnnDetector,
    embedder: FaceEmbedder,
}

impl FacePipeline {
    /// Load all models and bind the compute backend.
    ///
    /// Downloads any missing model files, so the first construction on a
    /// machine may take a while.
    pub fn new(config: &Config) -> Result<Self> {
        tracing::info!(
            backend = ?config.runtime.backend,
            device_id = config.runtime.device_id,
            intra_threads = config.runtime.intra_threads,
            "initializing face pipeline"
        );

        let pnet = build_session(&model_path(&config.models, ModelKind::PNet)?, &config.runtime)?;
        let rnet = build_session(&model_path(&config.models, ModelKind::RNet)?, &config.runtime)?;
        let onet = build_session(&model_path(&config.models, ModelKind::ONet)?, &config.runtime)?;
        let embedder_session = build_session(
            &model_path(&config.models, ModelKind::Embedder)?,
            &config.runtime,
        )?;

        Ok(Self {
            detector: MtcnnDetector::new(pnet, rnet, onet, config.detector.clone()),
            embedder: FaceEmbedder::new(embedder_session, config.detector.image_size),
        })
    }

    /// Run the full pipeline on a raw image buffer.
    ///
    /// `shape` describes the buffer as `[height, width, 3]` (a leading batch
    /// dimension of 1 is accepted). The correlation token is returned
    /// unchanged so callers can match results to requests.
    ///
    /// When no face is detected the result is an empty vector, not an
    /// error; the embedder is never invoked on an empty detection.
    pub fn next<T>(&self, item: &[u8], shape: &[usize], token: T) -> Result<(Vec<Embedding>, T)> {
        let img = decode_image(item, shape)?;

        let faces = self.detector.detect(&img)?;
        if faces.is_empty() {
            return Ok((Vec::new(), token));
        }

        let crops: Vec<Vec<f32>> = faces.into_iter().map(|face| face.crop).collect();
        let embeddings = self.embedder.embed(&crops)?;

        Ok((embeddings, token))
    }

    /// Detection stage only.
    pub fn detect(&self, img: &RgbImage) -> Result<Vec<DetectedFace>> {
        self.detector.detect(img)
    }

    /// Embedding stage only, for crops produced by [`Self::detect`].
    pub fn embed_crops(&self, crops: &[Vec<f32>]) -> Result<Vec<Embedding>> {
        self.embedder.embed(crops)
    }
}

fn build_session(model_path: &Path, runtime: &RuntimeConfig) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(runtime.intra_threads)?;

    let builder = match runtime.backend {
        ComputeBackend::Cuda => builder.with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(runtime.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])?,
        ComputeBackend::Cpu => {
            builder.with_execution_providers([CPUExecutionProvider::default().build()])?
        }
    };

    Ok(builder.commit_from_file(model_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    // Exercises the full decode -> detect -> embed path against real model
    // files; needs the pretrained models in the cache or configured locally.
    #[test]
    #[ignore = "requires pretrained models in the cache or config"]
    fn test_black_image_yields_no_embeddings() -> Result<()> {
        let config = Config::default();
        let pipeline = FacePipeline::new(&config)?;

        let buffer = vec![0u8; 160 * 160 * 3];
        let (embeddings, token) = pipeline.next(&buffer, &[160, 160, 3], 42u32)?;
        assert!(embeddings.is_empty());
        assert_eq!(token, 42);
        Ok(())
    }

    #[test]
    #[ignore = "requires pretrained models in the cache or config"]
    fn test_embeddings_are_deterministic() -> Result<()> {
        let config = Config::default();
        let pipeline = FacePipeline::new(&config)?;

        let buffer: Vec<u8> = (0..320usize * 320 * 3).map(|i| (i % 251) as u8).collect();
        let (first, _) = pipeline.next(&buffer, &[320, 320, 3], ())?;
        let (second, _) = pipeline.next(&buffer, &[320, 320, 3], ())?;
        assert_eq!(first, second);
        Ok(())
    }

    // Point FACEPIPE_TEST_PORTRAIT at an image with a single clear frontal
    // face of at least the minimum detectable size.
    #[test]
    #[ignore = "requires pretrained models and a sample portrait"]
    fn test_single_face_yields_one_fixed_length_embedding() -> Result<()> {
        let sample = std::env::var("FACEPIPE_TEST_PORTRAIT")?;
        let img = image::open(sample)?.to_rgb8();
        let (width, height) = img.dimensions();

        let pipeline = FacePipeline::new(&Config::default())?;
        let (embeddings, token) = pipeline.next(
            img.as_raw(),
            &[height as usize, width as usize, 3],
            "portrait",
        )?;

        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].len(), 512);
        assert_eq!(token, "portrait");
        Ok(())
    }
}
