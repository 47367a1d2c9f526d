use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FacepipeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Compute backend for model inference.
///
/// Resolved once when the pipeline is constructed; there is no ambient
/// probing at call time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    #[default]
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub backend: ComputeBackend,

    /// GPU device ID, ignored for the CPU backend.
    #[serde(default)]
    pub device_id: i32,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_intra_threads() -> usize {
    4
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: ComputeBackend::default(),
            device_id: 0,
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory where downloaded model files are cached.
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,

    /// MTCNN proposal network (stage 1).
    #[serde(default)]
    pub pnet: ModelSource,

    /// MTCNN refinement network (stage 2).
    #[serde(default)]
    pub rnet: ModelSource,

    /// MTCNN output network (stage 3).
    #[serde(default)]
    pub onet: ModelSource,

    /// FaceNet embedding network.
    #[serde(default)]
    pub embedder: ModelSource,
}

/// Where to obtain one pretrained model file.
///
/// Resolution order: `path` wins when set and must exist; otherwise a file
/// already present in the cache directory is used; otherwise `url` is
/// downloaded into the cache. With no path, cached file, or URL the
/// pipeline reports a configuration error rather than guessing at a host.
/// When `sha256` is set the resolved file is verified against it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelSource {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub url: Option<String>,

    /// Hex-encoded SHA-256 digest of the model file.
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facepipe")
        .join("models")
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
            pnet: ModelSource::default(),
            rnet: ModelSource::default(),
            onet: ModelSource::default(),
            embedder: ModelSource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Side length of the square face crops handed to the embedder.
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    /// Extra pixels of context around each detected box, in crop units.
    #[serde(default)]
    pub margin: u32,

    /// Smallest face side length, in pixels, the cascade will look for.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,

    /// Per-stage confidence thresholds (P-Net, R-Net, O-Net).
    #[serde(default = "default_thresholds")]
    pub thresholds: [f32; 3],

    /// Scale reduction factor between image pyramid levels.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,

    /// Normalize crop pixel values for the embedding network.
    #[serde(default = "default_post_process")]
    pub post_process: bool,

    /// Return every detected face; when false only the most confident one.
    #[serde(default = "default_keep_all")]
    pub keep_all: bool,
}

fn default_image_size() -> u32 {
    160
}

fn default_min_face_size() -> u32 {
    20
}

fn default_thresholds() -> [f32; 3] {
    [0.6, 0.7, 0.7]
}

fn default_scale_factor() -> f32 {
    0.709
}

fn default_post_process() -> bool {
    true
}

fn default_keep_all() -> bool {
    true
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            margin: 0,
            min_face_size: default_min_face_size(),
            thresholds: default_thresholds(),
            scale_factor: default_scale_factor(),
            post_process: default_post_process(),
            keep_all: default_keep_all(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Cosine similarity above which two embeddings are the same person.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Sightings needed before an identity is considered confirmed.
    #[serde(default = "default_confirm_sightings")]
    pub confirm_sightings: usize,
}

fn default_similarity_threshold() -> f32 {
    0.9
}

fn default_confirm_sightings() -> usize {
    3
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            confirm_sightings: default_confirm_sightings(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| FacepipeError::Config(e.to_string()))?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| FacepipeError::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facepipe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults_match_pretrained_setup() {
        let config = DetectorConfig::default();
        assert_eq!(config.image_size, 160);
        assert_eq!(config.margin, 0);
        assert_eq!(config.min_face_size, 20);
        assert_eq!(config.thresholds, [0.6, 0.7, 0.7]);
        assert!((config.scale_factor - 0.709).abs() < f32::EPSILON);
        assert!(config.post_process);
        assert!(config.keep_all);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed.detector.thresholds, config.detector.thresholds);
        assert_eq!(parsed.runtime.backend, config.runtime.backend);
        assert_eq!(parsed.models.dir, config.models.dir);
        assert_eq!(
            parsed.tracker.confirm_sightings,
            config.tracker.confirm_sightings
        );
    }

    #[test]
    fn test_model_sources_from_toml() {
        let parsed: Config = toml::from_str(
            r#"
            [models.pnet]
            url = "https://models.example.net/mtcnn/pnet.onnx"
            sha256 = "3c9ec211188155583115c0a4af9d6313640b1c5c7ed47703a118c23b50754c96"

            [models.embedder]
            path = "/opt/models/facenet.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.models.pnet.url.as_deref(),
            Some("https://models.example.net/mtcnn/pnet.onnx")
        );
        assert!(parsed.models.pnet.sha256.is_some());
        assert_eq!(
            parsed.models.embedder.path,
            Some(PathBuf::from("/opt/models/facenet.onnx"))
        );
        assert!(parsed.models.rnet.url.is_none());
        assert!(parsed.models.rnet.path.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [runtime]
            backend = "cuda"

            [detector]
            min_face_size = 40
            "#,
        )
        .unwrap();
        assert_eq!(parsed.runtime.backend, ComputeBackend::Cuda);
        assert_eq!(parsed.runtime.intra_threads, 4);
        assert_eq!(parsed.detector.min_face_size, 40);
        assert_eq!(parsed.detector.image_size, 160);
    }
}
