//! Pretrained model acquisition.
//!
//! Model weights are external artifacts. Each model resolves from its
//! configured [`ModelSource`]: a local file path, a file already in the
//! on-disk cache, or a configured URL downloaded into the cache. A model
//! with none of the three is a configuration error, reported before any
//! inference is attempted. Configured SHA-256 digests are verified against
//! the resolved file.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::config::{ModelSource, ModelsConfig};
use crate::error::{FacepipeError, Result};

/// The pretrained networks the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// MTCNN proposal network (stage 1).
    PNet,
    /// MTCNN refinement network (stage 2).
    RNet,
    /// MTCNN output network (stage 3).
    ONet,
    /// FaceNet embedding network (VGGFace2 weights).
    Embedder,
}

fn cache_filename(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::PNet => "mtcnn-pnet.onnx",
        ModelKind::RNet => "mtcnn-rnet.onnx",
        ModelKind::ONet => "mtcnn-onet.onnx",
        ModelKind::Embedder => "facenet-vggface2.onnx",
    }
}

fn source_for(models: &ModelsConfig, kind: ModelKind) -> &ModelSource {
    match kind {
        ModelKind::PNet => &models.pnet,
        ModelKind::RNet => &models.rnet,
        ModelKind::ONet => &models.onet,
        ModelKind::Embedder => &models.embedder,
    }
}

/// Resolve the on-disk path for a model, downloading it if necessary.
pub fn model_path(models: &ModelsConfig, kind: ModelKind) -> Result<PathBuf> {
    let source = source_for(models, kind);

    if let Some(path) = &source.path {
        if !path.exists() {
            return Err(FacepipeError::ModelFetch(format!(
                "configured model file {} does not exist",
                path.display()
            )));
        }
        if let Some(expected) = &source.sha256 {
            let digest = file_sha256(path)?;
            if !digest.eq_ignore_ascii_case(expected) {
                return Err(FacepipeError::ModelFetch(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    path.display(),
                    expected,
                    digest
                )));
            }
        }
        return Ok(path.clone());
    }

    let dest = models.dir.join(cache_filename(kind));
    if !dest.exists() {
        let url = source.url.as_deref().ok_or_else(|| {
            FacepipeError::ModelFetch(format!(
                "no cached {} in {} and no path or url configured for the {:?} model",
                cache_filename(kind),
                models.dir.display(),
                kind
            ))
        })?;
        std::fs::create_dir_all(&models.dir)?;
        download_model(url, &dest)?;
    }

    if let Some(expected) = &source.sha256 {
        verify_sha256(&dest, expected)?;
    }

    Ok(dest)
}

/// Download a model file to the given destination.
fn download_model(url: &str, dest: &Path) -> Result<()> {
    tracing::info!(model = %dest.display(), %url, "Downloading model...");
    let response = ureq::get(url)
        .call()
        .map_err(|e| FacepipeError::ModelFetch(format!("failed to download {}: {}", url, e)))?;

    let mut file = File::create(dest)?;
    std::io::copy(&mut response.into_reader(), &mut file)?;
    tracing::info!(model = %dest.display(), "Model downloaded");

    Ok(())
}

/// Verify a cache-managed model file against an expected SHA-256 digest.
///
/// On mismatch the file is removed so the next call re-downloads it.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let digest = file_sha256(path)?;
    if !digest.eq_ignore_ascii_case(expected) {
        std::fs::remove_file(path)?;
        return Err(FacepipeError::ModelFetch(format!(
            "checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            digest
        )));
    }

    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
