use anyhow::Result;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// True when the bytes carry a recognised image signature.
pub fn looks_like_image(data: &[u8]) -> bool {
    infer::is_image(data)
}

/// Save image data into a content-addressed store and return its hash id.
/// Identical uploads share one file.
pub async fn save_image<P: AsRef<Path>>(base: P, data: Bytes) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(&data);
    let hash = format!("{:x}", hasher.finalize());
    let dir = base.as_ref().join(&hash[..2]);
    fs::create_dir_all(&dir).await?;
    let path = dir.join(&hash);
    if !fs::try_exists(&path).await.unwrap_or(false) {
        fs::write(path, data).await?;
    }
    Ok(hash)
}

/// Determine the on-disk path for an image id within the store.
pub fn image_path<P: AsRef<Path>>(base: P, id: &str) -> PathBuf {
    base.as_ref().join(&id[..2]).join(id)
}
