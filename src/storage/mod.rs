//! Object storage for contexts and encrypted datasets
//!
//! Blobs are addressed by `(bucket, path)`. `FsObjectStore` maps them to
//! `root/bucket/path` on local disk and keeps a SHA256 sidecar next to every
//! blob it writes, so a corrupted download fails instead of decoding garbage.

use crate::codec::{self, CipherArray};
use crate::error::{EmlError, Result};
use crate::he::SecretContext;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Blob storage addressed by bucket and path
pub trait ObjectStore {
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;
    fn upload(&self, bucket: &str, path: &str, data: &[u8]) -> Result<()>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        (**self).download(bucket, path)
    }

    fn upload(&self, bucket: &str, path: &str, data: &[u8]) -> Result<()> {
        (**self).upload(bucket, path, data)
    }
}

/// Local-disk object store
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(path);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if bucket.is_empty() || path.is_empty() || !plain {
            return Err(EmlError::Storage(format!(
                "invalid object address gs://{}/{}",
                bucket, path
            )));
        }
        Ok(self.root.join(relative))
    }

    fn checksum_path(blob: &Path) -> PathBuf {
        let mut name = blob.as_os_str().to_owned();
        name.push(".sha256");
        PathBuf::from(name)
    }
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl ObjectStore for FsObjectStore {
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let blob = self.blob_path(bucket, path)?;
        let data = std::fs::read(&blob)
            .map_err(|e| EmlError::Storage(format!("{}/{}: {}", bucket, path, e)))?;

        let sidecar = Self::checksum_path(&blob);
        if sidecar.exists() {
            let expected = std::fs::read_to_string(&sidecar)?;
            if expected.trim() != checksum(&data) {
                return Err(EmlError::Storage(format!(
                    "{}/{}: checksum mismatch",
                    bucket, path
                )));
            }
        }
        debug!("Downloaded {}/{} ({} bytes)", bucket, path, data.len());
        Ok(data)
    }

    fn upload(&self, bucket: &str, path: &str, data: &[u8]) -> Result<()> {
        let blob = self.blob_path(bucket, path)?;
        if let Some(parent) = blob.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&blob, data)?;
        std::fs::write(Self::checksum_path(&blob), checksum(data))?;
        debug!("Uploaded {}/{} ({} bytes)", bucket, path, data.len());
        Ok(())
    }
}

fn download_text<S: ObjectStore + ?Sized>(store: &S, bucket: &str, path: &str) -> Result<String> {
    let data = store.download(bucket, path)?;
    String::from_utf8(data)
        .map_err(|_| EmlError::Storage(format!("{}/{}: not UTF-8 text", bucket, path)))
}

/// Download a persisted context and fix its precision before first use
pub fn load_context<X, S>(store: &S, bucket: &str, path: &str, precision: u32) -> Result<X>
where
    X: SecretContext,
    S: ObjectStore + ?Sized,
{
    let mut ctx = X::from_json(&download_text(store, bucket, path)?)?;
    ctx.set_precision(precision)?;
    info!("Loaded context from {}/{} (precision {})", bucket, path, precision);
    Ok(ctx)
}

pub fn save_context<X, S>(store: &S, bucket: &str, path: &str, ctx: &X) -> Result<()>
where
    X: SecretContext,
    S: ObjectStore + ?Sized,
{
    store.upload(bucket, path, ctx.to_json()?.as_bytes())
}

/// Download and decode a ciphertext array
pub fn load_cipher_array<X, S>(
    store: &S,
    ctx: &X,
    bucket: &str,
    path: &str,
) -> Result<CipherArray<X::Ciphertext>>
where
    X: SecretContext,
    S: ObjectStore + ?Sized,
{
    let array = codec::deserialize(ctx, &download_text(store, bucket, path)?)?;
    info!("Loaded {}/{} ({}D, {} rows)", bucket, path, array.ndim(), array.len());
    Ok(array)
}

pub fn save_cipher_array<X, S>(
    store: &S,
    bucket: &str,
    path: &str,
    array: &CipherArray<X::Ciphertext>,
) -> Result<()>
where
    X: SecretContext,
    S: ObjectStore + ?Sized,
{
    store.upload(bucket, path, codec::serialize(array)?.as_bytes())
}
