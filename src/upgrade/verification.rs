use crate::core::UpdateError;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// SHA-256 checksum computation and verification for downloads and backups.
///
/// Checksums are rendered as `sha256:<lowercase hex>`. Published checksum
/// manifests (`checksums.txt`, `SHA256SUMS`) use the `sha256sum` format of
/// `<hex>  <file name>` per line, optionally with a `*` before the name for
/// binary mode.
///
/// # Examples
///
/// ```rust,no_run
/// use delta_update::upgrade::verification::ChecksumVerifier;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let checksum = ChecksumVerifier::compute_sha256(Path::new("delta.tar.gz")).await?;
/// ChecksumVerifier::verify_checksum(Path::new("delta.tar.gz"), &checksum).await?;
/// # Ok(())
/// # }
/// ```
pub struct ChecksumVerifier;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

impl ChecksumVerifier {
    /// Computes the SHA-256 checksum of a file, reading it in chunks.
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let mut file = fs::File::open(file_path)
            .await
            .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// SHA-256 checksum of an in-memory buffer.
    #[must_use]
    pub fn checksum_bytes(contents: &[u8]) -> String {
        let digest = Sha256::digest(contents);
        format!("sha256:{}", hex::encode(digest))
    }

    /// Verifies a file against an expected checksum.
    ///
    /// `expected` may be given with or without the `sha256:` prefix and in
    /// either case.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ChecksumMismatch`] when the checksums differ.
    pub async fn verify_checksum(file_path: &Path, expected: &str) -> Result<String> {
        info!("Verifying checksum for: {}", file_path.display());

        let actual = Self::compute_sha256(file_path).await?;
        let expected_norm = normalize(expected);

        if normalize(&actual) != expected_norm {
            return Err(UpdateError::ChecksumMismatch {
                file: file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                expected: format!("sha256:{expected_norm}"),
                actual,
            }
            .into());
        }

        info!("Checksum verification successful");
        Ok(actual)
    }

    /// Finds the checksum for `file_name` in a `sha256sum`-style manifest.
    #[must_use]
    pub fn find_in_manifest(manifest: &str, file_name: &str) -> Option<String> {
        manifest.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            let checksum = parts.next()?;
            let name = parts.next()?.trim_start_matches('*');
            let is_hex = checksum.len() == 64 && checksum.chars().all(|c| c.is_ascii_hexdigit());
            (is_hex && name == file_name).then(|| format!("sha256:{}", checksum.to_lowercase()))
        })
    }
}

fn normalize(checksum: &str) -> String {
    checksum.trim().trim_start_matches("sha256:").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[tokio::test]
    async fn test_compute_sha256() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let checksum = ChecksumVerifier::compute_sha256(file.path()).await.unwrap();
        assert_eq!(checksum, format!("sha256:{HELLO_SHA}"));
    }

    #[tokio::test]
    async fn test_compute_sha256_spans_chunks() {
        let contents: Vec<u8> = (0..HASH_CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&contents).unwrap();

        let checksum = ChecksumVerifier::compute_sha256(file.path()).await.unwrap();
        assert_eq!(checksum, ChecksumVerifier::checksum_bytes(&contents));
    }

    #[tokio::test]
    async fn test_verify_checksum_accepts_bare_and_uppercase() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        ChecksumVerifier::verify_checksum(file.path(), &HELLO_SHA.to_uppercase()).await.unwrap();
        ChecksumVerifier::verify_checksum(file.path(), &format!("sha256:{HELLO_SHA}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_checksum_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"tampered").unwrap();

        let err = ChecksumVerifier::verify_checksum(file.path(), HELLO_SHA).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_find_in_manifest() {
        let manifest = format!(
            "{HELLO_SHA}  delta-linux-amd64.tar.gz\n{}  *delta-windows-amd64.zip\nnot a line\n",
            "a".repeat(64)
        );
        assert_eq!(
            ChecksumVerifier::find_in_manifest(&manifest, "delta-linux-amd64.tar.gz"),
            Some(format!("sha256:{HELLO_SHA}"))
        );
        assert_eq!(
            ChecksumVerifier::find_in_manifest(&manifest, "delta-windows-amd64.zip"),
            Some(format!("sha256:{}", "a".repeat(64)))
        );
        assert!(ChecksumVerifier::find_in_manifest(&manifest, "delta").is_none());
    }
}
