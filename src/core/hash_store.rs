//! C2 — File Hash Store
//!
//! Content-addressed SHA-256 manifests keyed by absolute path, persisted as
//! one small JSON file per target under a single hash directory. Grounded
//! on `PyRo1121-omg`'s `core/security/audit.rs`, which already streams
//! `sha2::Sha256` over file contents and serializes small per-record structs
//! with `serde_json`; this module generalizes that to per-path manifest
//! files instead of one append-only log.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::IntegrityError;
use crate::core::safe_io;

/// On-disk manifest record for one verified path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub target_path: PathBuf,
    pub algorithm: String,
    pub hex_hash: String,
    pub recorded_at: String,
}

/// A content-addressed store of per-path SHA-256 manifests.
pub struct FileHashStore {
    hash_dir: PathBuf,
}

/// Outcome of recording a new manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Overwritten,
}

impl FileHashStore {
    #[must_use]
    pub fn new(hash_dir: impl Into<PathBuf>) -> Self {
        Self {
            hash_dir: hash_dir.into(),
        }
    }

    #[must_use]
    pub fn hash_dir(&self) -> &Path {
        &self.hash_dir
    }

    #[must_use]
    pub fn hash_dir_exists(&self) -> bool {
        self.hash_dir.is_dir()
    }

    /// Manifest filename for `path`: a 12-char prefix of the base64-url
    /// encoding of SHA-256(absolute path string).
    #[must_use]
    pub fn manifest_filename(path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.as_os_str().as_encoded_bytes());
        let digest = hasher.finalize();
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        encoded.chars().take(12).collect()
    }

    fn manifest_path(&self, path: &Path) -> PathBuf {
        self.hash_dir.join(Self::manifest_filename(path))
    }

    fn read_manifest(&self, manifest_path: &Path) -> Result<Option<ManifestEntry>, IntegrityError> {
        if !manifest_path.exists() {
            return Ok(None);
        }
        let bytes = safe_io::safe_read(manifest_path)?;
        let entry: ManifestEntry = serde_json::from_slice(&bytes)
            .map_err(|_| IntegrityError::MalformedManifest(manifest_path.to_path_buf()))?;
        Ok(Some(entry))
    }

    fn compute_hash(&self, path: &Path) -> Result<String, IntegrityError> {
        let bytes = safe_io::safe_read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Record the current hash of `path`. Fails with `HashCollision` if the
    /// manifest file already exists for a *different* target path.
    pub fn record(&self, path: &Path) -> Result<RecordOutcome, IntegrityError> {
        if !self.hash_dir_exists() {
            std::fs::create_dir_all(&self.hash_dir).map_err(|source| {
                IntegrityError::Io(crate::core::error::IoError::Io {
                    path: self.hash_dir.clone(),
                    source,
                })
            })?;
        }
        let manifest_path = self.manifest_path(path);
        let filename = Self::manifest_filename(path);

        if let Some(existing) = self.read_manifest(&manifest_path)? {
            if existing.target_path != path {
                return Err(IntegrityError::HashCollision {
                    existing: existing.target_path,
                    incoming: path.to_path_buf(),
                    manifest_name: filename,
                });
            }
        }

        let hex_hash = self.compute_hash(path)?;
        let entry = ManifestEntry {
            target_path: path.to_path_buf(),
            algorithm: "sha256".to_string(),
            hex_hash,
            recorded_at: jiff::Zoned::now()
                .strftime("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
        };
        let json = serde_json::to_vec_pretty(&entry)
            .map_err(|_| IntegrityError::MalformedManifest(manifest_path.clone()))?;
        let tmp = manifest_path.with_extension("tmp");
        std::fs::write(&tmp, &json).map_err(|source| {
            IntegrityError::Io(crate::core::error::IoError::Io {
                path: tmp.clone(),
                source,
            })
        })?;
        std::fs::rename(&tmp, &manifest_path).map_err(|source| {
            IntegrityError::Io(crate::core::error::IoError::Io {
                path: manifest_path.clone(),
                source,
            })
        })?;
        let _ = std::fs::set_permissions(
            &manifest_path,
            std::os::unix::fs::PermissionsExt::from_mode(0o644),
        );

        Ok(RecordOutcome::Created)
    }

    /// Verify that `path`'s current bytes match its recorded manifest.
    pub fn verify(&self, path: &Path) -> Result<(), IntegrityError> {
        if !self.hash_dir_exists() {
            return Err(IntegrityError::HashDirMissing(self.hash_dir.clone()));
        }
        let manifest_path = self.manifest_path(path);
        let entry = self
            .read_manifest(&manifest_path)?
            .ok_or_else(|| IntegrityError::HashFileMissing(path.to_path_buf()))?;

        if entry.target_path != path {
            return Err(IntegrityError::HashCollision {
                existing: entry.target_path,
                incoming: path.to_path_buf(),
                manifest_name: Self::manifest_filename(path),
            });
        }

        let actual = self.compute_hash(path)?;
        if actual != entry.hex_hash {
            return Err(IntegrityError::HashMismatch {
                path: path.to_path_buf(),
                expected: entry.hex_hash,
                actual,
            });
        }
        Ok(())
    }
}
