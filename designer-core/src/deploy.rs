//! Hash-gated deployment of compiled artifacts.
//!
//! Artifacts are content-addressed under `<deploy_dir>/<device_id>/<hash>.yaml`
//! and each device has one record file under `<deploy_dir>/records/`. A
//! deploy writes the artifact durably before the record points at it, so a
//! crash or cancellation leaves either the old record (plus at most one
//! unreferenced artifact) or the new complete one.
//!
//! An `expected_hash` of `""` means "nothing deployed yet".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::compiler::CompiledArtifact;
use crate::error::DeployError;
use crate::store::DeviceSummary;

const RECORDS_DIR: &str = "records";

/// Last successful deploy of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    /// Device id.
    pub device_id: String,
    /// Hash of the deployed artifact.
    pub hash: String,
    /// Where the artifact was written.
    pub path: PathBuf,
    /// Commit time, Unix milliseconds.
    pub deployed_at_ms: u64,
}

/// Result of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    /// Artifact location.
    pub path: PathBuf,
    /// Artifact hash.
    pub hash: String,
    /// Hash recorded before this deploy.
    pub previous_hash: Option<String>,
    /// False when the artifact was already deployed.
    pub changed: bool,
}

/// Result of a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewOutcome {
    /// The artifact that would be deployed.
    pub artifact: CompiledArtifact,
    /// Hash currently recorded for the device.
    pub current_hash: Option<String>,
    /// True if deploying would change the recorded hash.
    pub changed: bool,
}

/// Serializes deploys per device and owns the deploy records.
#[derive(Debug)]
pub struct DeployCoordinator {
    deploy_dir: PathBuf,
    records: RwLock<HashMap<String, DeployRecord>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeployCoordinator {
    /// Open a coordinator rooted at `deploy_dir`, reloading records left by
    /// earlier runs. Unreadable record files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Io`] if the directories cannot be created or
    /// listed.
    pub fn open(deploy_dir: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let deploy_dir = deploy_dir.into();
        let records_dir = deploy_dir.join(RECORDS_DIR);
        std::fs::create_dir_all(&records_dir)?;

        let mut records = HashMap::new();
        for entry in std::fs::read_dir(&records_dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(DeployError::from)
                .and_then(|bytes| {
                    serde_json::from_slice::<DeployRecord>(&bytes).map_err(DeployError::from)
                });
            match parsed {
                Ok(record) => {
                    records.insert(record.device_id.clone(), record);
                }
                Err(e) => tracing::warn!("Skipping deploy record {}: {e}", path.display()),
            }
        }
        tracing::debug!(
            "Loaded {} deploy record(s) from {}",
            records.len(),
            records_dir.display()
        );

        Ok(Self {
            deploy_dir,
            records: RwLock::new(records),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of artifacts and records.
    #[must_use]
    pub fn deploy_dir(&self) -> &Path {
        &self.deploy_dir
    }

    /// Hash currently recorded for a device.
    #[must_use]
    pub fn current_hash(&self, device_id: &str) -> Option<String> {
        self.record(device_id).map(|r| r.hash)
    }

    /// Current record of a device.
    #[must_use]
    pub fn record(&self, device_id: &str) -> Option<DeployRecord> {
        let records = self
            .records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.get(device_id).cloned()
    }

    /// Compare an artifact with the device's recorded hash without writing.
    #[must_use]
    pub fn preview(&self, device_id: &str, artifact: CompiledArtifact) -> PreviewOutcome {
        let current_hash = self.current_hash(device_id);
        let changed = current_hash.as_deref() != Some(artifact.hash.as_str());
        PreviewOutcome {
            artifact,
            current_hash,
            changed,
        }
    }

    /// Deploy an artifact to a device.
    ///
    /// With `expected_hash` supplied, the deploy only proceeds if it matches
    /// the recorded hash. Omitting it deploys unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Conflict`] on a hash mismatch (nothing is
    /// written), or an I/O or serialization error if the commit fails.
    #[tracing::instrument(name = "deploy", skip(self, device, artifact), fields(device_id = %device.device_id, hash = %artifact.hash))]
    pub async fn deploy(
        &self,
        device: &DeviceSummary,
        artifact: &CompiledArtifact,
        expected_hash: Option<&str>,
    ) -> Result<DeployOutcome, DeployError> {
        let lock = self.device_lock(&device.device_id);
        let _guard = lock.lock().await;

        let current = self.record(&device.device_id);
        let previous_hash = current.as_ref().map(|r| r.hash.clone());
        if let Some(expected) = expected_hash {
            let matches = match &previous_hash {
                Some(current) => current == expected,
                None => expected.is_empty(),
            };
            if !matches {
                tracing::info!("Deploy rejected: expected {expected}");
                return Err(DeployError::Conflict {
                    expected: expected.to_string(),
                    current: previous_hash,
                });
            }
        }

        if let Some(record) = current.as_ref().filter(|r| r.hash == artifact.hash) {
            tracing::debug!("Artifact already deployed");
            return Ok(DeployOutcome {
                path: record.path.clone(),
                hash: artifact.hash.clone(),
                previous_hash,
                changed: false,
            });
        }

        let artifact_dir = self.deploy_dir.join(sanitize_component(&device.device_id));
        tokio::fs::create_dir_all(&artifact_dir).await?;
        let path = artifact_dir.join(format!("{}.yaml", artifact.hash));
        write_atomic(&path, artifact.bytes()).await?;

        let record = DeployRecord {
            device_id: device.device_id.clone(),
            hash: artifact.hash.clone(),
            path: path.clone(),
            deployed_at_ms: current_timestamp_ms(),
        };
        let record_path = self
            .deploy_dir
            .join(RECORDS_DIR)
            .join(format!("{}.json", sanitize_component(&device.device_id)));
        write_atomic(&record_path, &serde_json::to_vec_pretty(&record)?).await?;

        let prune = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            records.insert(device.device_id.clone(), record);
            // Never delete a file another record still points at.
            current
                .filter(|old| old.path != path)
                .filter(|old| !records.values().any(|r| r.path == old.path))
        };

        if let Some(old) = prune {
            if let Err(e) = tokio::fs::remove_file(&old.path).await {
                tracing::debug!("Could not prune {}: {e}", old.path.display());
            }
        }

        tracing::info!("Deployed artifact to {}", path.display());
        Ok(DeployOutcome {
            path,
            hash: artifact.hash.clone(),
            previous_hash,
            changed: true,
        })
    }

    fn device_lock(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(device_id.to_string()).or_default())
    }
}

/// Write to a temp file in the same directory, fsync, then rename over
/// `path`. The temp file is removed if any step fails.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DeployError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Keep a path component inside its parent directory.
fn sanitize_component(s: &str) -> String {
    let out: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// Get the current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| {
        // Timestamp will not exceed u64 max for millennia
        #[allow(clippy::cast_possible_truncation)]
        {
            d.as_millis() as u64
        }
    })
}
