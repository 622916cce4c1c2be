//! Durable execution progress
//!
//! One pretty-printed JSON file per execution, named
//! `checkpoint_{execution_id}.json`. Saves write a temp file and rename it
//! over the previous version. Writers of the same file are serialized
//! process-wide, whichever store instance they go through. Missing or
//! unparseable files read back as "no checkpoint".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{BatchOutcome, Fields};

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".json";

type FileLocks = std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static FILE_LOCKS: LazyLock<FileLocks> = LazyLock::new(Default::default);

/// Exclusive access to one checkpoint file across every store in the process
async fn lock_file(path: &Path) -> OwnedMutexGuard<()> {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let lock = FILE_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_default()
        .clone();
    lock.lock_owned().await
}

/// `source_state` key holding the number of logical records consumed
pub const OFFSET_KEY: &str = "offset";

/// Progress of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stable key of the execution
    pub execution_id: String,
    /// Pipeline that owns the execution
    pub pipeline_name: String,
    /// Configured source type
    pub source_type: String,
    /// Configured destination type
    pub destination_type: String,
    /// When the execution first started
    pub started_at: DateTime<Utc>,
    /// Time of the last save; never moves backwards
    pub updated_at: DateTime<Utc>,
    /// Id of the last record of the last settled batch
    #[serde(default)]
    pub last_processed_record_id: String,
    /// Records dispatched so far (`success_count + error_count`)
    pub total_processed: u64,
    /// Records the destination accepted
    pub success_count: u64,
    /// Records the destination rejected
    pub error_count: u64,
    /// Source resume state
    #[serde(default)]
    pub source_state: Fields,
    /// Destination resume state
    #[serde(default)]
    pub destination_state: Fields,
    /// Free-form counters and notes
    #[serde(default)]
    pub metadata: Fields,
}

impl Checkpoint {
    /// A fresh checkpoint for a new execution
    pub fn new(
        execution_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        source_type: impl Into<String>,
        destination_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            pipeline_name: pipeline_name.into(),
            source_type: source_type.into(),
            destination_type: destination_type.into(),
            started_at: now,
            updated_at: now,
            last_processed_record_id: String::new(),
            total_processed: 0,
            success_count: 0,
            error_count: 0,
            source_state: Fields::new(),
            destination_state: Fields::new(),
            metadata: Fields::new(),
        }
    }

    /// Fold a settled batch into the running totals
    pub fn record_batch(&mut self, batch: &BatchOutcome, last_record_id: &str) {
        self.total_processed += batch.total as u64;
        self.success_count += batch.success_count as u64;
        self.error_count += batch.error_count as u64;
        if !last_record_id.is_empty() {
            self.last_processed_record_id = last_record_id.to_string();
        }
    }

    /// Where a resumed source should start: the stored offset, else the
    /// number of processed records
    pub fn resume_offset(&self) -> u64 {
        self.source_state
            .get(OFFSET_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(self.total_processed)
    }

    /// Store the number of logical source records consumed
    pub fn set_offset(&mut self, offset: u64) {
        self.source_state.insert(OFFSET_KEY.to_string(), offset.into());
    }

    /// Read a numeric metadata counter, zero when absent
    pub fn counter(&self, key: &str) -> u64 {
        self.metadata.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Set a numeric metadata counter
    pub fn set_counter(&mut self, key: &str, value: u64) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// A fresh, globally unique execution id
pub fn generate_execution_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Checkpoint files in one directory
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// A store rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the checkpoint files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `execution_id`
    pub fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{execution_id}{FILE_SUFFIX}"))
    }

    fn check_id(execution_id: &str) -> Result<()> {
        if execution_id.is_empty()
            || execution_id.contains(['/', '\\'])
            || execution_id.contains("..")
        {
            return Err(Error::configuration(
                "checkpoint",
                format!("invalid execution id '{execution_id}'"),
            ));
        }
        Ok(())
    }

    /// Persist `checkpoint`, stamping `updated_at` just before writing
    pub async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        Self::check_id(&checkpoint.execution_id)?;
        let path = self.path_for(&checkpoint.execution_id);
        let _guard = lock_file(&path).await;

        fs::create_dir_all(&self.dir).await?;

        checkpoint.updated_at = Utc::now().max(checkpoint.updated_at);
        let json = serde_json::to_string_pretty(checkpoint)?;

        let temp_path = path.with_extension(format!(
            "json.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&temp_path, json.as_bytes()).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            execution_id = %checkpoint.execution_id,
            total_processed = checkpoint.total_processed,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the checkpoint of `execution_id`, `None` when missing or corrupt
    pub async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>> {
        Self::check_id(execution_id)?;
        let path = self.path_for(execution_id);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint unreadable, ignoring");
                return Ok(None);
            }
        };

        match serde_json::from_str(&contents) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint corrupt, ignoring");
                Ok(None)
            }
        }
    }

    /// Every parseable checkpoint, most recently updated first
    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)) {
                continue;
            }
            let parsed = fs::read_to_string(entry.path())
                .await
                .map_err(Error::from)
                .and_then(|s| serde_json::from_str::<Checkpoint>(&s).map_err(Error::from));
            match parsed {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => debug!(file = name, error = %e, "skipping unparseable checkpoint"),
            }
        }

        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints)
    }

    /// Remove the checkpoint of `execution_id`; returns whether one existed
    pub async fn delete(&self, execution_id: &str) -> Result<bool> {
        Self::check_id(execution_id)?;
        let path = self.path_for(execution_id);
        let _guard = lock_file(&path).await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(execution_id, "checkpoint deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
