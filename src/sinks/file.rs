use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::agents::executor::ExecutionResult;
use crate::error::{ButlerError, Result};
use crate::sinks::ResultSink;

/// Appends each result as one JSON line to `<dir>/<agent>/<YYYY-MM-DD>.jsonl`.
pub struct JsonlResultSink {
    output_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlResultSink {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn file_path(&self, result: &ExecutionResult) -> PathBuf {
        let date_str = result.finished_at.format("%Y-%m-%d").to_string();
        self.output_dir
            .join(&result.agent)
            .join(format!("{}.jsonl", date_str))
    }

    fn ensure_directory_exists(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ButlerError::StorageError(format!("Failed to create directory: {}", e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for JsonlResultSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn deliver(&self, result: &ExecutionResult) -> Result<()> {
        let mut line = serde_json::to_string(result)
            .map_err(|e| ButlerError::StorageError(format!("JSON serialization failed: {}", e)))?;
        line.push('\n');

        let file_path = self.file_path(result);
        let _guard = self.write_lock.lock().await;
        Self::ensure_directory_exists(&file_path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .map_err(|e| ButlerError::StorageError(format!("Failed to open file: {}", e)))?;

        file.write_all(line.as_bytes())
            .map_err(|e| ButlerError::StorageError(format!("Failed to write result: {}", e)))?;
        file.flush()
            .map_err(|e| ButlerError::StorageError(format!("Failed to flush file: {}", e)))?;

        debug!("Appended result {} to {}", result.run_id, file_path.display());
        Ok(())
    }
}
