//! Durable, versioned storage for the risk-criteria prompt.
//!
//! The store owns one JSON file. Every operation runs under a single async
//! mutex, and every write goes to a sibling temp file that is synced and then
//! renamed over the target, so readers only ever see a complete prompt.

use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Criteria used until someone edits the prompt
pub const DEFAULT_PROMPT: &str = "The baby is not visible in the frame";

/// Upper bound on prompt length in characters
pub const MAX_PROMPT_CHARS: usize = 1000;

/// The persisted risk criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPrompt {
    pub version: u64,
    pub text: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default, alias = "default_flag")]
    pub is_default: bool,
}

impl RiskPrompt {
    fn initial() -> Self {
        Self {
            version: 1,
            text: DEFAULT_PROMPT.to_string(),
            updated_at: Utc::now(),
            updated_by: None,
            is_default: true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.version == 0 {
            return Err(MonitorError::validation("Prompt version must be at least 1"));
        }
        validate_text(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptHistoryEntry {
    pub version: u64,
    pub text: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl From<&RiskPrompt> for PromptHistoryEntry {
    fn from(prompt: &RiskPrompt) -> Self {
        Self {
            version: prompt.version,
            text: prompt.text.clone(),
            updated_at: prompt.updated_at,
            updated_by: prompt.updated_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptHistory {
    pub entries: Vec<PromptHistoryEntry>,
}

fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(MonitorError::validation("Prompt text cannot be empty"));
    }
    let chars = text.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(MonitorError::validation(format!(
            "Prompt text is {} characters; the limit is {}",
            chars, MAX_PROMPT_CHARS
        )));
    }
    Ok(())
}

/// Process-local, mutually exclusive access to the prompt file
pub struct PromptStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PromptStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current prompt, creating the default one on first use
    pub async fn load(&self) -> Result<RiskPrompt> {
        let _guard = self.lock.lock().await;
        self.load_unlocked().await
    }

    /// Replace the prompt text, bumping the version by one
    pub async fn update(&self, text: &str, updated_by: Option<&str>) -> Result<RiskPrompt> {
        let text = text.trim();
        validate_text(text)?;

        let _guard = self.lock.lock().await;
        let current = self.load_unlocked().await?;
        let next = RiskPrompt {
            version: current.version + 1,
            text: text.to_string(),
            updated_at: Utc::now(),
            updated_by: updated_by.map(str::to_string),
            is_default: false,
        };
        self.write(&next).await?;

        info!(
            "Risk prompt updated to v{} (by {})",
            next.version,
            next.updated_by.as_deref().unwrap_or("anonymous")
        );
        Ok(next)
    }

    /// Most recent prompt versions, newest first.
    ///
    /// Only the current version is kept on disk, so this never returns more
    /// than one entry.
    pub async fn history(&self, limit: usize) -> Result<PromptHistory> {
        if limit == 0 {
            return Ok(PromptHistory::default());
        }
        let prompt = self.load().await?;
        Ok(PromptHistory {
            entries: vec![PromptHistoryEntry::from(&prompt)],
        })
    }

    async fn load_unlocked(&self) -> Result<RiskPrompt> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let prompt: RiskPrompt = serde_json::from_slice(&bytes)?;
                prompt.check()?;
                debug!("Loaded risk prompt v{} from {}", prompt.version, self.path.display());
                Ok(prompt)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let prompt = RiskPrompt::initial();
                self.write(&prompt).await?;
                info!("Created default risk prompt at {}", self.path.display());
                Ok(prompt)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, prompt: &RiskPrompt) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let payload = serde_json::to_vec_pretty(prompt)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;
        debug!("Persisted risk prompt v{} to {}", prompt.version, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PromptStore {
        PromptStore::new(dir.path().join("data").join("risk_prompt.json"))
    }

    #[tokio::test]
    async fn test_load_creates_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let prompt = store.load().await.unwrap();

        assert_eq!(prompt.version, 1);
        assert_eq!(prompt.text, DEFAULT_PROMPT);
        assert!(prompt.is_default);
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let first = store.load().await.unwrap();
        let second = store.load().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_increments_version() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.load().await.unwrap();

        let updated = store
            .update("Keep baby away from stairs", Some("tester"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert!(!updated.is_default);

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.text, "Keep baby away from stairs");
        assert_eq!(persisted.updated_by.as_deref(), Some("tester"));
        assert_eq!(persisted.version, 2);
    }

    #[tokio::test]
    async fn test_update_without_prior_load_starts_from_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let updated = store.update("  Blanket over the face  ", None).await.unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.text, "Blanket over the face");
    }

    #[tokio::test]
    async fn test_blank_update_is_rejected_and_version_kept() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.update("Crib rail lowered", None).await.unwrap();

        for blank in ["", "   ", "\n\t "] {
            let err = store.update(blank, None).await.unwrap_err();
            assert!(matches!(err, MonitorError::Validation { .. }));
        }

        assert_eq!(store.load().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_overlong_update_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let text = "x".repeat(MAX_PROMPT_CHARS + 1);
        let err = store.update(&text, None).await.unwrap_err();
        assert!(matches!(err, MonitorError::Validation { .. }));

        let exact = "y".repeat(MAX_PROMPT_CHARS);
        assert_eq!(store.update(&exact, None).await.unwrap().text, exact);
    }

    #[tokio::test]
    async fn test_concurrent_updates_get_distinct_versions() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));
        store.load().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.update(&format!("criteria {}", i), None).await.unwrap().version
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (2..=17).collect::<Vec<u64>>());
        assert_eq!(store.load().await.unwrap().version, 17);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.update("Window open", None).await.unwrap();

        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_reads_legacy_default_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("risk_prompt.json");
        std::fs::write(
            &path,
            r#"{"version": 3, "text": "Baby standing", "updated_at": "2025-11-18T00:00:00Z", "updated_by": null, "default_flag": false}"#,
        )
        .unwrap();

        let prompt = PromptStore::new(&path).load().await.unwrap();

        assert_eq!(prompt.version, 3);
        assert!(!prompt.is_default);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("risk_prompt.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = PromptStore::new(&path);
        assert!(matches!(store.load().await, Err(MonitorError::Json(_))));
        // The broken file is left for the operator to inspect
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_history_wraps_current_version() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.update("Baby near the edge", Some("parent")).await.unwrap();

        let history = store.history(5).await.unwrap();
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.entries[0].version, 2);
        assert_eq!(history.entries[0].updated_by.as_deref(), Some("parent"));

        assert!(store.history(0).await.unwrap().entries.is_empty());
    }
}
