//! Best-effort diagnostic side channel.
//!
//! Callers enqueue records without waiting; a single consumer task appends
//! the interaction transcript and refreshes the latest frame snapshot. A full
//! queue or a failed write is logged and otherwise ignored.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const TRANSCRIPT_FILE: &str = "llm.log";
const SNAPSHOT_FILE: &str = "short_cut.jpg";

/// One unit of diagnostic output
#[derive(Debug, Clone)]
pub enum Record {
    SessionStart,
    Interaction {
        stage: String,
        model: String,
        system_prompt: String,
        user_prompt: String,
        output: String,
    },
    Snapshot {
        image: Arc<Vec<u8>>,
    },
}

/// Cloneable handle feeding the recorder task
#[derive(Clone)]
pub struct InteractionRecorder {
    sender: Option<mpsc::Sender<Record>>,
    directory: PathBuf,
}

impl InteractionRecorder {
    /// Start the consumer task; must be called inside a Tokio runtime
    pub fn spawn<P: Into<PathBuf>>(directory: P, capacity: usize) -> (Self, JoinHandle<()>) {
        let directory = directory.into();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_writer(directory.clone(), receiver));

        (
            Self {
                sender: Some(sender),
                directory,
            },
            task,
        )
    }

    /// A recorder that drops everything
    pub fn disabled() -> Self {
        Self {
            sender: None,
            directory: PathBuf::new(),
        }
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.directory.join(TRANSCRIPT_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join(SNAPSHOT_FILE)
    }

    /// Queue a record; never blocks and never fails the caller
    pub fn record(&self, record: Record) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Diagnostic recorder queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Diagnostic recorder stopped, dropping record");
            }
        }
    }
}

async fn run_writer(directory: PathBuf, mut receiver: mpsc::Receiver<Record>) {
    if let Err(e) = fs::create_dir_all(&directory).await {
        error!(
            "Failed to create diagnostic directory {}: {}",
            directory.display(),
            e
        );
    }

    while let Some(record) = receiver.recv().await {
        let outcome = match &record {
            Record::Snapshot { image } => {
                fs::write(directory.join(SNAPSHOT_FILE), image.as_slice()).await
            }
            other => append(&directory.join(TRANSCRIPT_FILE), &render(other)).await,
        };

        if let Err(e) = outcome {
            error!("Failed to write diagnostic record: {}", e);
        }
    }

    debug!("Diagnostic recorder task exited");
}

async fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

/// Human-readable transcript block for a record
fn render(record: &Record) -> String {
    match record {
        Record::SessionStart => {
            let separator = "=".repeat(80);
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            format!("\n{separator}\n[{timestamp}] SESSION START\n{separator}\n")
        }
        Record::Interaction {
            stage,
            model,
            system_prompt,
            user_prompt,
            output,
        } => format!(
            "[{stage}]\nModel: {model}\nSystem Prompt: {system_prompt}\nUser Prompt: {user_prompt}\nOutput: {output}\n{}\n",
            "-".repeat(80)
        ),
        Record::Snapshot { image } => format!("[snapshot] {} bytes\n", image.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn interaction(output: &str) -> Record {
        Record::Interaction {
            stage: "1-Stage Vision".to_string(),
            model: "minicpm-v:8b".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
            output: output.to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_reach_disk_in_order() {
        let dir = TempDir::new().unwrap();
        let (recorder, task) = InteractionRecorder::spawn(dir.path().join("temp"), 8);

        recorder.record(Record::SessionStart);
        recorder.record(interaction("YES, baby is standing"));
        recorder.record(Record::Snapshot {
            image: Arc::new(vec![0xFF, 0xD8, 0xFF, 0xD9]),
        });
        let transcript_path = recorder.transcript_path();
        let snapshot_path = recorder.snapshot_path();
        drop(recorder);
        task.await.unwrap();

        let transcript = std::fs::read_to_string(transcript_path).unwrap();
        let session = transcript.find("SESSION START").unwrap();
        let output = transcript.find("Output: YES, baby is standing").unwrap();
        assert!(session < output);
        assert!(transcript.contains(&"-".repeat(80)));

        assert_eq!(std::fs::read(snapshot_path).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let dir = TempDir::new().unwrap();
        let (sender, _receiver) = mpsc::channel(1);
        let recorder = InteractionRecorder {
            sender: Some(sender),
            directory: dir.path().to_path_buf(),
        };

        for _ in 0..10 {
            recorder.record(interaction("NO"));
        }
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();

        let (recorder, task) = InteractionRecorder::spawn(&blocker, 4);
        recorder.record(interaction("NO"));
        drop(recorder);

        task.await.unwrap();
    }

    #[test]
    fn test_disabled_recorder_ignores_records() {
        let recorder = InteractionRecorder::disabled();
        recorder.record(Record::SessionStart);
    }
}
