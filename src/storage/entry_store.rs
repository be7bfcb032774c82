use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::warn;

use crate::{engine::error::EngineError, engine::session::entry::TimeEntry, fs::operations::seek_line_backwards};

/// Session persistence. At most one open entry (no end time) may exist per
/// user; the store refuses to append a second one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeEntryStore: Send + Sync + 'static {
    async fn get_open(&self, user_id: &str) -> Result<Option<TimeEntry>>;

    /// Persists a freshly started entry.
    async fn append_open(&self, entry: &TimeEntry) -> Result<()>;

    /// Replaces the stored open entry with its completed version.
    async fn complete(&self, entry: &TimeEntry) -> Result<()>;

    async fn history(&self, user_id: &str) -> Result<Vec<TimeEntry>>;
}

/// JSON-lines realization of [TimeEntryStore]. Completed entries are append
/// only history; the open entry is always the final line and gets overwritten
/// in place on completion.
pub struct TimeEntryStoreImpl {
    path: PathBuf,
}

impl TimeEntryStoreImpl {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("sessions.jsonl"),
        })
    }

    async fn open_file(&self) -> Result<File> {
        Ok(File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?)
    }

    async fn read_all(&self) -> Result<Vec<TimeEntry>> {
        let mut file = match File::open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content).await;
        file.unlock_async().await?;
        read?;

        let mut entries = vec![];
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TimeEntry>(line) {
                Ok(v) => entries.push(v),
                Err(e) => {
                    // Might happen after a crash mid write.
                    warn!("Skipping corrupted session line: {e}")
                }
            }
        }
        Ok(entries)
    }

    /// Reads the trailing line and leaves the cursor at its start.
    async fn last_line(file: &mut File) -> Result<String> {
        file.seek(std::io::SeekFrom::End(0)).await?;
        seek_line_backwards(file, &mut vec![0; 1024]).await?;
        let position = file.stream_position().await?;
        let mut line = String::new();
        file.read_to_string(&mut line).await?;
        file.seek(std::io::SeekFrom::Start(position)).await?;
        Ok(line)
    }
}

#[async_trait]
impl TimeEntryStore for TimeEntryStoreImpl {
    async fn get_open(&self, user_id: &str) -> Result<Option<TimeEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|entry| entry.is_open() && entry.user_id.as_ref() == user_id))
    }

    async fn append_open(&self, entry: &TimeEntry) -> Result<()> {
        let mut file = self.open_file().await?;
        file.lock_exclusive()?;

        let result = async {
            let last = Self::last_line(&mut file).await?;
            if let Ok(previous) = serde_json::from_str::<TimeEntry>(&last) {
                if previous.is_open() {
                    return Err(EngineError::Conflict(format!(
                        "time entry {} is still open",
                        previous.id
                    ))
                    .into());
                }
            }
            file.seek(std::io::SeekFrom::End(0)).await?;
            let mut buffer = serde_json::to_vec(entry)?;
            buffer.push(b'\n');
            file.write_all(&buffer).await?;
            file.flush().await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        file.unlock_async().await?;
        result
    }

    async fn complete(&self, entry: &TimeEntry) -> Result<()> {
        if entry.is_open() {
            return Err(anyhow!("completed entry must carry an end time"));
        }
        let mut file = self.open_file().await?;
        file.lock_exclusive()?;

        let result = async {
            let last = Self::last_line(&mut file).await?;
            let previous = serde_json::from_str::<TimeEntry>(&last)
                .map_err(|e| anyhow!("trailing session line is corrupted: {e}"))?;
            if previous.id != entry.id {
                return Err(anyhow!(
                    "open entry {} doesn't match completed entry {}",
                    previous.id,
                    entry.id
                ));
            }

            let position = file.stream_position().await?;
            let mut buffer = serde_json::to_vec(entry)?;
            buffer.push(b'\n');
            file.write_all(&buffer).await?;
            file.set_len(position + buffer.len() as u64).await?;
            file.flush().await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        file.unlock_async().await?;
        result
    }

    async fn history(&self, user_id: &str) -> Result<Vec<TimeEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|entry| entry.user_id.as_ref() == user_id)
            .collect())
    }
}
