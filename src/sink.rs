use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SinkError;

/// Persisted form of one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRecord {
    pub title: String,
    pub speaker: String,
    pub context: String,
    pub text: String,
    pub link: String,
}

/// Persisted proceeding metadata (`agenda.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProceedingRecord {
    pub title: String,
    pub agenda: Vec<String>,
    pub link: String,
}

/// Path-addressed JSON output under a single root directory.
#[derive(Debug, Clone)]
pub struct OutputSink {
    root: PathBuf,
}

impl OutputSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn term_dir(&self, term: u32) -> PathBuf {
        self.root.join(format!("term{}", term))
    }

    pub fn agenda_path(&self, term: u32, session: u32) -> PathBuf {
        self.term_dir(term).join(session.to_string()).join("agenda.json")
    }

    pub fn speech_path(&self, term: u32, session: u32, date: &str, num: u32) -> PathBuf {
        self.term_dir(term)
            .join(session.to_string())
            .join(date)
            .join(format!("{}.json", num))
    }

    pub async fn write_agenda(
        &self,
        term: u32,
        session: u32,
        record: &ProceedingRecord,
    ) -> Result<PathBuf, SinkError> {
        let path = self.agenda_path(term, session);
        write_json(&path, record).await?;
        Ok(path)
    }

    pub async fn write_speech(
        &self,
        term: u32,
        session: u32,
        date: &str,
        num: u32,
        record: &SpeechRecord,
    ) -> Result<PathBuf, SinkError> {
        let path = self.speech_path(term, session, date, num);
        write_json(&path, record).await?;
        Ok(path)
    }

    /// Remove everything under the root. Used by `--force` before a fresh crawl.
    pub async fn clear(&self) -> Result<(), SinkError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!("Cleared previous output in {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SinkError::Io { path: self.root.clone(), source }),
        }
    }
}

/// Full overwrite of `path`. Content goes to a sibling temp file first and
/// is renamed into place, so readers never observe a partial document.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io { path: path.to_path_buf(), source };

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    }

    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = match tokio::fs::write(&tmp, &body).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(source));
    }
    debug!("Saved {}", path.display());
    Ok(())
}
