//! Persistence backend: the durable home of the user directory and the
//! worker collection.
//!
//! Backend failures at startup are fatal; steady-state save failures are
//! logged by callers and retried on the next flush.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::{Credentials, Worker};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, ServerError};

pub trait Backend: Send + Sync {
    /// Prepares the storage location; called once before serving traffic.
    fn create_schema(&self) -> Result<()>;
    fn load_users(&self) -> Result<Vec<Credentials>>;
    /// Commits a new credential. Returns false when the username is taken.
    fn add_user(&self, credentials: &Credentials) -> Result<bool>;
    /// Exact-match credential check.
    fn verify_user(&self, credentials: &Credentials) -> Result<bool>;
    fn load_collection(&self) -> Result<Vec<Worker>>;
    fn save_collection(&self, workers: &[Worker]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    users: Vec<Credentials>,
    workers: Vec<Worker>,
}

/// JSON file backend. The file holds both the user directory and the last
/// saved collection; writes go through a temp file and rename so a crashed
/// save never leaves a torn snapshot behind.
pub struct FileBackend {
    path: PathBuf,
    csv_mirror: Option<PathBuf>,
    state: Mutex<SnapshotFile>,
}

impl FileBackend {
    pub fn new(path: PathBuf, csv_mirror: Option<PathBuf>) -> Self {
        FileBackend {
            path,
            csv_mirror,
            state: Mutex::new(SnapshotFile::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SnapshotFile>> {
        self.state
            .lock()
            .map_err(|_| ServerError::Persistence("backend state lock poisoned".to_string()))
    }

    fn read_file(&self) -> Result<SnapshotFile> {
        let text = fs::read_to_string(&self.path)?;
        serde_json::from_str(&text)
            .map_err(|e| ServerError::Persistence(format!("corrupt data file {:?}: {}", self.path, e)))
    }

    fn write_file(&self, snapshot: &SnapshotFile) -> Result<()> {
        let text = serde_json::to_string_pretty(snapshot)
            .map_err(|e| ServerError::Persistence(format!("encoding snapshot failed: {}", e)))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn create_schema(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if self.path.exists() {
            let loaded = self.read_file()?;
            info!(
                "data file {:?} holds {} users and {} workers",
                self.path,
                loaded.users.len(),
                loaded.workers.len()
            );
            *self.lock()? = loaded;
        } else {
            info!("creating data file {:?}", self.path);
            self.write_file(&SnapshotFile::default())?;
        }
        Ok(())
    }

    fn load_users(&self) -> Result<Vec<Credentials>> {
        Ok(self.lock()?.users.clone())
    }

    fn add_user(&self, credentials: &Credentials) -> Result<bool> {
        let mut state = self.lock()?;
        if state
            .users
            .iter()
            .any(|u| u.username == credentials.username)
        {
            return Ok(false);
        }
        state.users.push(credentials.clone());
        self.write_file(&state)?;
        Ok(true)
    }

    fn verify_user(&self, credentials: &Credentials) -> Result<bool> {
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .any(|u| u.username == credentials.username && u.secret == credentials.secret))
    }

    fn load_collection(&self) -> Result<Vec<Worker>> {
        Ok(self.lock()?.workers.clone())
    }

    fn save_collection(&self, workers: &[Worker]) -> Result<()> {
        let mut state = self.lock()?;
        state.workers = workers.to_vec();
        self.write_file(&state)?;
        if let Some(mirror) = &self.csv_mirror {
            // The mirror is a human-inspectable copy, never read back; a
            // failed mirror write must not fail the flush.
            if let Err(e) = write_csv_mirror(mirror, &state.workers) {
                warn!("csv mirror write to {:?} failed: {}", mirror, e);
            }
        }
        Ok(())
    }
}

pub const CSV_HEADER: &str =
    "id,name,x,y,salary,end_date,created_at,position,status,organization,org_type,annual_turnover,street,postal_code";

fn write_csv_mirror(path: &Path, workers: &[Worker]) -> Result<()> {
    let mut lines = Vec::with_capacity(workers.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for w in workers {
        let address = w.organization.address.as_ref();
        lines.push(format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            w.id,
            w.name,
            w.coordinates.x,
            w.coordinates.y,
            w.salary,
            w.end_date.map(|d| d.to_string()).unwrap_or_default(),
            w.created_at.to_rfc3339(),
            w.position,
            w.status,
            w.organization.name,
            w.organization
                .org_type
                .map(|t| t.to_string())
                .unwrap_or_default(),
            w.organization
                .annual_turnover
                .map(|t| t.to_string())
                .unwrap_or_default(),
            address.and_then(|a| a.street.clone()).unwrap_or_default(),
            address.and_then(|a| a.postal_code.clone()).unwrap_or_default(),
        ));
    }
    fs::write(path, lines.join("\n") + "\n")?;
    Ok(())
}

/// In-memory backend for tests and ephemeral runs: same contract as
/// `FileBackend`, nothing touches disk.
#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<HashMap<String, String>>,
    workers: Mutex<Vec<Worker>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn create_schema(&self) -> Result<()> {
        Ok(())
    }

    fn load_users(&self) -> Result<Vec<Credentials>> {
        let users = self
            .users
            .lock()
            .map_err(|_| ServerError::Persistence("user lock poisoned".to_string()))?;
        Ok(users
            .iter()
            .map(|(username, secret)| Credentials {
                username: username.clone(),
                secret: secret.clone(),
            })
            .collect())
    }

    fn add_user(&self, credentials: &Credentials) -> Result<bool> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| ServerError::Persistence("user lock poisoned".to_string()))?;
        if users.contains_key(&credentials.username) {
            return Ok(false);
        }
        users.insert(credentials.username.clone(), credentials.secret.clone());
        Ok(true)
    }

    fn verify_user(&self, credentials: &Credentials) -> Result<bool> {
        let users = self
            .users
            .lock()
            .map_err(|_| ServerError::Persistence("user lock poisoned".to_string()))?;
        Ok(users.get(&credentials.username) == Some(&credentials.secret))
    }

    fn load_collection(&self) -> Result<Vec<Worker>> {
        let workers = self
            .workers
            .lock()
            .map_err(|_| ServerError::Persistence("worker lock poisoned".to_string()))?;
        Ok(workers.clone())
    }

    fn save_collection(&self, workers: &[Worker]) -> Result<()> {
        let mut stored = self
            .workers
            .lock()
            .map_err(|_| ServerError::Persistence("worker lock poisoned".to_string()))?;
        *stored = workers.to_vec();
        Ok(())
    }
}
