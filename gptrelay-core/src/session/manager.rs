//! Session store shared by all conversation handlers

use super::store::Session;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pluggable persistence backend for the session table
pub trait SessionPersistence: Send + Sync {
    /// Load every persisted session
    fn load(&self) -> crate::Result<HashMap<String, Session>>;

    /// Replace the persisted table with `sessions`
    fn save(&self, sessions: &HashMap<String, Session>) -> crate::Result<()>;
}

const FILE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    // BTreeMap keeps the file diff-friendly
    sessions: BTreeMap<String, Session>,
}

/// Sessions stored in a single JSON file, replaced atomically on save
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionPersistence for JsonFilePersistence {
    fn load(&self) -> crate::Result<HashMap<String, Session>> {
        if !self.path.exists() {
            debug!("No session file at {:?}, starting empty", self.path);
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let file: SessionFile = serde_json::from_str(&content).map_err(|e| {
            crate::Error::Persistence(format!("invalid session file {:?}: {}", self.path, e))
        })?;
        if file.version != FILE_FORMAT_VERSION {
            return Err(crate::Error::Persistence(format!(
                "unsupported session file version {} in {:?}",
                file.version, self.path
            )));
        }

        Ok(file.sessions.into_iter().collect())
    }

    fn save(&self, sessions: &HashMap<String, Session>) -> crate::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = SessionFile {
            version: FILE_FORMAT_VERSION,
            sessions: sessions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let temp = self.temp_path();
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Volatile persistence, used by tests and one-shot commands
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<HashMap<String, Session>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: HashMap<String, Session>) -> Self {
        Self {
            saved: Mutex::new(sessions),
        }
    }
}

impl SessionPersistence for MemoryPersistence {
    fn load(&self) -> crate::Result<HashMap<String, Session>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, sessions: &HashMap<String, Session>) -> crate::Result<()> {
        *self.saved.lock() = sessions.clone();
        Ok(())
    }
}

/// Owns every Session record, keyed by session key (`channel:user_id`).
///
/// Each operation is atomic for its key. Callers that read, await and then
/// write must serialize per key themselves.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    save_lock: Mutex<()>,
    persistence: Box<dyn SessionPersistence>,
}

impl SessionStore {
    /// Load all sessions from `persistence`. Fails if the stored state cannot be read.
    pub fn open(persistence: impl SessionPersistence + 'static) -> crate::Result<Self> {
        let mut sessions = persistence.load()?;
        for (key, session) in sessions.iter_mut() {
            if session.normalize() {
                warn!("Dropped parent_id without conversation_id in session {}", key);
            }
        }
        sessions.retain(|_, session| !session.is_pristine());
        debug!("Loaded {} sessions", sessions.len());

        Ok(Self {
            sessions: Mutex::new(sessions),
            save_lock: Mutex::new(()),
            persistence: Box::new(persistence),
        })
    }

    /// An empty store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            save_lock: Mutex::new(()),
            persistence: Box::new(MemoryPersistence::new()),
        }
    }

    /// Current session for `key`, or the default Idle session
    pub fn get(&self, key: &str) -> Session {
        self.sessions.lock().get(key).cloned().unwrap_or_default()
    }

    /// Replace the session for `key`
    pub fn put(&self, key: &str, session: Session) {
        {
            let mut sessions = self.sessions.lock();
            if session.is_pristine() {
                sessions.remove(key);
            } else {
                sessions.insert(key.to_string(), session);
            }
        }
        self.persist();
    }

    /// Reset the session for `key` to its initial value
    pub fn clear(&self, key: &str) {
        let removed = self.sessions.lock().remove(key).is_some();
        if removed {
            self.persist();
        }
    }

    /// All non-default sessions, sorted by key
    pub fn snapshot(&self) -> Vec<(String, Session)> {
        let mut entries: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Keys of all non-default sessions, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current table, surfacing failures (used at shutdown)
    pub fn flush(&self) -> crate::Result<()> {
        let _guard = self.save_lock.lock();
        let snapshot = self.sessions.lock().clone();
        self.persistence.save(&snapshot)
    }

    // The snapshot is taken while holding save_lock, so the last save always
    // carries the newest table.
    fn persist(&self) {
        if let Err(e) = self.flush() {
            warn!("Failed to persist sessions, keeping in-memory state: {}", e);
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .finish()
    }
}
