//! Session persistence.
//!
//! The store is the durability boundary of a session: the engine writes
//! through on every identity-changing mutation and never caches on top of it.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wc_core::{FullyQualifiedConfig, PeerIdentity};
use wc_crypto::SymmetricKey;

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionRole {
    /// Sent the session request (dapp).
    Offerer,
    /// Received the session request and approves it (wallet).
    Approver,
}

/// Durable state of one session, keyed by its handshake topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionState {
    pub config: FullyQualifiedConfig,
    pub client: PeerIdentity,
    #[serde(default)]
    pub peer: Option<PeerIdentity>,
    #[serde(default)]
    pub handshake_id: Option<u64>,
    pub current_key: SymmetricKey,
    #[serde(default)]
    pub next_key: Option<SymmetricKey>,
    #[serde(default)]
    pub approved_accounts: Option<Vec<String>>,
    #[serde(default)]
    pub chain_id: Option<i64>,
    #[serde(default)]
    pub role: Option<SessionRole>,
}

pub trait SessionStore: Send + Sync {
    fn load(&self, topic: &str) -> wc_common::Result<Option<PersistedSessionState>>;

    /// Durable before return.
    fn store(&self, topic: &str, state: PersistedSessionState) -> wc_common::Result<()>;

    fn remove(&self, topic: &str) -> wc_common::Result<()>;

    fn list(&self) -> wc_common::Result<Vec<PersistedSessionState>>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    states: RwLock<HashMap<String, PersistedSessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, topic: &str) -> wc_common::Result<Option<PersistedSessionState>> {
        Ok(self.states.read().get(topic).cloned())
    }

    fn store(&self, topic: &str, state: PersistedSessionState) -> wc_common::Result<()> {
        self.states.write().insert(topic.to_string(), state);
        Ok(())
    }

    fn remove(&self, topic: &str) -> wc_common::Result<()> {
        self.states.write().remove(topic);
        Ok(())
    }

    fn list(&self) -> wc_common::Result<Vec<PersistedSessionState>> {
        Ok(self.states.read().values().cloned().collect())
    }
}

/// JSON file holding `{handshakeTopic: PersistedSessionState}`.
///
/// The whole map is rewritten on every mutation (temp file + rename). An
/// empty or unreadable file on open starts from an empty map.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    states: Mutex<BTreeMap<String, PersistedSessionState>>,
}

impl FileSessionStore {
    pub fn open(path: impl AsRef<Path>) -> wc_common::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let states = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(states) => states,
                Err(err) => {
                    warn!("Ignoring unreadable session store {}: {}", path.display(), err);
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(wc_common::Error::io(&path, err)),
        };
        debug!("Opened session store {} ({} sessions)", path.display(), states.len());

        Ok(Self {
            path,
            states: Mutex::new(states),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, states: &BTreeMap<String, PersistedSessionState>) -> wc_common::Result<()> {
        let json = serde_json::to_vec_pretty(states)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|err| wc_common::Error::io(&tmp, err))?;
        fs::rename(&tmp, &self.path).map_err(|err| wc_common::Error::io(&self.path, err))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, topic: &str) -> wc_common::Result<Option<PersistedSessionState>> {
        Ok(self.states.lock().get(topic).cloned())
    }

    fn store(&self, topic: &str, state: PersistedSessionState) -> wc_common::Result<()> {
        let mut states = self.states.lock();
        states.insert(topic.to_string(), state);
        self.write(&states)
    }

    fn remove(&self, topic: &str) -> wc_common::Result<()> {
        let mut states = self.states.lock();
        if states.remove(topic).is_some() {
            self.write(&states)?;
        }
        Ok(())
    }

    fn list(&self) -> wc_common::Result<Vec<PersistedSessionState>> {
        Ok(self.states.lock().values().cloned().collect())
    }
}
