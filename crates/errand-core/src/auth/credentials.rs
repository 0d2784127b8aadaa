//! Persistent storage for the access/refresh credential pair.
//!
//! The pair is always handled as one JSON document so that no reader, in
//! memory or on disk, can see a fresh access token next to a stale refresh
//! token.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "errand";

/// Keychain account under which the pair is stored
const KEYRING_ACCOUNT: &str = "session";

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

/// Short-lived access token plus the refresh token it was issued with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// Both halves present; the API never issues empty tokens.
    pub fn is_complete(&self) -> bool {
        !self.access.is_empty() && !self.refresh.is_empty()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Durable home of the credential pair.
pub trait TokenBackend: Send + Sync {
    fn read(&self) -> Result<Option<CredentialPair>>;
    fn write(&self, pair: &CredentialPair) -> Result<()>;
    fn erase(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Stores the pair in `session.json`, replacing it via rename.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenBackend for FileBackend {
    fn read(&self) -> Result<Option<CredentialPair>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let pair = serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(pair))
    }

    fn write(&self, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(pair)?;
        let tmp = self.path.with_extension("json.tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)
                .context("Failed to create session file")?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        #[cfg(not(unix))]
        std::fs::write(&tmp, contents).context("Failed to create session file")?;

        std::fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete session file"),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Stores the pair as a single OS keychain entry.
pub struct KeyringBackend {
    service: String,
    account: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_names(SERVICE_NAME, KEYRING_ACCOUNT)
    }

    pub fn with_names(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBackend for KeyringBackend {
    fn read(&self) -> Result<Option<CredentialPair>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let pair =
                    serde_json::from_str(&secret).context("Failed to parse keychain session")?;
                Ok(Some(pair))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn write(&self, pair: &CredentialPair) -> Result<()> {
        let secret = serde_json::to_string(pair)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store session in keychain")
    }

    fn erase(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// Non-durable backend; forgets everything with the process.
#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<CredentialPair>>,
}

impl TokenBackend for MemoryBackend {
    fn read(&self) -> Result<Option<CredentialPair>> {
        Ok(self.slot.lock().clone())
    }

    fn write(&self, pair: &CredentialPair) -> Result<()> {
        *self.slot.lock() = Some(pair.clone());
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Process-wide owner of the stored session state.
///
/// Reads are served from an in-memory snapshot that every write replaces as
/// a whole. Writers are serialized by a separate persist lock held across
/// the snapshot swap and the backend write, so the persisted document always
/// ends up matching the last snapshot while readers only ever wait for the
/// swap itself.
///
/// Each `clear()` advances the *sign-out epoch*, published through a
/// `watch` channel. Writers acting on behalf of an earlier pair use
/// [`save_if_refresh`](Self::save_if_refresh) and
/// [`clear_if_refresh`](Self::clear_if_refresh), which only apply while that
/// pair is still the stored one.
pub struct CredentialStore {
    backend: Box<dyn TokenBackend>,
    current: RwLock<Option<CredentialPair>>,
    persist: Mutex<()>,
    epoch: watch::Sender<u64>,
}

impl CredentialStore {
    /// Open a store, seeding it from whatever the backend holds.
    pub fn open(backend: Box<dyn TokenBackend>) -> Self {
        let current = match backend.read() {
            Ok(Some(pair)) if pair.is_complete() => Some(pair),
            Ok(Some(_)) => {
                warn!(backend = backend.name(), "Ignoring incomplete stored credentials");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Failed to load stored credentials");
                None
            }
        };
        debug!(backend = backend.name(), has_credentials = current.is_some(), "Credential store opened");

        let (epoch, _) = watch::channel(0);
        Self {
            backend,
            current: RwLock::new(current),
            persist: Mutex::new(()),
            epoch,
        }
    }

    pub fn in_memory() -> Self {
        Self::open(Box::<MemoryBackend>::default())
    }

    /// Replace both tokens as one unit.
    pub fn save(&self, pair: CredentialPair) {
        let _persist = self.persist.lock();
        *self.current.write() = Some(pair.clone());
        self.write_backend(&pair);
    }

    /// Replace the pair only while the stored refresh token is still
    /// `exchanged`. Returns whether the pair was stored.
    pub fn save_if_refresh(&self, pair: CredentialPair, exchanged: &str) -> bool {
        let _persist = self.persist.lock();
        {
            let mut current = self.current.write();
            if current.as_ref().map(|p| p.refresh.as_str()) != Some(exchanged) {
                return false;
            }
            *current = Some(pair.clone());
        }
        self.write_backend(&pair);
        true
    }

    /// Remove both tokens. Idempotent.
    pub fn clear(&self) {
        let _persist = self.persist.lock();
        *self.current.write() = None;
        self.erase_backend();
    }

    /// Remove both tokens only while the stored refresh token is still
    /// `exchanged` (`None`: nothing stored). Returns whether the store was
    /// cleared.
    pub fn clear_if_refresh(&self, exchanged: Option<&str>) -> bool {
        let _persist = self.persist.lock();
        {
            let mut current = self.current.write();
            if current.as_ref().map(|p| p.refresh.as_str()) != exchanged {
                return false;
            }
            *current = None;
        }
        self.erase_backend();
        true
    }

    /// Snapshot of the full pair.
    pub fn load(&self) -> Option<CredentialPair> {
        self.current.read().clone()
    }

    pub fn load_access(&self) -> Option<String> {
        self.current.read().as_ref().map(|p| p.access.clone())
    }

    pub fn load_refresh(&self) -> Option<String> {
        self.current.read().as_ref().map(|p| p.refresh.clone())
    }

    pub fn has_credentials(&self) -> bool {
        self.current.read().is_some()
    }

    /// Current sign-out epoch.
    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    /// Notified after every clear.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    /// Number of live [`subscribe`](Self::subscribe) receivers.
    pub fn subscribers(&self) -> usize {
        self.epoch.receiver_count()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // Persistence failures leave the in-memory state authoritative.
    fn write_backend(&self, pair: &CredentialPair) {
        if let Err(e) = self.backend.write(pair) {
            warn!(backend = self.backend.name(), error = %e, "Failed to persist credentials");
        }
    }

    fn erase_backend(&self) {
        if let Err(e) = self.backend.erase() {
            warn!(backend = self.backend.name(), error = %e, "Failed to erase stored credentials");
        }
        self.epoch.send_modify(|epoch| *epoch += 1);
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.backend.name())
            .field("has_credentials", &self.has_credentials())
            .field("epoch", &self.epoch())
            .finish()
    }
}
