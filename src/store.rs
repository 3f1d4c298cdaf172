//! Persistent token store
//!
//! Persists OAuth tokens and registered-client credentials for every MCP
//! server in a single JSON file under the application's global data
//! directory, so they survive restarts. The file is shared by all providers
//! in the process; every write preserves unrelated entries.
//!
//! There is no cross-process locking: concurrent processes writing the same
//! file may interleave. Single-user, single-process use is assumed.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::oauth::{ClientCredentials, Token};
use crate::{Error, Result};

/// Environment variable overriding the global data directory.
const GLOBAL_DATA_ENV: &str = "CRUSH_GLOBAL_DATA";

/// File name of the store inside the global data directory.
const STORE_FILE: &str = "mcp.json";

/// One MCP server's persisted record: token material plus registered-client
/// credentials. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredEntry {
    /// Access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, as reported at issuance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Absolute expiry as epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Registered or configured client identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Client secret (absent for public clients)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl StoredEntry {
    /// The token held by this entry, if it has one.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        let access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        Some(Token {
            access_token,
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            expires_in: self.expires_in.unwrap_or(0),
            expires_at: self.expires_at,
        })
    }

    /// Overwrite the token fields, leaving client credentials untouched.
    pub fn apply_token(&mut self, token: &Token) {
        self.access_token = Some(token.access_token.clone());
        self.refresh_token = token.refresh_token.clone();
        self.expires_in = (token.expires_in > 0).then_some(token.expires_in);
        self.expires_at = token.expires_at;
    }

    /// Overwrite the client credentials, leaving token fields untouched.
    pub fn apply_credentials(&mut self, creds: &ClientCredentials) {
        self.client_id = Some(creds.client_id.clone());
        self.client_secret = (!creds.client_secret.is_empty()).then(|| creds.client_secret.clone());
    }
}

/// Store for per-server OAuth data, backed by one JSON file.
pub struct TokenStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl TokenStore {
    /// Create a store backed by the given file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: RwLock::new(()),
        }
    }

    /// Create a store at the default location: `$CRUSH_GLOBAL_DATA/mcp.json`
    /// when the host application sets the override, otherwise `mcp.json` in
    /// its platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when no data directory can be determined.
    pub fn default_location() -> Result<Self> {
        let data_dir = match env::var(GLOBAL_DATA_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_local_dir()
                .ok_or_else(|| Error::Store("cannot determine data directory".to_string()))?
                .join("crush"),
        };
        Ok(Self::new(data_dir.join(STORE_FILE)))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the entry for an MCP server.
    ///
    /// Returns `Ok(None)` when the file does not exist or holds no entry for
    /// `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(&self, name: &str) -> Result<Option<StoredEntry>> {
        let _guard = self.lock.read();
        let entries = match self.read_entries()? {
            Some(entries) => entries,
            None => return Ok(None),
        };
        Ok(entries.get(name).cloned())
    }

    /// Persist the entry for an MCP server, preserving all other entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the existing file is unreadable or
    /// corrupt (it is never overwritten in that case), or when the write
    /// fails.
    pub fn save(&self, name: &str, entry: &StoredEntry) -> Result<()> {
        let _guard = self.lock.write();

        let mut entries = self.read_entries()?.unwrap_or_default();
        entries.insert(name.to_string(), entry.clone());

        self.write_entries(&entries)?;
        debug!(name = %name, path = %self.path.display(), "Saved OAuth store entry");
        Ok(())
    }

    /// Remove the entry for an MCP server, preserving all other entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on a corrupt file or a failed write.
    pub fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.lock.write();

        let mut entries = match self.read_entries()? {
            Some(entries) => entries,
            None => return Ok(()),
        };
        if entries.remove(name).is_none() {
            return Ok(());
        }

        self.write_entries(&entries)?;
        debug!(name = %name, "Deleted OAuth store entry");
        Ok(())
    }

    /// Read the whole file. `Ok(None)` when it does not exist.
    fn read_entries(&self) -> Result<Option<BTreeMap<String, StoredEntry>>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Store(format!("failed to read {STORE_FILE}: {e}"))),
        };
        let entries = serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("failed to parse {STORE_FILE}: {e}")))?;
        Ok(Some(entries))
    }

    /// Write the whole file, pretty-printed, with owner-only permissions.
    fn write_entries(&self, entries: &BTreeMap<String, StoredEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_data_dir(parent)
                .map_err(|e| Error::Store(format!("failed to create data directory: {e}")))?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::Store(format!("failed to serialize {STORE_FILE}: {e}")))?;
        fs::write(&self.path, json)
            .map_err(|e| Error::Store(format!("failed to write {STORE_FILE}: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }
}

#[cfg(unix)]
fn create_data_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_data_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}
