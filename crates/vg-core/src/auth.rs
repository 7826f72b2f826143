//! Process-wide node API credentials
//!
//! The orchestrator holds one set of node credentials. [`AuthContext`] gives
//! them an explicit lifecycle: loaded once at startup from a 0600 JSON file,
//! read by every node client per request, and invalidated as a whole when a
//! node reports them as rejected. Components that cache anything derived from
//! the credentials subscribe to state changes instead of polling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

use crate::error::{ConfigError, VgError};

/// Node API credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User the credentials belong to (`root@pam`)
    pub username: String,
    /// API token id (`user@realm!name`)
    #[serde(default)]
    pub token_id: Option<String>,
    /// API token secret
    #[serde(default)]
    pub token_secret: Option<String>,
    /// Authentication ticket
    #[serde(default)]
    pub ticket: Option<String>,
    /// CSRF prevention token paired with the ticket
    #[serde(default)]
    pub csrf_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token_id", &self.token_id)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("ticket", &self.ticket.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How a node request authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAuth {
    /// `Authorization: PVEAPIToken=<id>=<secret>`
    ApiToken(String),
    /// Ticket cookie plus CSRF header on writes
    Ticket { cookie: String, csrf_token: String },
}

impl Credentials {
    /// Pick the strongest credential available
    pub fn node_auth(&self) -> Option<NodeAuth> {
        if let (Some(id), Some(secret)) = (&self.token_id, &self.token_secret) {
            return Some(NodeAuth::ApiToken(format!("PVEAPIToken={}={}", id, secret)));
        }
        if let (Some(ticket), Some(csrf)) = (&self.ticket, &self.csrf_token) {
            return Some(NodeAuth::Ticket {
                cookie: format!("PVEAuthCookie={}", ticket),
                csrf_token: csrf.clone(),
            });
        }
        None
    }
}

/// Lifecycle state of the credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing loaded yet
    Uninitialized,
    /// Credentials available
    Active,
    /// Credentials were torn down and must be reloaded
    Invalidated,
}

/// Explicit context for node credentials, passed to every component that needs them
#[derive(Debug)]
pub struct AuthContext {
    credentials: RwLock<Option<Credentials>>,
    state: watch::Sender<AuthState>,
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthContext {
    /// Create an empty context
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::Uninitialized);
        Self {
            credentials: RwLock::new(None),
            state,
        }
    }

    /// Create a context that is already active
    pub fn with_credentials(credentials: Credentials) -> Self {
        let ctx = Self::new();
        ctx.set(credentials);
        ctx
    }

    /// Load persisted credentials
    ///
    /// A missing file yields an uninitialized context; only a present but
    /// unreadable file is an error.
    pub fn load(path: &Path) -> Result<Self, VgError> {
        let ctx = Self::new();
        if !ctx.reload(path)? {
            tracing::warn!(path = %path.display(), "No credentials file, node API calls will be unauthenticated");
        }
        Ok(ctx)
    }

    /// Re-read the credentials file into this context
    ///
    /// Returns `false` and leaves the context untouched when the file is missing.
    pub fn reload(&self, path: &Path) -> Result<bool, VgError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let credentials: Credentials = serde_json::from_str(&contents).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "credentials file {} is not valid: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::info!(user = %credentials.username, "Loaded node credentials");
                self.set(credentials);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VgError::Io(e)),
        }
    }

    /// Persist the current credentials with mode 0600
    pub fn save(&self, path: &Path) -> Result<(), VgError> {
        let credentials = self.credentials()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Install credentials and notify subscribers
    pub fn set(&self, credentials: Credentials) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials);
        self.state.send_replace(AuthState::Active);
    }

    /// Drop the credentials and notify subscribers
    pub fn invalidate(&self) {
        let had = self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had {
            tracing::warn!("Node credentials invalidated");
        }
        self.state.send_replace(AuthState::Invalidated);
    }

    /// Current lifecycle state
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Snapshot of the current credentials
    pub fn credentials(&self) -> Result<Credentials, VgError> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| VgError::Unauthenticated("no node credentials loaded".into()))
    }

    /// How node requests should authenticate, if at all
    pub fn node_auth(&self) -> Option<NodeAuth> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Credentials::node_auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn creds() -> Credentials {
        Credentials {
            username: "root@pam".into(),
            token_id: Some("root@pam!vmgate".into()),
            token_secret: Some("s3cr3t".into()),
            ticket: None,
            csrf_token: None,
        }
    }

    #[test]
    fn test_node_auth_prefers_api_token() {
        let auth = creds().node_auth().unwrap();
        assert_eq!(
            auth,
            NodeAuth::ApiToken("PVEAPIToken=root@pam!vmgate=s3cr3t".into())
        );

        let ticket_only = Credentials {
            token_id: None,
            token_secret: None,
            ticket: Some("PVE:root@pam:ABC".into()),
            csrf_token: Some("csrf".into()),
            ..creds()
        };
        assert!(matches!(
            ticket_only.node_auth(),
            Some(NodeAuth::Ticket { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let text = format!("{:?}", creds());
        assert!(!text.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_invalidate_notifies_subscribers() {
        let ctx = AuthContext::with_credentials(creds());
        let mut rx = ctx.subscribe();
        assert_eq!(*rx.borrow(), AuthState::Active);

        ctx.invalidate();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AuthState::Invalidated);
        assert!(matches!(ctx.credentials(), Err(VgError::Unauthenticated(_))));
        assert!(ctx.node_auth().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        AuthContext::with_credentials(creds()).save(&path).unwrap();
        let loaded = AuthContext::load(&path).unwrap();
        assert_eq!(loaded.state(), AuthState::Active);
        assert_eq!(loaded.credentials().unwrap(), creds());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_missing_file_is_uninitialized() {
        let dir = tempdir().unwrap();
        let ctx = AuthContext::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(ctx.state(), AuthState::Uninitialized);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            AuthContext::load(&path),
            Err(VgError::Config(ConfigError::Invalid(_)))
        ));
    }
}
