//! Reloads node credentials after a node rejects them
//!
//! The credentials file may have been refreshed since startup, so an
//! invalidation re-reads it instead of leaving every later node call
//! unauthenticated until restart.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vg_core::auth::{AuthContext, AuthState};

/// Run the reloader until cancelled
pub async fn run_credential_reloader(
    auth: Arc<AuthContext>,
    path: PathBuf,
    cancel: CancellationToken,
) {
    let mut state = auth.subscribe();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() != AuthState::Invalidated {
                    continue;
                }
                match auth.reload(&path) {
                    Ok(true) => tracing::info!(path = %path.display(), "Node credentials reloaded"),
                    Ok(false) => tracing::warn!(path = %path.display(), "Credentials file is gone, staying unauthenticated"),
                    Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to reload node credentials"),
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("Credential reloader shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vg_core::auth::Credentials;

    fn creds(secret: &str) -> Credentials {
        Credentials {
            username: "root@pam".into(),
            token_id: Some("root@pam!vmgate".into()),
            token_secret: Some(secret.into()),
            ticket: None,
            csrf_token: None,
        }
    }

    #[tokio::test]
    async fn test_invalidation_reloads_refreshed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let auth = Arc::new(AuthContext::with_credentials(creds("old")));

        let cancel = CancellationToken::new();
        let reloader = tokio::spawn(run_credential_reloader(
            Arc::clone(&auth),
            path.clone(),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        AuthContext::with_credentials(creds("rotated")).save(&path).unwrap();
        auth.invalidate();

        let mut reloaded = false;
        for _ in 0..100 {
            if auth.state() == AuthState::Active {
                reloaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(reloaded);
        assert_eq!(auth.credentials().unwrap(), creds("rotated"));

        cancel.cancel();
        reloader.await.unwrap();
    }
}
