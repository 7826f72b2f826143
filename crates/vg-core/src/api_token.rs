//! HTTP API bearer token management
//!
//! The orchestrator generates a random token on startup and writes it to a
//! file readable only by the owner. The CLI reads the same file and presents
//! the token as `Authorization: Bearer <token>`.
//!
//! # Security Model
//!
//! - Token is 32 bytes of cryptographically random data, hex-encoded (64 chars)
//! - Token file has mode 0600 (owner read/write only) on Unix
//! - Every request except the health check must present the token

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Length of the token in bytes (before hex encoding)
const TOKEN_BYTES: usize = 32;

/// Default token file path, next to the configuration
pub fn default_token_path() -> PathBuf {
    crate::config::default_config_dir().join("api_token")
}

/// Generate a new random token
///
/// Returns a 64-character hex string (32 random bytes). Console tunnel
/// tokens use the same generator.
pub fn generate_token() -> String {
    use rand::Rng;
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Write a token to `path`
///
/// Creates the parent directory if it doesn't exist.
/// Sets file permissions to 0600 (owner read/write only) on Unix.
pub fn write_token(path: &Path, token: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, token)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    tracing::debug!(path = %path.display(), "Wrote API token");
    Ok(())
}

/// Read a token from `path`
pub fn read_token(path: &Path) -> io::Result<String> {
    let token = fs::read_to_string(path)?.trim().to_string();
    if token.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "token file is empty"));
    }
    Ok(token)
}

/// Remove the token file, ignoring a missing file
pub fn remove_token(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Validate a token against the expected one
///
/// Uses constant-time comparison to prevent timing attacks.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }

    let mut result = 0u8;
    for (a, b) in provided.bytes().zip(expected.bytes()) {
        result |= a ^ b;
    }
    result == 0
}
