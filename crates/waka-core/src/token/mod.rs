//! Shared-secret authentication.
//!
//! The secret lives in one file under the system directory. It is generated
//! on first start, written atomically with owner-only permissions, and loaded
//! verbatim on every later start.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use waka_model::TOKEN_FILE_NAME;

/// Bytes of entropy in a generated secret.
const SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token file {0} is empty")]
    Empty(PathBuf),
}

impl TokenError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        TokenError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug)]
pub struct TokenAuthenticator {
    path: PathBuf,
    secret: OnceLock<String>,
}

impl TokenAuthenticator {
    /// Authenticator backed by `<system_dir>/head.token`.
    pub fn new(system_dir: impl AsRef<Path>) -> Self {
        Self::with_file(system_dir.as_ref().join(TOKEN_FILE_NAME))
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            secret: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the secret, generating it first if the file does not exist.
    ///
    /// Calling this again after a successful call does nothing.
    pub fn initialize(&self) -> Result<(), TokenError> {
        if self.secret.get().is_some() {
            return Ok(());
        }

        let secret = match read_secret(&self.path) {
            Ok(secret) => {
                debug!(path = %self.path.display(), "token loaded");
                secret
            }
            Err(TokenError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                let secret = generate_secret();
                if publish_secret(&self.path, &secret)? {
                    info!(path = %self.path.display(), "token generated");
                    secret
                } else {
                    debug!(path = %self.path.display(), "token created concurrently; loading it");
                    read_secret(&self.path)?
                }
            }
            Err(e) => return Err(e),
        };

        // A concurrent initializer may have won; both read the same file.
        let _ = self.secret.set(secret);
        Ok(())
    }

    /// `true` iff `candidate` is byte-for-byte the loaded secret.
    ///
    /// Always `false` before [`initialize`](Self::initialize) succeeds.
    pub fn validate_token(&self, candidate: Option<&str>) -> bool {
        match (self.secret.get(), candidate) {
            (Some(secret), Some(candidate)) => constant_time_eq(secret.as_bytes(), candidate.as_bytes()),
            _ => false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.secret.get().map(String::as_str)
    }
}

fn read_secret(path: &Path) -> Result<String, TokenError> {
    let raw = fs::read_to_string(path).map_err(|e| TokenError::io(path, e))?;
    let secret = raw.trim();
    if secret.is_empty() {
        return Err(TokenError::Empty(path.to_path_buf()));
    }
    Ok(secret.to_string())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// temp file -> fsync -> hard link, so readers never see a partial secret and
/// an existing file is never replaced.
///
/// Returns `false` if another process published first.
fn publish_secret(path: &Path, secret: &str) -> Result<bool, TokenError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| TokenError::io(dir, e))?;

    let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4().simple()));
    {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&temp_path).map_err(|e| TokenError::io(&temp_path, e))?;
        writeln!(file, "{secret}")
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                TokenError::io(&temp_path, e)
            })?;
    }

    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);
    match linked {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(TokenError::io(path, e)),
    }

    #[cfg(unix)]
    {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(true)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
