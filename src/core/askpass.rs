//! Credential relay - where ssh finds the non-interactive password helper
//!
//! The helper itself and the socket server that feeds it live outside this
//! crate; tasks only need to point `SSH_ASKPASS` at it.

use std::env;
use std::path::PathBuf;

/// Name of the helper binary when it is installed next to `pssh`
pub const ASKPASS_BINARY: &str = "pssh-askpass";

/// Supplies the executable ssh should run to ask for a password
pub trait CredentialRelay {
    fn executable_path(&self) -> PathBuf;
}

/// Helper located on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskpassRelay {
    path: PathBuf,
}

impl AskpassRelay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Find the helper: `$PSSH_ASKPASS` first, then a sibling of the running
    /// binary, then a bare name left to `$PATH`.
    pub fn locate() -> Self {
        if let Some(path) = env::var_os("PSSH_ASKPASS") {
            return Self::new(path);
        }
        let sibling = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(ASKPASS_BINARY)))
            .filter(|path| path.exists());
        Self::new(sibling.unwrap_or_else(|| PathBuf::from(ASKPASS_BINARY)))
    }
}

impl CredentialRelay for AskpassRelay {
    fn executable_path(&self) -> PathBuf {
        self.path.clone()
    }
}
