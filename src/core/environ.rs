//! Child process environment
//!
//! The ambient environment is captured once by the caller and handed to
//! every task, so tasks never read process-wide state themselves.

use super::askpass::CredentialRelay;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// Placeholder `DISPLAY`; ssh skips `SSH_ASKPASS` entirely when none is set
const DISPLAY_PLACEHOLDER: &str = "pssh-gibberish";

/// Base environment plus the askpass helper every child is given
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
    askpass: PathBuf,
}

impl Environment {
    /// Snapshot the current process environment
    pub fn capture(relay: &dyn CredentialRelay) -> Self {
        Self::from_vars(std::env::vars_os(), relay)
    }

    pub fn from_vars<I, K, V>(vars: I, relay: &dyn CredentialRelay) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            askpass: relay.executable_path(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    /// Environment for the child of task number `nodenum`
    pub fn for_task(
        &self,
        nodenum: usize,
        host: &str,
        askpass_socket: Option<&str>,
        verbose: bool,
    ) -> BTreeMap<OsString, OsString> {
        let mut vars = self.vars.clone();
        let mut set = |key: &str, value: &OsStr| {
            vars.insert(key.into(), value.to_os_string());
        };
        set("PSSH_NODENUM", OsStr::new(&nodenum.to_string()));
        set("PSSH_HOST", OsStr::new(host));
        set("SSH_ASKPASS", self.askpass.as_os_str());
        if let Some(socket) = askpass_socket {
            set("PSSH_ASKPASS_SOCKET", OsStr::new(socket));
        }
        if verbose {
            set("PSSH_ASKPASS_VERBOSE", OsStr::new("1"));
        }
        vars.entry("DISPLAY".into())
            .or_insert_with(|| DISPLAY_PLACEHOLDER.into());
        vars
    }
}
