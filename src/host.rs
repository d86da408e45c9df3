//! Host list parsing - turns host files and `-H` strings into [`HostSpec`]s
//!
//! A host line is `[user@]host[:port] [user] [name]`. Everything after a `#`
//! is a comment. Bad lines are reported and skipped so one typo never aborts
//! the whole batch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted host line layout, shown in parse errors
pub const HOST_FORMAT: &str = "[user@]host[:port] [user] [name]";

/// A parsed target host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostSpec {
    pub host: String,
    pub port: Option<String>,
    pub user: Option<String>,
    /// Display label, the host itself unless the line named it
    pub name: String,
}

/// Why a host entry was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostParseError {
    #[error("Bad line: \"{0}\". Format should be {HOST_FORMAT}")]
    TooManyFields(String),
    #[error("User specified twice in line: \"{0}\"")]
    UserSpecifiedTwice(String),
    #[error("Missing host name in entry: \"{0}\"")]
    EmptyHost(String),
}

impl HostSpec {
    /// Create a spec for a bare host with no port, user or display name
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port: None,
            user: None,
        }
    }

    /// Render as a host line that parses back to the same spec.
    ///
    /// The name is only written when it differs from the host, and then only
    /// alongside an explicit user (a bare second field would read as a user).
    pub fn to_entry(&self) -> String {
        let mut entry = String::new();
        if let Some(user) = &self.user {
            entry.push_str(user);
            entry.push('@');
        }
        entry.push_str(&self.host);
        if let Some(port) = &self.port {
            entry.push(':');
            entry.push_str(port);
        }
        if self.name != self.host && self.user.is_some() {
            entry.push(' ');
            entry.push_str(&self.name);
        }
        entry
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_entry())
    }
}

/// Parse a single `[user@]host[:port]` token.
///
/// The user is split off at the first `@`, the port at the last `:`.
/// Returns `(host, port, user)` with the defaults filled in.
pub fn parse_host(
    entry: &str,
    default_user: Option<&str>,
    default_port: Option<&str>,
) -> Result<(String, Option<String>, Option<String>), HostParseError> {
    let (user, rest) = match entry.split_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
        Some((_, rest)) => (default_user.map(str::to_string), rest),
        None => (default_user.map(str::to_string), entry),
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => (host, Some(port.to_string())),
        Some((host, _)) => (host, default_port.map(str::to_string)),
        None => (rest, default_port.map(str::to_string)),
    };
    if host.is_empty() {
        return Err(HostParseError::EmptyHost(entry.to_string()));
    }
    Ok((host.to_string(), port, user))
}

/// Parse one line of a host file.
///
/// `Ok(None)` means the line was blank or only a comment. A second field is
/// the legacy login name unless the first field already carried `user@`, in
/// which case it is the display name. A third field is always the display
/// name.
pub fn parse_host_entry(
    line: &str,
    default_user: Option<&str>,
    default_port: Option<&str>,
) -> Result<Option<HostSpec>, HostParseError> {
    let line = line.split('#').next().unwrap_or_default().trim();
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() > 3 {
        return Err(HostParseError::TooManyFields(line.to_string()));
    }

    let (host, port, explicit_user) = parse_host(fields[0], None, default_port)?;
    let (user, name) = match (explicit_user, &fields[1..]) {
        (user, []) => (user, None),
        (None, [user]) => (Some(user.to_string()), None),
        (Some(user), [name]) => (Some(user), Some(name.to_string())),
        (None, [user, name]) => (Some(user.to_string()), Some(name.to_string())),
        (Some(_), _) => return Err(HostParseError::UserSpecifiedTwice(line.to_string())),
        (None, _) => return Err(HostParseError::TooManyFields(line.to_string())),
    };

    Ok(Some(HostSpec {
        name: name.unwrap_or_else(|| host.clone()),
        user: user.or_else(|| default_user.map(str::to_string)),
        host,
        port,
    }))
}

/// Parse the text of a host file, collecting rejected lines separately.
///
/// The returned hosts are deduplicated, keeping first-seen order.
pub fn parse_host_lines(
    text: &str,
    default_user: Option<&str>,
    default_port: Option<&str>,
) -> (Vec<HostSpec>, Vec<HostParseError>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();
    for line in text.lines() {
        match parse_host_entry(line, default_user, default_port) {
            Ok(Some(host)) => hosts.push(host),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    (dedup_hosts(hosts), errors)
}

/// Parse a whitespace-separated list of `[user@]host[:port]` entries
pub fn parse_host_string(
    host_string: &str,
    default_user: Option<&str>,
    default_port: Option<&str>,
) -> Vec<HostSpec> {
    let mut hosts = Vec::new();
    for entry in host_string.split_whitespace() {
        match parse_host(entry, default_user, default_port) {
            Ok((host, port, user)) => hosts.push(HostSpec {
                name: host.clone(),
                host,
                port,
                user,
            }),
            Err(e) => report(&e),
        }
    }
    hosts
}

/// Read one host file, reporting bad lines on stderr
pub fn read_host_file(
    path: &Path,
    default_user: Option<&str>,
    default_port: Option<&str>,
) -> Result<Vec<HostSpec>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not open hosts file {}", path.display()))?;
    let (hosts, errors) = parse_host_lines(&text, default_user, default_port);
    for e in &errors {
        report(e);
    }
    log::debug!("Read {} hosts from {}", hosts.len(), path.display());
    Ok(hosts)
}

/// Read every host file and merge them into one deduplicated list
pub fn read_host_files(
    paths: &[PathBuf],
    default_user: Option<&str>,
    default_port: Option<&str>,
) -> Result<Vec<HostSpec>> {
    let mut hosts = Vec::new();
    for path in paths {
        hosts.extend(read_host_file(path, default_user, default_port)?);
    }
    Ok(dedup_hosts(hosts))
}

/// Drop repeated specs, keeping the first occurrence of each
pub fn dedup_hosts(hosts: Vec<HostSpec>) -> Vec<HostSpec> {
    let mut seen = HashSet::new();
    hosts
        .into_iter()
        .filter(|host| seen.insert(host.clone()))
        .collect()
}

fn report(error: &HostParseError) {
    log::warn!("{}", error);
    eprintln!("{}", error);
}
