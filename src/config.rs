//! Configuration - built-in defaults, the YAML defaults file and the command line
//!
//! Precedence, lowest first: built-in defaults, `~/.config/pssh/config.yml`
//! (or `--config`), then flags and their `PSSH_*` environment fallbacks.

use crate::cli::Cli;
use crate::core::ManagerConfig;
use crate::host::{self, HostSpec};
use crate::ssh::SshOptions;
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PARALLELISM: usize = 32;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Per-task switches, shared by every task in a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConfig {
    /// Record full error details and ask the askpass helper to be chatty
    pub verbose: bool,
    /// Echo each stdout chunk as it arrives, labelled by host
    pub print_out: bool,
    /// Keep stdout/stderr in memory for the final report
    pub inline: bool,
    /// Default login name; tasks for other users show `user@` in their label
    pub user: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Contents of the optional YAML defaults file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileDefaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub par: Option<usize>,
    pub timeout: Option<u64>,
    pub outdir: Option<PathBuf>,
    pub errdir: Option<PathBuf>,
    pub options: Vec<String>,
    pub extra_args: Vec<String>,
    pub inline: bool,
    pub print: bool,
    pub verbose: bool,
}

impl FileDefaults {
    /// `$XDG_CONFIG_HOME/pssh/config.yml`, if a config directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pssh").join("config.yml"))
    }

    /// Load a defaults file; a missing file is an error here
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the default defaults file, treating a missing file as empty
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                log::debug!("Loading defaults from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host_files: Vec<PathBuf>,
    pub host_strings: Vec<String>,
    pub user: Option<String>,
    pub port: Option<String>,
    pub par: usize,
    /// `None` waits forever
    pub timeout: Option<Duration>,
    pub outdir: Option<PathBuf>,
    pub errdir: Option<PathBuf>,
    pub options: Vec<String>,
    pub extra_args: Vec<String>,
    pub verbose: bool,
    pub inline: bool,
    pub print_out: bool,
    pub send_input: bool,
    pub json: Option<PathBuf>,
    pub command: String,
}

impl Settings {
    /// Merge command line flags over file defaults
    pub fn resolve(cli: Cli, defaults: FileDefaults) -> Self {
        let timeout_secs = cli
            .timeout
            .or(defaults.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut options = defaults.options;
        options.extend(cli.options);

        let mut extra_args = defaults.extra_args;
        for group in &cli.extra_args {
            extra_args.extend(group.split_whitespace().map(str::to_string));
        }
        extra_args.extend(cli.extra_arg);

        Self {
            host_files: cli.hosts,
            host_strings: cli.host_strings,
            user: cli.user.or(defaults.user),
            port: defaults.port.map(|port| port.to_string()),
            par: cli.par.or(defaults.par).unwrap_or(DEFAULT_PARALLELISM).max(1),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            outdir: cli.outdir.or(defaults.outdir),
            errdir: cli.errdir.or(defaults.errdir),
            options,
            extra_args,
            verbose: cli.verbose || defaults.verbose,
            inline: cli.inline || defaults.inline,
            print_out: cli.print || defaults.print,
            send_input: cli.send_input,
            json: cli.json,
            command: cli.command.join(" "),
        }
    }

    /// Every host from host files and `-H` strings, deduplicated
    pub fn load_hosts(&self) -> Result<Vec<HostSpec>> {
        let user = self.user.as_deref();
        let port = self.port.as_deref();
        let mut hosts = host::read_host_files(&self.host_files, user, port)?;
        for host_string in &self.host_strings {
            hosts.extend(host::parse_host_string(host_string, user, port));
        }
        Ok(host::dedup_hosts(hosts))
    }

    pub fn task_config(&self) -> TaskConfig {
        TaskConfig {
            verbose: self.verbose,
            print_out: self.print_out,
            inline: self.inline,
            user: self.user.clone(),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            par: self.par,
            timeout: self.timeout,
            askpass_socket: None,
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            options: self.options.clone(),
            extra_args: self.extra_args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pssh").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_builtin_defaults() {
        let settings = Settings::resolve(cli(&["-H", "web1", "uptime"]), FileDefaults::default());
        assert_eq!(settings.par, DEFAULT_PARALLELISM);
        assert_eq!(settings.timeout, Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)));
        assert_eq!(settings.command, "uptime");
        assert!(!settings.inline);
    }

    #[test]
    fn test_cli_overrides_file() {
        let defaults = FileDefaults::from_yaml(
            "user: deploy\npar: 4\ntimeout: 30\ninline: true\noptions: [StrictHostKeyChecking=no]\n",
        )
        .unwrap();
        let settings = Settings::resolve(
            cli(&["-H", "web1", "-l", "admin", "-t", "0", "-O", "BatchMode=yes", "ls", "-la"]),
            defaults,
        );
        assert_eq!(settings.user.as_deref(), Some("admin"));
        assert_eq!(settings.par, 4);
        assert_eq!(settings.timeout, None);
        assert!(settings.inline);
        assert_eq!(settings.options, vec!["StrictHostKeyChecking=no", "BatchMode=yes"]);
        assert_eq!(settings.command, "ls -la");
    }

    #[test]
    fn test_extra_args_are_split() {
        let settings = Settings::resolve(
            cli(&["-H", "web1", "-x", "-q -C", "-X", "-4", "true"]),
            FileDefaults::default(),
        );
        assert_eq!(settings.extra_args, vec!["-q", "-C", "-4"]);
    }

    #[test]
    fn test_load_defaults_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port: 2222\nerrdir: /tmp/errs").unwrap();
        let defaults = FileDefaults::load(file.path()).unwrap();
        assert_eq!(defaults.port, Some(2222));
        assert_eq!(defaults.errdir, Some(PathBuf::from("/tmp/errs")));

        let settings = Settings::resolve(cli(&["-H", "web1", "true"]), defaults);
        assert_eq!(settings.port.as_deref(), Some("2222"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "parallelism: 3").unwrap();
        assert!(matches!(
            FileDefaults::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_hosts_merges_sources() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "web1\nweb2").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let settings = Settings::resolve(
            cli(&["-h", &path, "-H", "web2 web3", "-l", "ops", "true"]),
            FileDefaults::default(),
        );
        let hosts = settings.load_hosts().unwrap();
        let names: Vec<_> = hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(names, vec!["web1", "web2", "web3"]);
        assert!(hosts.iter().all(|h| h.user.as_deref() == Some("ops")));
    }
}
