//! ssh argv construction

use crate::host::HostSpec;

/// Environment variables ssh forwards to the remote side
const SEND_ENV: &str = "SendEnv=PSSH_NODENUM PSSH_HOST";

/// ssh flags shared by every host in a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshOptions {
    /// Values passed with `-o`
    pub options: Vec<String>,
    /// Raw arguments appended after the standard ones
    pub extra_args: Vec<String>,
}

/// Build the ssh argv that runs `command` on `host`.
///
/// A single password prompt is allowed so a wrong password fails fast
/// instead of hanging the task until its timeout.
pub fn ssh_command(host: &HostSpec, command: &str, opts: &SshOptions) -> Vec<String> {
    let mut argv = vec![
        "ssh".to_string(),
        host.host.clone(),
        "-o".to_string(),
        "NumberOfPasswordPrompts=1".to_string(),
        "-o".to_string(),
        SEND_ENV.to_string(),
    ];
    for option in &opts.options {
        argv.push("-o".to_string());
        argv.push(option.clone());
    }
    if let Some(user) = &host.user {
        argv.push("-l".to_string());
        argv.push(user.clone());
    }
    if let Some(port) = &host.port {
        argv.push("-p".to_string());
        argv.push(port.clone());
    }
    argv.extend(opts.extra_args.iter().cloned());
    if !command.is_empty() {
        argv.push(command.to_string());
    }
    argv
}
