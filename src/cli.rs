//! Command line arguments

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Run a command on many hosts in parallel over ssh
#[derive(Debug, Clone, Parser)]
#[command(name = "pssh", version, about, disable_help_flag = true)]
pub struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Hosts file, one `[user@]host[:port] [user] [name]` per line (repeatable)
    #[arg(short = 'h', long = "hosts", value_name = "HOST_FILE", env = "PSSH_HOSTS")]
    pub hosts: Vec<PathBuf>,

    /// Additional hosts as a whitespace-separated `[user@]host[:port]` list (repeatable)
    #[arg(short = 'H', long = "host", value_name = "HOST_STRING")]
    pub host_strings: Vec<String>,

    /// Default login name
    #[arg(short = 'l', long, env = "PSSH_USER")]
    pub user: Option<String>,

    /// Maximum number of parallel connections
    #[arg(short = 'p', long, env = "PSSH_PAR")]
    pub par: Option<usize>,

    /// Directory for per-host stdout files
    #[arg(short = 'o', long, env = "PSSH_OUTDIR")]
    pub outdir: Option<PathBuf>,

    /// Directory for per-host stderr files
    #[arg(short = 'e', long, env = "PSSH_ERRDIR")]
    pub errdir: Option<PathBuf>,

    /// Timeout in seconds, 0 for none
    #[arg(short = 't', long, env = "PSSH_TIMEOUT")]
    pub timeout: Option<u64>,

    /// ssh option in the `-o` format (repeatable)
    #[arg(short = 'O', long = "option", value_name = "OPTION", env = "PSSH_OPTIONS")]
    pub options: Vec<String>,

    /// Extra ssh command-line arguments, split on whitespace
    #[arg(short = 'x', long = "extra-args", value_name = "ARGS", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// A single extra ssh command-line argument
    #[arg(short = 'X', long = "extra-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub extra_arg: Vec<String>,

    /// Turn on warning and diagnostic messages
    #[arg(short = 'v', long, env = "PSSH_VERBOSE")]
    pub verbose: bool,

    /// Aggregate and print each host's output when it finishes
    #[arg(short = 'i', long)]
    pub inline: bool,

    /// Read input from our stdin and send it to every host
    #[arg(short = 'I', long = "send-input")]
    pub send_input: bool,

    /// Print output as it arrives
    #[arg(short = 'P', long)]
    pub print: bool,

    /// Write a JSON report of every host's result to this file
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Defaults file, instead of ~/.config/pssh/config.yml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Command to run on every host
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}
