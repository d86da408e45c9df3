//! Terminal presentation - one status line per finished host

use crate::report::TaskResult;
use chrono::Local;
use crossterm::style::Stylize;
use std::io::{self, Write};

/// `[n] HH:MM:SS [SUCCESS] host` or `[n] HH:MM:SS [FAILURE] host reasons`
pub fn status_line(n: usize, result: &TaskResult, timestamp: &str, color: bool) -> String {
    let (tag, reasons) = if result.succeeded() {
        ("[SUCCESS]", String::new())
    } else {
        ("[FAILURE]", format!(" {}", result.failures.join(", ")))
    };
    if !color {
        return format!("[{}] {} {} {}{}", n, timestamp, tag, result.pretty_host, reasons);
    }
    let tag = if result.succeeded() {
        tag.green().to_string()
    } else {
        tag.red().to_string()
    };
    format!(
        "{} {} {} {}{}",
        format!("[{}]", n).cyan(),
        timestamp,
        tag,
        result.pretty_host.as_str().bold(),
        reasons
    )
}

/// Print the status line, followed by captured output when running inline
pub fn print_result(n: usize, result: &TaskResult, inline: bool, color: bool) -> io::Result<()> {
    let timestamp = Local::now().format("%H:%M:%S").to_string();
    let mut out = io::stdout().lock();
    writeln!(out, "{}", status_line(n, result, &timestamp, color))?;
    if inline {
        out.write_all(&result.stdout)?;
        if !result.stderr.is_empty() {
            let label = if color { "Stderr: ".red().to_string() } else { "Stderr: ".to_string() };
            out.write_all(label.as_bytes())?;
            out.write_all(&result.stderr)?;
        }
    }
    out.flush()
}
