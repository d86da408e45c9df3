//! Application flow - from parsed arguments to a finished run

use crate::cli::Cli;
use crate::config::{FileDefaults, Settings};
use crate::core::{
    install_interrupt_handler, AskpassRelay, Environment, FileSink, Manager, Task,
};
use crate::report;
use crate::ssh;
use crate::ui;
use anyhow::{bail, Context, Result};
use crossterm::tty::IsTty;
use std::io::{self, Read};
use std::process::ExitCode;

/// Run the command on every host and report the results
pub fn run(cli: Cli) -> Result<ExitCode> {
    let defaults = match &cli.config {
        Some(path) => FileDefaults::load(path)?,
        None => FileDefaults::load_default()?,
    };
    let settings = Settings::resolve(cli, defaults);

    let hosts = settings.load_hosts()?;
    if hosts.is_empty() {
        bail!("no hosts given, use -h FILE or -H HOST");
    }
    log::info!("Loaded {} hosts", hosts.len());

    let input = if settings.send_input {
        let mut input = Vec::new();
        io::stdin()
            .read_to_end(&mut input)
            .context("Could not read stdin")?;
        input
    } else {
        Vec::new()
    };

    let task_config = settings.task_config();
    let ssh_options = settings.ssh_options();
    let tasks: Vec<Task> = hosts
        .iter()
        .map(|host| {
            let argv = ssh::ssh_command(host, &settings.command, &ssh_options);
            Task::new(host, argv, task_config.clone())
                .with_display_command(settings.command.clone())
                .with_input(input.clone())
        })
        .collect();

    let environment = Environment::capture(&AskpassRelay::locate());
    let interrupt = install_interrupt_handler().context("Could not install SIGINT handler")?;
    let mut manager = Manager::new(settings.manager_config(), environment).with_interrupt(interrupt);
    let sink = FileSink::create(settings.outdir.as_deref(), settings.errdir.as_deref())
        .context("Could not create output directories")?;
    if let Some(sink) = sink {
        manager = manager.with_sink(Box::new(sink));
    }

    let color = io::stdout().is_tty();
    let mut count = 0;
    let results = manager.run(tasks, |result| {
        count += 1;
        if let Err(e) = ui::print_result(count, result, settings.inline, color) {
            log::warn!("Could not print result for {}: {}", result.pretty_host, e);
        }
    })?;

    if let Some(path) = &settings.json {
        report::write_json(path, &results)?;
    }
    Ok(ExitCode::from(report::exit_code(&results)))
}
