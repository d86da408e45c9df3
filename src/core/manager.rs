//! Manager - runs tasks under a concurrency bound and collects their results
//!
//! Everything happens on one thread: start queued tasks while there is room,
//! poll the multiplexer, hand each ready descriptor to its task, time out
//! overdue tasks, and reap the ones that finished.

use super::environ::Environment;
use super::iomap::PollIoMap;
use super::sink::OutputSink;
use super::task::Task;
use crate::report::TaskResult;
use anyhow::{Context, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest single wait, so an interrupt is noticed even if its signal raced
/// the poll call
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Wait while a task has closed all pipes but its child is not reaped yet
const REAP_WAIT: Duration = Duration::from_millis(10);

static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: nix::libc::c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

/// Route SIGINT to a flag the manager checks between polls
pub fn install_interrupt_handler() -> nix::Result<&'static AtomicBool> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(&SIGINT_RECEIVED)
}

/// Give SIGINT back its default action, so a second Ctrl-C ends the process.
/// Returns the handler that was in place.
fn restore_default_sigint() -> nix::Result<SigHandler> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: installs the default disposition, no handler code runs.
    let previous = unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(previous.handler())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of tasks running at once
    pub par: usize,
    /// Per-task deadline measured from spawn, `None` for no limit
    pub timeout: Option<Duration>,
    /// Rendezvous socket handed to the askpass helper
    pub askpass_socket: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            par: crate::config::DEFAULT_PARALLELISM,
            timeout: None,
            askpass_socket: None,
        }
    }
}

pub struct Manager {
    config: ManagerConfig,
    environment: Environment,
    iomap: PollIoMap,
    sink: Option<Box<dyn OutputSink>>,
    interrupt: Option<&'static AtomicBool>,
}

impl Manager {
    pub fn new(config: ManagerConfig, environment: Environment) -> Self {
        Self {
            config,
            environment,
            iomap: PollIoMap::new(),
            sink: None,
            interrupt: None,
        }
    }

    /// Send every host's output through `sink`
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Abort the run once `flag` becomes true
    pub fn with_interrupt(mut self, flag: &'static AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupt_requested(&self) -> bool {
        self.interrupt
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run every task to completion.
    ///
    /// `on_finished` sees each result as its task ends; the full list comes
    /// back in completion order. Only a failing multiplexer aborts the run,
    /// after killing whatever is still running.
    pub fn run<F>(&mut self, tasks: Vec<Task>, mut on_finished: F) -> Result<Vec<TaskResult>>
    where
        F: FnMut(&TaskResult),
    {
        let total = tasks.len();
        let mut queue: VecDeque<Task> = tasks.into();
        let mut running: BTreeMap<usize, Task> = BTreeMap::new();
        let mut results = Vec::with_capacity(total);
        let mut finish = |task: Task, results: &mut Vec<TaskResult>| {
            let result = task.into_result();
            on_finished(&result);
            results.push(result);
        };
        let mut next_nodenum = 0;
        let mut interrupted = false;

        log::info!(
            "Running {} tasks, {} at a time, timeout {:?}",
            total,
            self.config.par,
            self.config.timeout
        );

        loop {
            if !interrupted && self.interrupt_requested() {
                interrupted = true;
                log::warn!("Interrupted, stopping {} running tasks", running.len());
                if self.interrupt.is_some_and(|flag| std::ptr::eq(flag, &SIGINT_RECEIVED)) {
                    if let Err(e) = restore_default_sigint() {
                        log::warn!("Could not restore SIGINT handling: {}", e);
                    }
                }
                for task in running.values_mut() {
                    task.interrupted();
                }
                for mut task in queue.drain(..) {
                    task.cancel();
                    finish(task, &mut results);
                }
            }

            while running.len() < self.config.par.max(1) {
                let Some(mut task) = queue.pop_front() else {
                    break;
                };
                let nodenum = next_nodenum;
                next_nodenum += 1;
                let started = task.start(
                    nodenum,
                    &mut self.iomap,
                    self.sink.as_mut().map(|sink| sink.as_mut() as &mut dyn OutputSink),
                    &self.environment,
                    self.config.askpass_socket.as_deref(),
                );
                match started {
                    Ok(()) => {
                        running.insert(nodenum, task);
                    }
                    Err(e) => {
                        log::error!("{}: {}", task.pretty_host, e);
                        task.fail(e.to_string());
                        finish(task, &mut results);
                    }
                }
            }

            if running.is_empty() && queue.is_empty() {
                break;
            }

            if let Some(timeout) = self.config.timeout {
                for task in running.values_mut() {
                    if task.elapsed().is_some_and(|elapsed| elapsed >= timeout) {
                        log::info!("{} timed out", task.pretty_host);
                        task.timedout();
                    }
                }
            }

            let wait = self.next_wait(&running);
            let ready = match self.iomap.poll(Some(wait)) {
                Ok(ready) => ready,
                Err(e) => {
                    log::error!("I/O multiplexer failed, stopping {} running tasks", running.len());
                    for (_, mut task) in std::mem::take(&mut running) {
                        task.interrupted();
                        task.abort(&mut self.iomap);
                        finish(task, &mut results);
                    }
                    for mut task in queue.drain(..) {
                        task.cancel();
                        finish(task, &mut results);
                    }
                    return Err(e).context("I/O multiplexer failed");
                }
            };
            for readiness in ready {
                if let Some(task) = running.get_mut(&readiness.key) {
                    task.handle_ready(readiness.fd, &mut self.iomap);
                }
            }

            let done: Vec<usize> = running
                .iter_mut()
                .filter_map(|(&key, task)| (!task.running()).then_some(key))
                .collect();
            for key in done {
                if let Some(task) = running.remove(&key) {
                    log::debug!("{} finished with status {:?}", task.pretty_host, task.exitstatus());
                    finish(task, &mut results);
                }
            }
        }

        Ok(results)
    }

    /// How long the next poll may block
    fn next_wait(&self, running: &BTreeMap<usize, Task>) -> Duration {
        if running.values().any(|task| !task.has_open_pipes()) {
            return REAP_WAIT;
        }
        let until_timeout = self.config.timeout.and_then(|timeout| {
            running
                .values()
                .filter(|task| !task.killed())
                .filter_map(|task| task.elapsed())
                .map(|elapsed| timeout.saturating_sub(elapsed))
                .min()
        });
        until_timeout.map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
    }
}
