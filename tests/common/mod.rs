//! Shared helpers for engine tests

#![allow(dead_code)]

use pssh::core::{AskpassRelay, OutputSink, SinkChannels};
use pssh::{Environment, HostSpec, PollIoMap, Task, TaskConfig};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Upper bound on any single test run
pub const TEST_DEADLINE: Duration = Duration::from_secs(20);

pub fn inline_config() -> TaskConfig {
    TaskConfig {
        inline: true,
        ..TaskConfig::default()
    }
}

/// A task that runs `script` under `/bin/sh` in place of ssh
pub fn sh_task(host: &str, script: &str, config: TaskConfig) -> Task {
    Task::new(
        &HostSpec::new(host),
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
        config,
    )
}

pub fn environment() -> Environment {
    Environment::from_vars(
        [("PATH", "/usr/local/bin:/usr/bin:/bin")],
        &AskpassRelay::new("/opt/pssh/askpass"),
    )
}

/// Drive one started task until it stops running, timing it out after
/// `timeout`. Returns how many write-readiness events went to its stdin.
pub fn drive(task: &mut Task, iomap: &mut PollIoMap, timeout: Option<Duration>) -> usize {
    let deadline = Instant::now() + TEST_DEADLINE;
    let mut stdin_events = 0;
    while task.running() {
        assert!(Instant::now() < deadline, "task did not finish in time");
        if let (Some(timeout), Some(elapsed)) = (timeout, task.elapsed()) {
            if elapsed >= timeout {
                task.timedout();
            }
        }
        for ready in iomap.poll(Some(Duration::from_millis(10))).unwrap() {
            if Some(ready.fd) == task.stdin_fd() {
                stdin_events += 1;
            }
            task.handle_ready(ready.fd, iomap);
        }
    }
    stdin_events
}

/// In-memory sink keyed by `out/<label>` and `err/<label>`
#[derive(Clone, Default)]
pub struct MemorySink {
    pub files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    pub closed: Rc<RefCell<Vec<String>>>,
}

struct MemoryChannel {
    key: String,
    sink: MemorySink,
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink
            .files
            .borrow_mut()
            .entry(self.key.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.sink.closed.borrow_mut().push(self.key.clone());
    }
}

impl MemorySink {
    pub fn contents(&self, key: &str) -> Vec<u8> {
        self.files.borrow().get(key).cloned().unwrap_or_default()
    }
}

impl OutputSink for MemorySink {
    fn open(&mut self, label: &str) -> io::Result<SinkChannels> {
        let channel = |side: &str| -> Box<dyn Write> {
            Box::new(MemoryChannel {
                key: format!("{}/{}", side, label),
                sink: self.clone(),
            })
        };
        Ok(SinkChannels {
            out: Some(channel("out")),
            err: Some(channel("err")),
        })
    }
}
