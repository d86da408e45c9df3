//! I/O multiplexer - readiness registration over `poll(2)`
//!
//! Descriptors are registered with the key of the task that owns them. A
//! poll step reports which descriptors are ready and the manager routes each
//! one back to its task.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::BTreeMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

/// Which readiness a descriptor waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// One ready descriptor reported by [`PollIoMap::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    pub key: usize,
    pub interest: Interest,
}

/// Registration side of the multiplexer, as seen by a task
pub trait IoMap {
    fn register_read(&mut self, fd: RawFd, key: usize);
    fn register_write(&mut self, fd: RawFd, key: usize);
    fn unregister(&mut self, fd: RawFd);
}

/// Level-triggered multiplexer backed by `poll(2)`
#[derive(Debug, Default)]
pub struct PollIoMap {
    entries: BTreeMap<RawFd, (Interest, usize)>,
}

impl PollIoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    /// Wait up to `timeout` (forever if `None`) and return the ready descriptors.
    ///
    /// A signal interrupting the wait yields an empty list so the caller can
    /// look at whatever flag the signal handler set.
    pub fn poll(&mut self, timeout: Option<Duration>) -> nix::Result<Vec<Readiness>> {
        let registered: Vec<(RawFd, Interest, usize)> = self
            .entries
            .iter()
            .map(|(&fd, &(interest, key))| (fd, interest, key))
            .collect();

        let mut fds: Vec<PollFd<'_>> = registered
            .iter()
            .map(|&(fd, interest, _)| {
                let events = match interest {
                    Interest::Read => PollFlags::POLLIN,
                    Interest::Write => PollFlags::POLLOUT,
                };
                // SAFETY: owners unregister a descriptor before closing it, so
                // every registered fd is open for the duration of this call.
                PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, events)
            })
            .collect();

        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(e) => return Err(e),
        }

        let ready = fds
            .iter()
            .zip(&registered)
            .filter_map(|(pollfd, &(fd, interest, key))| {
                let revents = pollfd.revents()?;
                if revents.contains(PollFlags::POLLNVAL) {
                    log::warn!("poll reported closed descriptor {}", fd);
                }
                (!revents.is_empty()).then_some(Readiness { fd, key, interest })
            })
            .collect();
        Ok(ready)
    }
}

impl IoMap for PollIoMap {
    fn register_read(&mut self, fd: RawFd, key: usize) {
        self.entries.insert(fd, (Interest::Read, key));
    }

    fn register_write(&mut self, fd: RawFd, key: usize) {
        self.entries.insert(fd, (Interest::Write, key));
    }

    fn unregister(&mut self, fd: RawFd) {
        self.entries.remove(&fd);
    }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match poll_millis(timeout) {
        None => PollTimeout::NONE,
        Some(millis) => PollTimeout::from(millis),
    }
}

/// Milliseconds to wait, rounded up and capped at what `u16` holds.
/// Callers loop, so the cap only shortens one wait.
fn poll_millis(timeout: Option<Duration>) -> Option<u16> {
    let timeout = timeout?;
    let mut millis = timeout.as_millis();
    if millis == 0 && !timeout.is_zero() {
        millis = 1;
    }
    Some(u16::try_from(millis).unwrap_or(u16::MAX))
}
