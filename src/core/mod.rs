//! Core engine - per-host tasks, the I/O multiplexer and the manager loop

mod askpass;
mod environ;
mod iomap;
mod manager;
mod sink;
mod task;

pub use askpass::{AskpassRelay, CredentialRelay};
pub use environ::Environment;
pub use iomap::{Interest, IoMap, PollIoMap, Readiness};
pub use manager::{install_interrupt_handler, Manager, ManagerConfig};
pub use sink::{close_channel, FileSink, OutputSink, SinkChannel, SinkChannels};
pub use task::{Task, TaskError, BUFFER_SIZE, KILL_SIGNAL};
