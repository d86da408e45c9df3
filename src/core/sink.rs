//! Output sinks - per-host output and error channels
//!
//! A sink opens one pair of append-only channels per host. Closing a channel
//! flushes and drops it.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// An append-only per-host channel
pub type SinkChannel = Box<dyn Write>;

/// The channels opened for one host; either may be absent
#[derive(Default)]
pub struct SinkChannels {
    pub out: Option<SinkChannel>,
    pub err: Option<SinkChannel>,
}

/// Opens per-host output channels
pub trait OutputSink {
    fn open(&mut self, label: &str) -> io::Result<SinkChannels>;
}

/// Flush a channel and drop it
pub fn close_channel(mut channel: SinkChannel) -> io::Result<()> {
    channel.flush()
}

/// Writes `<outdir>/<label>` and `<errdir>/<label>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSink {
    outdir: Option<PathBuf>,
    errdir: Option<PathBuf>,
}

impl FileSink {
    /// Create the directories up front. Returns `None` when neither is set.
    pub fn create(outdir: Option<&Path>, errdir: Option<&Path>) -> io::Result<Option<Self>> {
        if outdir.is_none() && errdir.is_none() {
            return Ok(None);
        }
        for dir in outdir.iter().chain(errdir.iter()) {
            fs::create_dir_all(dir)?;
        }
        Ok(Some(Self {
            outdir: outdir.map(Path::to_path_buf),
            errdir: errdir.map(Path::to_path_buf),
        }))
    }

    fn open_in(dir: Option<&Path>, label: &str) -> io::Result<Option<SinkChannel>> {
        let Some(dir) = dir else {
            return Ok(None);
        };
        let file = File::create(dir.join(label))?;
        Ok(Some(Box::new(BufWriter::new(file))))
    }
}

impl OutputSink for FileSink {
    fn open(&mut self, label: &str) -> io::Result<SinkChannels> {
        Ok(SinkChannels {
            out: Self::open_in(self.outdir.as_deref(), label)?,
            err: Self::open_in(self.errdir.as_deref(), label)?,
        })
    }
}
