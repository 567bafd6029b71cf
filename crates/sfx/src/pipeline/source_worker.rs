//! 🚰 The SourceWorker: reads pages off a [`PageReader`] and pushes them down the channel.
//!
//! Reading a (possibly gzipped) file is blocking work, so this one lives on tokio's
//! blocking pool and uses `send_blocking`. When the channel is full it waits. When the
//! decoders have all hung up it stops, because nobody is listening anymore.

use anyhow::{Result, bail};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Worker;
use crate::progress::ProgressMetrics;
use crate::source::{PageReader, RawPage};

#[derive(Debug)]
pub(super) struct SourceWorker {
    tx: Sender<RawPage>,
    reader: PageReader,
}

impl SourceWorker {
    pub(super) fn new(tx: Sender<RawPage>, reader: PageReader) -> Self {
        Self { tx, reader }
    }
}

impl Worker for SourceWorker {
    /// 📄 Data lines read, unreadable ones included.
    type Output = u64;

    fn start(mut self) -> JoinHandle<Result<u64>> {
        tokio::task::spawn_blocking(move || {
            let mut progress = ProgressMetrics::new(self.reader.origin().to_string(), self.reader.total_size());
            let mut records_read = 0u64;
            while let Some(page) = self.reader.next_page()? {
                let lines = page.lines.len() as u64 + page.unreadable;
                progress.update(page.bytes_read, lines);
                records_read += lines;
                if self.tx.send_blocking(page).is_err() {
                    bail!(
                        "💀 Every decode worker hung up on '{}' after {records_read} records",
                        self.reader.origin()
                    );
                }
            }
            progress.finish();
            debug!("🏁 SourceWorker: '{}' is drained. Closing the channel.", self.reader.origin());
            Ok(records_read)
        })
    }
}
