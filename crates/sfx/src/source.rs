// ai
//! 📂 Previously, on "Things That Could Go Wrong With A Sensor Log"...
//!
//! The sensor rotated its logs at the top of the hour, gzipped the old one, and
//! started a fresh file with a fresh header block. Somebody then `cat`-ed three of
//! them together, headers and all, and handed us the result. It is still a valid
//! log. Every `#fields` line is a promise about the lines that follow it, until
//! the next one.
//!
//! This module reads lines into [`RawPage`]s, respecting page limits in both lines
//! and bytes. It keeps the current [`SensorLogHeader`] up to date as directive lines
//! go by, and never lets a page straddle a header change: each page carries the
//! header that was in force for all of its lines.
//!
//! 🚰 File → (GzDecoder?) → BufReader → PageReader → RawPage → decode workers
//! 🦆 (mandatory, no notes)

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use flate2::read::MultiGzDecoder;
use tracing::{debug, trace, warn};

use crate::app_config::{CommonSourceConfig, FileSourceConfig, InMemorySourceConfig};
use crate::envelope::SensorLogHeader;
use crate::schema::{Encoding, RecordKind};

/// 📄 A page of raw lines that share one encoding, one record kind, and one header.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub origin: Arc<str>,
    pub kind: RecordKind,
    pub encoding: Encoding,
    /// 📜 The header in force for these lines. Sensor logs only.
    pub header: Option<Arc<SensorLogHeader>>,
    pub lines: Vec<String>,
    /// 💀 Lines in this stretch of input that were not valid UTF-8. They never became
    /// records and are reported as dropped.
    pub unreadable: u64,
    /// 📏 Bytes consumed from the reader to produce this page, directives included.
    pub bytes_read: u64,
}

/// 📖 Turns a line reader into pages.
pub struct PageReader {
    origin: Arc<str>,
    reader: Box<dyn BufRead + Send>,
    encoding: Option<Encoding>,
    kind: Option<RecordKind>,
    header: Arc<SensorLogHeader>,
    limits: CommonSourceConfig,
    pending: Option<String>,
    total_size: u64,
}

impl std::fmt::Debug for PageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReader")
            .field("origin", &self.origin)
            .field("encoding", &self.encoding)
            .field("kind", &self.kind)
            .field("limits", &self.limits)
            .finish()
    }
}

impl PageReader {
    /// 📂 Open one log file. `.gz` files are decompressed on the fly.
    pub fn open(path: &Path, config: &FileSourceConfig) -> Result<Self> {
        let file = File::open(path).with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. It might not exist. The permissions might be wrong. \
                 Either way, the log remains unread and we remain outside.",
                path.display()
            )
        })?;
        let gzipped = path.extension().is_some_and(|ext| ext == "gz");
        // -- 📏 progress counts decompressed bytes, so a gzipped file's size on disk means nothing
        let total_size = match gzipped {
            true => 0,
            false => file.metadata().map(|m| m.len()).unwrap_or(0),
        };
        let reader: Box<dyn BufRead + Send> = if gzipped {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut page_reader = Self::from_reader(
            path.display().to_string(),
            reader,
            config.encoding,
            config.record_kind,
            config.common_config.clone(),
        );
        page_reader.total_size = total_size;
        Ok(page_reader)
    }

    /// 🧪 Lines straight from config.
    pub fn in_memory(config: &InMemorySourceConfig) -> Self {
        let mut joined = config.lines.join("\n");
        joined.push('\n');
        let total_size = joined.len() as u64;
        let mut page_reader = Self::from_reader(
            format!("in-memory {}", config.record_kind),
            Box::new(Cursor::new(joined.into_bytes())),
            Some(config.encoding),
            Some(config.record_kind),
            config.common_config.clone(),
        );
        page_reader.total_size = total_size;
        page_reader
    }

    pub fn from_reader(
        origin: String,
        reader: Box<dyn BufRead + Send>,
        encoding: Option<Encoding>,
        kind: Option<RecordKind>,
        limits: CommonSourceConfig,
    ) -> Self {
        Self {
            origin: Arc::from(origin),
            reader,
            encoding,
            kind,
            header: Arc::new(SensorLogHeader::default()),
            limits,
            pending: None,
            total_size: 0,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// 📏 Size on disk, or 0 when unknown (gzip included).
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 🔄 The next page, or `None` at end of input.
    pub fn next_page(&mut self) -> Result<Option<RawPage>> {
        let mut lines = Vec::with_capacity(self.limits.max_batch_size_docs.min(4096));
        let mut page_bytes = 0usize;
        let mut bytes_read = 0u64;
        let mut unreadable = 0u64;
        let mut buffer = Vec::new();

        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => {
                    buffer.clear();
                    let read = self
                        .reader
                        .read_until(b'\n', &mut buffer)
                        .with_context(|| format!("💀 Reading '{}' failed partway through", self.origin))?;
                    if read == 0 {
                        break;
                    }
                    bytes_read += read as u64;
                    match std::str::from_utf8(&buffer) {
                        Ok(text) => text.trim_end_matches(['\r', '\n']).to_string(),
                        Err(err) => {
                            warn!("💀 '{}' has a line that is not UTF-8, dropping it: {err}", self.origin);
                            unreadable += 1;
                            continue;
                        }
                    }
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let encoding = *self.encoding.get_or_insert_with(|| sniff_encoding(&line));
            if encoding == Encoding::SensorLog && line.starts_with('#') {
                if !lines.is_empty() {
                    // -- the header is about to change; this page keeps the old one
                    self.pending = Some(line);
                    break;
                }
                Arc::make_mut(&mut self.header).apply_directive(&line);
                continue;
            }

            page_bytes += line.len();
            lines.push(line);
            if lines.len() >= self.limits.max_batch_size_docs || page_bytes >= self.limits.max_batch_size_bytes {
                break;
            }
        }

        if lines.is_empty() && unreadable == 0 {
            trace!("📭 '{}' has no more pages", self.origin);
            return Ok(None);
        }

        let encoding = self.encoding.unwrap_or(Encoding::SensorLog);
        let kind = self.resolve_kind()?;
        trace!("📄 '{}' produced a page of {} {kind} lines", self.origin, lines.len());
        Ok(Some(RawPage {
            origin: Arc::clone(&self.origin),
            kind,
            encoding,
            header: (encoding == Encoding::SensorLog).then(|| Arc::clone(&self.header)),
            lines,
            unreadable,
            bytes_read,
        }))
    }

    fn resolve_kind(&self) -> Result<RecordKind> {
        if let Some(kind) = self.kind {
            return Ok(kind);
        }
        if let Some(kind) = self.header.path().and_then(RecordKind::from_sensor_path) {
            return Ok(kind);
        }
        let from_name = Path::new(&*self.origin)
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(RecordKind::from_sensor_path);
        match from_name {
            Some(kind) => {
                debug!("🏷️ '{}' holds {kind} records, going by its name", self.origin);
                Ok(kind)
            }
            None => bail!(
                "💀 Could not tell what kind of records '{}' holds. No record_kind in config, \
                 no #path in the header, and the file name is no help either.",
                self.origin
            ),
        }
    }
}

// 👃 a JSON log starts with '{'; anything else is treated as a columnar sensor log
fn sniff_encoding(first_line: &str) -> Encoding {
    if first_line.trim_start().starts_with('{') {
        Encoding::Json
    } else {
        Encoding::SensorLog
    }
}
