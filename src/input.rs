//! Landmark stream input (JSON lines from an external hand detector).

use serde::Deserialize;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use thiserror::Error;

use crate::tracker::{Handedness, Landmark};

#[derive(Debug, Clone, Deserialize)]
pub struct RawHand {
    pub handedness: Handedness,
    pub landmarks: Vec<Landmark>,
}

/// One detector result, as written by the landmark producer.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub hands: Vec<RawHand>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("landmark source i/o: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl SourceError {
    /// A bad line can be skipped; I/O failures end the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Parse { .. })
    }
}

pub trait LandmarkSource {
    /// `Ok(None)` means the producer closed the stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError>;
}

pub struct JsonLinesSource<R> {
    reader: R,
    line: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> LandmarkSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
        loop {
            self.line.clear();
            // bytes, not String: a non-UTF-8 line is one bad frame, not a dead stream
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let text = self.line.trim_ascii();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_slice(text)
                .map(Some)
                .map_err(|source| SourceError::Parse {
                    line: self.line_no,
                    source,
                });
        }
    }
}

/// `-` reads stdin; anything else is a file or FIFO.
pub fn open(path: &Path) -> io::Result<Box<dyn LandmarkSource + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(JsonLinesSource::new(BufReader::new(io::stdin()))));
    }
    let file = File::open(path)?;
    Ok(Box::new(JsonLinesSource::new(BufReader::new(file))))
}

#[cfg(unix)]
pub fn is_fifo(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_fifo(_path: &Path) -> bool {
    false
}
