//! NDJSON Stream Decoder
//!
//! Turns raw byte chunks into parsed records, one per newline-terminated line.
//! The decoder is pull-based and knows nothing about async runtimes: push
//! chunks in with [`StreamDecoder::push_chunk`], pull records out with
//! [`StreamDecoder::poll_record`], and call [`StreamDecoder::finish`] when the
//! source signals end-of-data.
//!
//! Framing rules:
//! - every record is terminated by `\n`; a trailing fragment left when the
//!   source ends is discarded, never emitted
//! - blank lines are skipped
//! - lines that do not parse as `T` are dropped with a warning and counted
//!
//! Buffering is done on bytes, so a multi-byte UTF-8 sequence split across
//! two chunks decodes the same as if it had arrived whole.

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

/// Result of pulling from the decoder
#[derive(Debug, PartialEq)]
pub enum DecodePoll<T> {
    /// A complete record is available
    Record(T),
    /// No complete line buffered yet; push another chunk
    NeedMore,
    /// The source ended and every complete line has been drained
    End,
}

/// Counters describing what the decoder has seen
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Chunks pushed
    pub chunks: u64,
    /// Records successfully parsed
    pub records: u64,
    /// Lines dropped because they failed to parse
    pub malformed: u64,
    /// Bytes discarded at end-of-data because no newline followed them
    pub discarded_bytes: usize,
}

/// Incremental newline-delimited JSON decoder
#[derive(Debug)]
pub struct StreamDecoder<T> {
    /// Carry-over for the trailing, possibly incomplete line
    buffer: Vec<u8>,
    /// Parsed records waiting to be pulled
    ready: VecDeque<T>,
    /// Whether the source has signalled end-of-data
    finished: bool,
    stats: DecoderStats,
}

impl<T> Default for StreamDecoder<T> {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
            stats: DecoderStats::default(),
        }
    }
}

impl<T> StreamDecoder<T> {
    /// Whether end-of-data has been signalled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decoder counters
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

impl<T: DeserializeOwned> StreamDecoder<T> {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes with arbitrary boundaries.
    ///
    /// Chunks pushed after [`finish`](Self::finish) are ignored.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        if self.finished {
            tracing::warn!(len = chunk.len(), "Ignoring chunk pushed after end of stream");
            return;
        }
        self.stats.chunks += 1;
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        for line in complete.split(|&b| b == b'\n') {
            self.decode_line(line);
        }
    }

    /// Signal end-of-data. Any unterminated carry-over is discarded.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.buffer.iter().all(u8::is_ascii_whitespace) {
            tracing::debug!(
                bytes = self.buffer.len(),
                "Discarding unterminated trailing line at end of stream"
            );
            self.stats.discarded_bytes = self.buffer.len();
        }
        self.buffer.clear();
    }

    /// Pull the next record
    pub fn poll_record(&mut self) -> DecodePoll<T> {
        match self.ready.pop_front() {
            Some(record) => DecodePoll::Record(record),
            None if self.finished => DecodePoll::End,
            None => DecodePoll::NeedMore,
        }
    }

    fn decode_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        match serde_json::from_slice::<T>(line) {
            Ok(record) => {
                self.stats.records += 1;
                self.ready.push_back(record);
            }
            Err(e) => {
                self.stats.malformed += 1;
                tracing::warn!(
                    error = %e,
                    line = %String::from_utf8_lossy(line),
                    "Failed to parse stream record"
                );
            }
        }
    }
}

/// Synchronous iterator adapter over any source of byte chunks
pub struct DecodedRecords<I, T> {
    chunks: I,
    decoder: StreamDecoder<T>,
    _record: PhantomData<fn() -> T>,
}

impl<I, C, T> Iterator for DecodedRecords<I, T>
where
    I: Iterator<Item = C>,
    C: AsRef<[u8]>,
    T: DeserializeOwned,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            match self.decoder.poll_record() {
                DecodePoll::Record(record) => return Some(record),
                DecodePoll::End => return None,
                DecodePoll::NeedMore => match self.chunks.next() {
                    Some(chunk) => self.decoder.push_chunk(chunk.as_ref()),
                    None => self.decoder.finish(),
                },
            }
        }
    }
}

/// Decode every record from an iterator of chunks
pub fn decode_chunks<I, C, T>(chunks: I) -> DecodedRecords<I::IntoIter, T>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
    T: DeserializeOwned,
{
    DecodedRecords {
        chunks: chunks.into_iter(),
        decoder: StreamDecoder::new(),
        _record: PhantomData,
    }
}
