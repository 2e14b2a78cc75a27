use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::cancel::CancellationToken;
use crate::channels::{ChannelKind, ChannelWatch, GenerationRef};
use crate::config::RelayConfig;
use crate::error::{Cancelled, ProtocolDecodeError, TransientReadError};
use crate::events::ChannelFault;
use crate::message::{Dispatch, decode_record};
use crate::stats::ReceiveStats;
use crate::supervisor::FaultReporter;

const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
enum Record {
    Line(Vec<u8>),
    /// A record longer than the configured limit, with its total length.
    Oversized(usize),
}

/// Splits a byte stream into newline-terminated records.
#[derive(Debug)]
struct RecordBuffer {
    pending: Vec<u8>,
    scanned: usize,
    max_len: usize,
    discarding: bool,
    discarded: usize,
}

impl RecordBuffer {
    fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::with_capacity(READ_CHUNK_SIZE),
            scanned: 0,
            max_len,
            discarding: false,
            discarded: 0,
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_record(&mut self) -> Option<Record> {
        let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        else {
            // Drop the head of an overlong record instead of buffering it.
            if self.pending.len() > self.max_len {
                self.discarded += self.pending.len();
                self.discarding = true;
                self.pending.clear();
            }
            self.scanned = self.pending.len();
            return None;
        };

        let end = self.scanned + offset;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        self.scanned = 0;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if self.discarding || line.len() > self.max_len {
            let len = self.discarded + line.len();
            self.discarding = false;
            self.discarded = 0;
            return Some(Record::Oversized(len));
        }
        Some(Record::Line(line))
    }
}

/// Reader over one generation's reliable channel.
struct RecordReader {
    channels: GenerationRef,
    buffer: RecordBuffer,
    chunk: Vec<u8>,
}

impl RecordReader {
    fn new(channels: GenerationRef, max_len: usize) -> Self {
        Self {
            channels,
            buffer: RecordBuffer::new(max_len),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    fn generation(&self) -> u64 {
        self.channels.generation()
    }

    async fn next_record(&mut self) -> Result<Record, TransientReadError> {
        loop {
            if let Some(record) = self.buffer.next_record() {
                return Ok(record);
            }
            // Upgraded per read so a closed generation is not kept alive here.
            let channels = self
                .channels
                .upgrade()
                .ok_or(TransientReadError::Closed)?;
            let read = channels.read_reliable(&mut self.chunk).await?;
            self.buffer.extend(&self.chunk[..read]);
        }
    }
}

/// Reads newline-delimited control records from the reliable channel, decodes
/// them as `M` and hands each one to a [`Dispatch`].
pub struct ControlReceiver<M> {
    channels: ChannelWatch,
    faults: FaultReporter,
    stats: Arc<ReceiveStats>,
    keepalive_interval: Duration,
    max_record_length: usize,
    _message: PhantomData<fn() -> M>,
}

impl<M: DeserializeOwned> ControlReceiver<M> {
    pub fn new(
        config: &RelayConfig,
        channels: ChannelWatch,
        faults: FaultReporter,
        stats: Arc<ReceiveStats>,
    ) -> Self {
        Self {
            channels,
            faults,
            stats,
            keepalive_interval: config.keepalive_interval,
            max_record_length: config.max_record_length,
            _message: PhantomData,
        }
    }

    pub async fn run<D: Dispatch<M>>(
        mut self,
        cancel: CancellationToken,
        dispatch: D,
    ) -> Result<(), Cancelled> {
        let channels = self.channels.acquire(&cancel, None).await?;
        let mut reader = RecordReader::new(channels, self.max_record_length);

        loop {
            if cancel.is_cancelled() {
                log::info!("Stopping relay control receiver due to cancellation");
                return Err(Cancelled);
            }

            let record = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                record = reader.next_record() => Some(record),
            };
            let Some(record) = record else {
                continue;
            };

            match record {
                Ok(Record::Line(line)) => self.handle(&line, &dispatch),
                Ok(Record::Oversized(len)) => {
                    self.stats.record_decode_failure(len);
                    log::warn!(
                        "Discarding control record of {} bytes: {}",
                        len,
                        ProtocolDecodeError::TooLong {
                            limit: self.max_record_length
                        }
                    );
                }
                Err(error) => {
                    if cancel.is_cancelled() {
                        continue;
                    }

                    let generation = reader.generation();
                    if matches!(error, TransientReadError::Closed) {
                        log::info!("Relay TCP channel closed (generation {})", generation);
                    } else {
                        log::error!("Error reading from relay TCP channel: {}", error);
                        self.stats.record_read_error();
                        self.stats.record_fault();
                        self.faults.report(ChannelFault::new(
                            ChannelKind::Reliable,
                            generation,
                            error.to_string(),
                        ));
                    }

                    // Give the supervisor time to reconnect, then pick up
                    // whichever generation it has installed.
                    cancel.sleep(self.keepalive_interval).await?;
                    let channels = self.channels.acquire(&cancel, Some(generation)).await?;
                    reader = RecordReader::new(channels, self.max_record_length);
                }
            }
        }
    }

    fn handle<D: Dispatch<M>>(&self, record: &[u8], dispatch: &D) {
        if record.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        match decode_record::<M>(record) {
            Ok(message) => {
                self.stats.record_control_message(record.len());
                dispatch.dispatch(message);
            }
            Err(error) => {
                self.stats.record_decode_failure(record.len());
                log::warn!(
                    "Failed to decode control record {:?}: {}",
                    String::from_utf8_lossy(record),
                    error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut RecordBuffer) -> Vec<Record> {
        std::iter::from_fn(|| buffer.next_record()).collect()
    }

    #[test]
    fn test_splits_records_in_one_chunk() {
        let mut buffer = RecordBuffer::new(1024);
        buffer.extend(b"{\"type\":\"X\"}\n{invalid\n{\"type\":\"Y\"}\n");

        assert_eq!(
            drain(&mut buffer),
            vec![
                Record::Line(b"{\"type\":\"X\"}".to_vec()),
                Record::Line(b"{invalid".to_vec()),
                Record::Line(b"{\"type\":\"Y\"}".to_vec()),
            ]
        );
    }

    #[test]
    fn test_joins_record_split_across_reads() {
        let mut buffer = RecordBuffer::new(1024);
        buffer.extend(b"{\"type\":");
        assert_eq!(buffer.next_record(), None);
        buffer.extend(b"\"X\"}");
        assert_eq!(buffer.next_record(), None);
        buffer.extend(b"\n{\"ty");

        assert_eq!(
            buffer.next_record(),
            Some(Record::Line(b"{\"type\":\"X\"}".to_vec()))
        );
        assert_eq!(buffer.next_record(), None);
    }

    #[test]
    fn test_strips_carriage_return() {
        let mut buffer = RecordBuffer::new(1024);
        buffer.extend(b"{}\r\n");
        assert_eq!(buffer.next_record(), Some(Record::Line(b"{}".to_vec())));
    }

    #[test]
    fn test_overlong_record_is_reported_once_and_stream_resumes() {
        let mut buffer = RecordBuffer::new(8);
        buffer.extend(b"0123456789");
        assert_eq!(buffer.next_record(), None);
        buffer.extend(b"abcdef");
        assert_eq!(buffer.next_record(), None);
        buffer.extend(b"gh\n{}\n");

        assert_eq!(
            drain(&mut buffer),
            vec![Record::Oversized(18), Record::Line(b"{}".to_vec())]
        );
    }

    #[test]
    fn test_overlong_record_within_one_chunk() {
        let mut buffer = RecordBuffer::new(4);
        buffer.extend(b"123456\nok\n");
        assert_eq!(
            drain(&mut buffer),
            vec![Record::Oversized(6), Record::Line(b"ok".to_vec())]
        );
    }
}
