//! Streaming decode: records are produced while the export is still
//! downloading.
//!
//! The `csv` reader is synchronous, so decoding runs inside
//! `spawn_blocking` and pulls body chunks on demand through a small `Read`
//! adapter. Only the current chunk and a bounded queue of decoded records
//! are held in memory; the export body is never buffered as a whole.
//!
//! The returned [`RecordStream`] ends after the last row, or after the first
//! error. A consumer that drops the stream early stops the decoder at its
//! next send.

use crate::error::SpinsheetError;
use crate::pipeline::decode::RecordDecoder;
use crate::record::ClassRecord;
use axum::body::Bytes;
use futures::stream::{Stream, StreamExt};
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// A boxed stream of decoded records.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<ClassRecord, SpinsheetError>> + Send>>;

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Decoded records queued between the decoder thread and the consumer.
const RECORD_QUEUE: usize = 32;

/// Decode the body of an export response as it arrives.
pub fn decode_response(response: reqwest::Response) -> RecordStream {
    decode_stream(response.bytes_stream())
}

/// Decode any stream of byte chunks as CSV.
///
/// Chunk boundaries may fall anywhere, including inside a quoted cell. A
/// stream error ends decoding with [`SpinsheetError::Transport`].
pub fn decode_stream<S, E>(body: S) -> RecordStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let body: ByteStream = Box::pin(body.map(|chunk| chunk.map_err(io::Error::other)));
    let (tx, rx) = mpsc::channel(RECORD_QUEUE);
    let failure = Arc::new(Mutex::new(None));
    let reader = BodyReader {
        runtime: Handle::current(),
        body,
        chunk: Bytes::new(),
        failure: Arc::clone(&failure),
    };

    tokio::task::spawn_blocking(move || {
        let transport_failure = || {
            failure
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .map(|reason| SpinsheetError::Transport {
                    stage: "export",
                    reason,
                })
        };

        let decoder = match RecordDecoder::new(reader) {
            Ok(d) => {
                debug!("decoding columns {:?}", d.fields().collect::<Vec<_>>());
                d
            }
            Err(e) => {
                let err = transport_failure().unwrap_or_else(|| e.into());
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        let mut sent = 0usize;
        for item in decoder {
            let item = item.map_err(|e| transport_failure().unwrap_or_else(|| e.into()));
            if tx.blocking_send(item).is_err() {
                debug!("record consumer went away after {} rows", sent);
                return;
            }
            sent += 1;
        }
        debug!("decoder finished after {} items", sent);
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Blocking `Read` over an async chunk stream.
struct BodyReader {
    runtime: Handle,
    body: ByteStream,
    chunk: Bytes,
    failure: Arc<Mutex<Option<String>>>,
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            match self.runtime.block_on(self.body.next()) {
                Some(Ok(bytes)) => self.chunk = bytes,
                Some(Err(e)) => {
                    if let Ok(mut slot) = self.failure.lock() {
                        *slot = Some(e.to_string());
                    }
                    return Err(e);
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk.split_to(n));
        Ok(n)
    }
}
