//! Incremental decoding of concatenated JSON documents.
//!
//! The Docker `/events` endpoint streams one JSON object per event over a
//! chunked response. Chunk boundaries do not line up with documents, so data
//! is buffered until a complete object is available.
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

#[derive(Debug)]
pub(crate) struct JsonStreamDecoder<T> {
    pending_data: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStreamDecoder<T>
where
    T: DeserializeOwned,
{
    pub(crate) fn new() -> Self {
        Self {
            pending_data: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Takes the next chunk of data and returns every document it completed.
    ///
    /// A syntax error discards all buffered data, since the stream position of
    /// the next document is unknown.
    pub(crate) fn process_next_chunk(&mut self, chunk: &[u8]) -> Vec<Result<T, serde_json::Error>> {
        self.pending_data.extend_from_slice(chunk);

        let mut out = Vec::new();
        let consumed = {
            let total = self.pending_data.len();
            let mut it = serde_json::Deserializer::from_slice(&self.pending_data).into_iter::<T>();
            let mut consumed = 0;
            loop {
                match it.next() {
                    Some(Ok(value)) => {
                        consumed = it.byte_offset();
                        out.push(Ok(value));
                    }
                    Some(Err(err)) if err.is_eof() => break,
                    Some(Err(err)) => {
                        consumed = total;
                        out.push(Err(err));
                        break;
                    }
                    None => {
                        consumed = it.byte_offset();
                        break;
                    }
                }
            }
            consumed
        };

        self.pending_data.drain(..consumed);
        out
    }

    /// Completes decoding.
    ///
    /// Returns the leftover bytes if a partial document remains.
    pub(crate) fn finish(self) -> Result<(), Vec<u8>> {
        if self.pending_data.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        Err(self.pending_data)
    }
}
