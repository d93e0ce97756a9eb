use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use std::io;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Splits a streamed HTTP body into newline-delimited records.
///
/// `next_line` is cancel safe: bytes of a partially read line stay in the
/// internal buffer and the next call continues where the last one stopped.
pub struct LineReader {
    reader: StreamReader<ByteStream, Bytes>,
    line: Vec<u8>,
    bytes_read: u64,
}

impl LineReader {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let stream = stream
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();

        Self {
            reader: StreamReader::new(stream),
            line: Vec::new(),
            bytes_read: 0,
        }
    }

    /// Next record without its line terminator, or None once the body ends.
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let read = self.reader.read_until(b'\n', &mut self.line).await?;
        self.bytes_read += read as u64;

        if read == 0 && self.line.is_empty() {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }

        Ok(Some(std::mem::take(&mut self.line)))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
