//! Channel-backed reader for live streams.
//!
//! Live sources have no end and are never cached: a pump task forwards the
//! network chunks into a bounded channel and the transcoder reads them from its
//! blocking thread.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, Bytes};
use futures::StreamExt;
use parking_lot::Mutex;
use symphonia::core::io::MediaSource;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::fetch::ByteStream;

/// Chunks buffered between the network and the decoder.
const LIVE_CHANNEL_CHUNKS: usize = 64;

/// Non-seekable reader over a live byte stream.
pub struct LiveStreamReader {
    rx: Mutex<mpsc::Receiver<Result<Bytes, String>>>,
    current: Bytes,
}

impl LiveStreamReader {
    /// Starts pumping `stream` until it ends or `cancel` fires.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(mut stream: ByteStream, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CHUNKS);
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let item = match next {
                    Some(Ok(chunk)) => Ok(chunk),
                    Some(Err(e)) => Err(e.to_string()),
                    None => break,
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            log::debug!("[Downloader] Live pump finished");
        });
        Self::from_receiver(rx)
    }

    fn from_receiver(rx: mpsc::Receiver<Result<Bytes, String>>) -> Self {
        Self {
            rx: Mutex::new(rx),
            current: Bytes::new(),
        }
    }
}

impl Read for LiveStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while !self.current.has_remaining() {
            // Called on the transcoder's blocking thread.
            match self.rx.get_mut().blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(message)) => return Err(io::Error::other(message)),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.remaining());
        self.current.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Seek for LiveStreamReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live streams cannot seek",
        ))
    }
}

impl MediaSource for LiveStreamReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_chunks_in_order_then_eof() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Ok(Bytes::from_static(b"abc"))).unwrap();
        tx.try_send(Ok(Bytes::from_static(b"defg"))).unwrap();
        drop(tx);

        let mut reader = LiveStreamReader::from_receiver(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefg");
        assert!(!reader.is_seekable());
        assert!(reader.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn stream_error_surfaces() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Err("reset".to_string())).unwrap();
        let mut reader = LiveStreamReader::from_receiver(rx);
        let mut buf = [0u8; 8];
        assert!(reader.read(&mut buf).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pump_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let stream: ByteStream = futures::stream::pending().boxed();
        let mut reader = LiveStreamReader::spawn(stream, cancel.clone());
        cancel.cancel();

        let out = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).map(|_| out)
        })
        .await
        .unwrap()
        .unwrap();
        assert!(out.is_empty());
    }
}
