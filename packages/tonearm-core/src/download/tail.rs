//! Reader over a file that is still being downloaded.
//!
//! The writer publishes its progress through [`DownloadProgress`]; a
//! [`TailingReader`] reads whatever is flushed and, at the end of the
//! available bytes, blocks until more data arrives or the download ends.
//! Reads happen on the transcoder's blocking thread, never on the runtime.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use symphonia::core::io::MediaSource;

#[derive(Debug, Default)]
struct ProgressState {
    /// Bytes flushed to disk so far.
    written: u64,
    finished: bool,
    cancelled: bool,
    failure: Option<String>,
}

/// What a blocked reader woke up to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Availability {
    /// Bytes up to this offset can be read.
    UpTo(u64),
    /// The download completed with this total size.
    Complete(u64),
    Cancelled,
    Failed(String),
}

/// Shared progress of one download.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    state: Mutex<ProgressState>,
    changed: Condvar,
}

impl DownloadProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `n` more bytes flushed to disk.
    pub fn advance(&self, n: usize) {
        self.state.lock().written += n as u64;
        self.changed.notify_all();
    }

    /// Marks the download complete.
    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.changed.notify_all();
    }

    /// Marks the download cancelled; blocked readers return an error.
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.changed.notify_all();
    }

    /// Marks the download failed; blocked readers return an error.
    pub fn fail(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
        self.changed.notify_all();
    }

    pub fn written(&self) -> u64 {
        self.state.lock().written
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Total size, known only once the download finished.
    pub fn total_len(&self) -> Option<u64> {
        let state = self.state.lock();
        state.finished.then_some(state.written)
    }

    /// Blocks until bytes past `position` exist or the download settles.
    fn wait_beyond(&self, position: u64) -> Availability {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return Availability::Cancelled;
            }
            if let Some(failure) = &state.failure {
                return Availability::Failed(failure.clone());
            }
            if state.finished {
                return Availability::Complete(state.written);
            }
            if state.written > position {
                return Availability::UpTo(state.written);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Blocks until the download settles.
    fn wait_settled(&self) -> Availability {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return Availability::Cancelled;
            }
            if let Some(failure) = &state.failure {
                return Availability::Failed(failure.clone());
            }
            if state.finished {
                return Availability::Complete(state.written);
            }
            self.changed.wait(&mut state);
        }
    }
}

fn unavailable(availability: Availability) -> io::Error {
    match availability {
        Availability::Cancelled => {
            io::Error::new(io::ErrorKind::ConnectionAborted, "download cancelled")
        }
        Availability::Failed(message) => io::Error::other(message),
        other => io::Error::other(format!("unexpected availability: {other:?}")),
    }
}

/// `Read + Seek` view of a growing file.
pub struct TailingReader {
    file: File,
    position: u64,
    progress: Arc<DownloadProgress>,
}

impl TailingReader {
    /// Opens `path` for reading while its writer reports through `progress`.
    pub fn open(path: &Path, progress: Arc<DownloadProgress>) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            position: 0,
            progress,
        })
    }

    fn read_at_most(&mut self, buf: &mut [u8], limit: u64) -> io::Result<usize> {
        let available = limit.saturating_sub(self.position);
        let len = buf.len().min(available.try_into().unwrap_or(usize::MAX));
        self.file.seek(SeekFrom::Start(self.position))?;
        let n = self.file.read(&mut buf[..len])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Read for TailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.progress.wait_beyond(self.position) {
                Availability::UpTo(written) => {
                    let n = self.read_at_most(buf, written)?;
                    if n > 0 {
                        return Ok(n);
                    }
                    // Counter ran ahead of the page cache; retry.
                    std::thread::yield_now();
                }
                Availability::Complete(total) => {
                    // Final drain; zero here is end of stream.
                    return self.read_at_most(buf, total);
                }
                other => return Err(unavailable(other)),
            }
        }
    }
}

impl Seek for TailingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => match self.progress.wait_settled() {
                Availability::Complete(total) => total.checked_add_signed(delta),
                other => return Err(unavailable(other)),
            },
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.position = target;
        Ok(target)
    }
}

impl MediaSource for TailingReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.progress.total_len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn growing_file() -> (tempfile::TempDir, std::path::PathBuf, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.partial");
        let file = File::create(&path).unwrap();
        (dir, path, file)
    }

    #[test]
    fn reads_everything_written_while_tailing() {
        let (_dir, path, mut writer) = growing_file();
        let progress = DownloadProgress::new();
        let mut reader = TailingReader::open(&path, progress.clone()).unwrap();

        let expected: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let payload = expected.clone();
        let writer_progress = progress.clone();
        let handle = thread::spawn(move || {
            for chunk in payload.chunks(4096) {
                writer.write_all(chunk).unwrap();
                writer.flush().unwrap();
                writer_progress.advance(chunk.len());
                thread::sleep(Duration::from_millis(1));
            }
            writer_progress.finish();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();
        assert_eq!(out, expected);
        assert_eq!(reader.byte_len(), Some(expected.len() as u64));
    }

    #[test]
    fn cancellation_unblocks_reader() {
        let (_dir, path, _writer) = growing_file();
        let progress = DownloadProgress::new();
        let mut reader = TailingReader::open(&path, progress.clone()).unwrap();

        let canceller = progress.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        handle.join().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn failure_surfaces_as_io_error() {
        let (_dir, path, _writer) = growing_file();
        let progress = DownloadProgress::new();
        let mut reader = TailingReader::open(&path, progress.clone()).unwrap();
        progress.fail("connection reset");

        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn seeks_within_and_from_end_once_complete() {
        let (_dir, path, mut writer) = growing_file();
        let progress = DownloadProgress::new();
        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();
        progress.advance(10);
        progress.finish();

        let mut reader = TailingReader::open(&path, progress).unwrap();
        assert_eq!(reader.seek(SeekFrom::Start(4)).unwrap(), 4);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456");

        assert_eq!(reader.seek(SeekFrom::End(-2)).unwrap(), 8);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"89");

        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn byte_len_unknown_until_finished() {
        let (_dir, path, _writer) = growing_file();
        let progress = DownloadProgress::new();
        let reader = TailingReader::open(&path, progress.clone()).unwrap();
        progress.advance(5);
        assert_eq!(reader.byte_len(), None);
        progress.finish();
        assert_eq!(reader.byte_len(), Some(5));
    }
}
