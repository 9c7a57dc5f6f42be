//! Transcoder inputs.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::probe::Hint;

/// What the transcoder reads from.
pub enum MediaInput {
    /// A complete file on disk.
    Path(PathBuf),
    /// Any byte reader: tailing download, live stream or in-memory buffer.
    /// Seeking is used only if the source reports itself seekable.
    Reader {
        source: Box<dyn MediaSource>,
        /// File extension hint for the prober, if known.
        extension: Option<String>,
    },
}

impl MediaInput {
    /// Describes the input for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Reader { source, .. } if source.is_seekable() => "seekable reader".to_string(),
            Self::Reader { .. } => "stream reader".to_string(),
        }
    }

    /// Opens the byte stream and builds the probe hint.
    pub(crate) fn into_stream(self) -> io::Result<(MediaSourceStream, Hint)> {
        let mut hint = Hint::new();
        let source: Box<dyn MediaSource> = match self {
            Self::Path(path) => {
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
                Box::new(File::open(&path)?)
            }
            Self::Reader { source, extension } => {
                if let Some(ext) = extension.as_deref() {
                    hint.with_extension(ext);
                }
                source
            }
        };
        Ok((
            MediaSourceStream::new(source, MediaSourceStreamOptions::default()),
            hint,
        ))
    }
}

impl std::fmt::Debug for MediaInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
