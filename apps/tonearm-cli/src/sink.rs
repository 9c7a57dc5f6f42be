//! Local stand-in for a voice connection.
//!
//! Pulls one frame per 20 ms tick like a real transport would and either
//! appends the payload to `<output_dir>/<group>.raw` or drops it. Status
//! lines are logged.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tonearm_core::protocol_constants::FRAME_DURATION_MS;
use tonearm_core::{
    AudioTransport, FramePoll, FrameSupplier, TransportConnector, TransportError,
};

type TransportResult<T> = Result<T, TransportError>;

const TICK: Duration = Duration::from_millis(FRAME_DURATION_MS as u64);

pub struct FileSinkTransport {
    group_id: String,
    output: Option<PathBuf>,
    supplier: Arc<Mutex<Option<Arc<dyn FrameSupplier>>>>,
    speaking: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl FileSinkTransport {
    pub fn new(group_id: &str, output_dir: Option<PathBuf>) -> Self {
        Self {
            group_id: group_id.to_string(),
            output: output_dir.map(|dir| dir.join(format!("{group_id}.raw"))),
            supplier: Arc::new(Mutex::new(None)),
            speaking: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioTransport for FileSinkTransport {
    async fn open(&self, destination: &str) -> TransportResult<()> {
        let mut file = None;
        if let Some(path) = &self.output {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransportError::Join(e.to_string()))?;
            }
            let opened = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| TransportError::Join(e.to_string()))?;
            file = Some(opened);
        }

        let ticker = tokio::spawn(tick_loop(
            self.group_id.clone(),
            Arc::clone(&self.supplier),
            file,
        ));
        if let Some(previous) = self.ticker.lock().replace(ticker) {
            previous.abort();
        }
        log::info!("[Sink] {} joined {}", self.group_id, destination);
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        log::info!("[Sink] {} left", self.group_id);
        Ok(())
    }

    fn set_frame_supplier(&self, supplier: Option<Arc<dyn FrameSupplier>>) {
        *self.supplier.lock() = supplier;
    }

    async fn set_speaking(&self, speaking: bool) -> TransportResult<()> {
        if self.speaking.swap(speaking, Ordering::AcqRel) != speaking {
            log::debug!("[Sink] {} speaking={}", self.group_id, speaking);
        }
        Ok(())
    }

    async fn set_status_text(&self, destination: &str, text: &str) -> TransportResult<()> {
        if text.is_empty() {
            log::info!("[Sink] {} status cleared", destination);
        } else {
            log::info!("[Sink] {} status: {}", destination, text);
        }
        Ok(())
    }
}

async fn tick_loop(
    group_id: String,
    supplier: Arc<Mutex<Option<Arc<dyn FrameSupplier>>>>,
    mut file: Option<File>,
) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let current = supplier.lock().clone();
        let Some(current) = current else {
            continue;
        };
        match current.poll_frame() {
            FramePoll::Frame(frame) => {
                if let Some(f) = file.as_mut() {
                    if let Err(e) = f.write_all(&frame.data).await {
                        log::warn!("[Sink] {} write failed, dropping output: {}", group_id, e);
                        file = None;
                    }
                }
            }
            FramePoll::Silence => {}
            FramePoll::End => {
                log::debug!("[Sink] {} end of track", group_id);
                let mut slot = supplier.lock();
                if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &current)) {
                    *slot = None;
                }
            }
        }
    }
}

/// Hands every group a [`FileSinkTransport`].
pub struct FileSinkConnector {
    output_dir: Option<PathBuf>,
}

impl FileSinkConnector {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }
}

impl TransportConnector for FileSinkConnector {
    fn connect(&self, group_id: &str) -> Arc<dyn AudioTransport> {
        Arc::new(FileSinkTransport::new(group_id, self.output_dir.clone()))
    }
}
