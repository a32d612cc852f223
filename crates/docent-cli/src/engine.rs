//! Camera worker thread.
//!
//! V4L2 calls block, so the [`CapturePipeline`] lives on a dedicated OS
//! thread and async callers talk to it through [`CameraHandle`]. Requests are
//! served strictly in the order they were submitted.

use docent_core::EncodedImage;
use docent_hw::{CaptureError, CapturePipeline};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("camera thread exited")]
    ChannelClosed,
}

/// Messages sent from async tasks to the camera thread.
enum CameraRequest {
    Acquire {
        reply: oneshot::Sender<Result<(u32, u32), CaptureError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<EncodedImage, CaptureError>>,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
}

/// A submitted request whose reply has not arrived yet.
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, CaptureError>>,
}

impl<T> Pending<T> {
    pub async fn wait(self) -> Result<T, EngineError> {
        Ok(self.rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Clone-safe handle to the camera thread.
#[derive(Clone)]
pub struct CameraHandle {
    tx: mpsc::Sender<CameraRequest>,
}

impl CameraHandle {
    /// Queue an acquisition. Ordering is fixed at submission time.
    pub async fn submit_acquire(&self) -> Result<Pending<(u32, u32)>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CameraRequest::Acquire { reply }).await?;
        Ok(Pending { rx })
    }

    /// Queue a snapshot of the live stream.
    pub async fn submit_snapshot(&self) -> Result<Pending<EncodedImage>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CameraRequest::Snapshot { reply }).await?;
        Ok(Pending { rx })
    }

    #[cfg(test)]
    pub async fn acquire(&self) -> Result<(u32, u32), EngineError> {
        self.submit_acquire().await?.wait().await
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Result<EncodedImage, EngineError> {
        self.submit_snapshot().await?.wait().await
    }

    /// Stop the stream if held. Idempotent.
    pub async fn release(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CameraRequest::Release { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, request: CameraRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Move the pipeline onto a dedicated OS thread.
///
/// The thread exits when every handle is dropped; the pipeline is dropped
/// with it, which releases any camera still held.
pub fn spawn_camera(pipeline: CapturePipeline) -> std::io::Result<CameraHandle> {
    let (tx, mut rx) = mpsc::channel::<CameraRequest>(4);

    std::thread::Builder::new()
        .name("docent-camera".into())
        .spawn(move || {
            let mut pipeline = pipeline;
            tracing::info!("camera thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    CameraRequest::Acquire { reply } => {
                        let _ = reply.send(pipeline.acquire());
                    }
                    CameraRequest::Snapshot { reply } => {
                        let _ = reply.send(pipeline.snapshot());
                    }
                    CameraRequest::Release { reply } => {
                        pipeline.release();
                        let _ = reply.send(());
                    }
                }
            }
            tracing::info!("camera thread exiting");
        })?;

    Ok(CameraHandle { tx })
}
