//! Capture pipeline: scoped camera lease plus snapshot-to-JPEG.
//!
//! The acquired stream is held as a lease. [`CapturePipeline::release`]
//! stops it at most once per acquisition and also runs on drop.
//!
//! Every snapshot goes through a [`Settle`] policy: warm-up frames and dark
//! frames at the start of a stream activation are dropped before the frame
//! that gets uploaded.

use crate::camera::CameraError;
use crate::frame::{Frame, FrameError};
use docent_core::EncodedImage;
use std::fmt;
use thiserror::Error;

/// Default JPEG quality for uploads.
pub const DEFAULT_JPEG_QUALITY: u8 = 60;

/// Requested stream size. A hint: the device may deliver something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Max dark frames skipped per snapshot before the last one is kept anyway.
pub const MAX_DARK_SKIPS: usize = 6;

/// Which frame of a stream activation to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settle {
    /// Frames dropped unconditionally while auto-exposure settles.
    pub warmup: usize,
    /// Dark frames skipped after warm-up.
    pub max_dark: usize,
}

impl Default for Settle {
    fn default() -> Self {
        Self {
            warmup: 0,
            max_dark: MAX_DARK_SKIPS,
        }
    }
}

impl Settle {
    pub fn warmup(warmup: usize) -> Self {
        Self {
            warmup,
            ..Default::default()
        }
    }

    /// Pull frames in order from one stream activation and return the keeper.
    ///
    /// Warm-up failures (a torn MJPG buffer, say) are ignored. If every
    /// candidate is dark the last one is returned: the scene may just be dark.
    pub fn select<E: fmt::Display>(
        &self,
        mut next: impl FnMut() -> Result<Frame, E>,
    ) -> Result<Frame, E> {
        for _ in 0..self.warmup {
            if let Err(e) = next() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }

        let mut frame = next()?;
        let mut skipped = 0;
        while frame.is_dark() && skipped < self.max_dark {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            skipped += 1;
            frame = next()?;
        }
        Ok(frame)
    }
}

/// An acquired, live camera stream.
pub trait CameraStream: Send {
    /// Delivered frame size, as negotiated with the device.
    fn dimensions(&self) -> (u32, u32);
    /// Capture the current frame, letting the stream settle per `settle`.
    fn grab(&mut self, settle: &Settle) -> Result<Frame, CameraError>;
    /// Stop the underlying stream. Must tolerate repeated calls.
    fn stop(&mut self);
}

/// Something that can open a camera stream.
pub trait CameraSource: Send {
    fn acquire(&self, hint: Resolution) -> Result<Box<dyn CameraStream>, CameraError>;
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera not acquired")]
    NotAcquired,
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Owns the camera lease for a session.
pub struct CapturePipeline {
    source: Box<dyn CameraSource>,
    hint: Resolution,
    jpeg_quality: u8,
    settle: Settle,
    lease: Option<Box<dyn CameraStream>>,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn CameraSource>) -> Self {
        Self {
            source,
            hint: Resolution::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            settle: Settle::default(),
            lease: None,
        }
    }

    pub fn with_resolution(mut self, hint: Resolution) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Frames to drop at the start of each snapshot, for AGC/AE stabilisation.
    pub fn with_warmup_frames(mut self, count: usize) -> Self {
        self.settle.warmup = count;
        self
    }

    pub fn is_live(&self) -> bool {
        self.lease.is_some()
    }

    /// Acquire the camera, or return the live dimensions if already held.
    pub fn acquire(&mut self) -> Result<(u32, u32), CaptureError> {
        if let Some(lease) = &self.lease {
            return Ok(lease.dimensions());
        }

        let lease = self.source.acquire(self.hint)?;
        let (width, height) = lease.dimensions();
        if (width, height) != (self.hint.width, self.hint.height) {
            tracing::info!(
                requested_width = self.hint.width,
                requested_height = self.hint.height,
                width,
                height,
                "camera delivered a different resolution"
            );
        }
        tracing::info!(width, height, "camera acquired");
        self.lease = Some(lease);
        Ok((width, height))
    }

    /// Grab the current frame and encode it for upload.
    pub fn snapshot(&mut self) -> Result<EncodedImage, CaptureError> {
        let lease = self.lease.as_mut().ok_or(CaptureError::NotAcquired)?;
        let frame = lease.grab(&self.settle)?;
        let image = frame.encode_jpeg(self.jpeg_quality)?;
        tracing::debug!(
            seq = frame.sequence,
            width = frame.width,
            height = frame.height,
            bytes = image.bytes.len(),
            quality = self.jpeg_quality,
            "snapshot encoded"
        );
        Ok(image)
    }

    /// Stop the stream if held. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(mut lease) = self.lease.take() {
            lease.stop();
            tracing::info!("camera released");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.release();
    }
}
