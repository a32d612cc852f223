//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::pipeline::{CameraSource, CameraStream, Resolution, Settle};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera stream stopped")]
    Stopped,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed RGB24 (3 bytes/pixel).
    Rgb24,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        [PixelFormat::Yuyv, PixelFormat::Rgb24, PixelFormat::Mjpeg]
            .into_iter()
            .find(|f| f.fourcc() == fourcc)
    }
}

/// V4L2 camera device handle. Closing the device stops the stream.
pub struct Camera {
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    /// Bytes per line as reported by the driver.
    stride: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera by path (e.g. "/dev/video0"), asking for `hint`.
    ///
    /// The device may negotiate another size; `width`/`height` hold what it
    /// actually delivers.
    pub fn open(device_path: &str, hint: Resolution) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CameraError::PermissionDenied(device_path.to_string())
            } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Prefer YUYV; fall back to MJPG, which most UVC webcams offer at 720p.
        let mut negotiated = None;
        for wanted in [PixelFormat::Yuyv, PixelFormat::Mjpeg] {
            let mut fmt = device.format().map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
            fmt.fourcc = wanted.fourcc();
            fmt.width = hint.width;
            fmt.height = hint.height;

            let got = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if let Some(pixel_format) = PixelFormat::from_fourcc(got.fourcc) {
                negotiated = Some((got, pixel_format));
                break;
            }
            tracing::debug!(wanted = ?wanted, got = ?got.fourcc, "format not accepted");
        }

        let (fmt, pixel_format) = negotiated.ok_or_else(|| {
            CameraError::FormatNegotiationFailed(
                "unsupported pixel format (need YUYV, RGB3, or MJPG)".to_string(),
            )
        })?;

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            stride = fmt.stride,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            width: fmt.width,
            height: fmt.height,
            device_path: device_path.to_string(),
            fourcc: fmt.fourcc,
            stride: fmt.stride,
            pixel_format,
        })
    }

    /// Capture a single frame, converted to RGB.
    ///
    /// Streaming runs only for the duration of the call. All frames come from
    /// one activation, so the warm-up and dark frames `settle` drops are the
    /// ones right before the frame that is kept.
    pub fn capture_frame(&self, settle: &Settle) -> Result<Frame, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::Stopped)?;
        let mut stream =
            MmapStream::with_buffers(device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        settle.select(|| {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let used = (meta.bytesused as usize).min(buf.len());
            let (rgb, width, height) = self.buf_to_rgb(&buf[..used])?;
            Frame::from_rgb(rgb, width, height, meta.sequence)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))
        })
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<(Vec<u8>, u32, u32), CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => {
                frame::yuyv_to_rgb(buf, self.width, self.height, self.stride)
                    .map(|d| (d, self.width, self.height))
            }
            PixelFormat::Rgb24 => {
                frame::rgb24_copy(buf, self.width, self.height, self.stride)
                    .map(|d| (d, self.width, self.height))
            }
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraStream for Camera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self, settle: &Settle) -> Result<Frame, CameraError> {
        self.capture_frame(settle)
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!(device = %self.device_path, "camera stream stopped");
        }
    }
}

/// Opens the V4L2 device at a fixed path. The path selects the rear camera
/// on devices that have more than one.
pub struct V4lSource {
    device_path: String,
}

impl V4lSource {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }
}

impl CameraSource for V4lSource {
    fn acquire(&self, hint: Resolution) -> Result<Box<dyn CameraStream>, CameraError> {
        Ok(Box::new(Camera::open(&self.device_path, hint)?))
    }
}
