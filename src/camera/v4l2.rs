use crate::camera::lock::{DeviceGuard, DeviceLock};
use crate::camera::source::FrameSource;
use crate::common::config::CameraConfig;
use crate::common::error::{RollcallError, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use std::fs;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
}

/// A V4L2 capture device, opened only while holding the device lock.
pub struct V4lCamera {
    device: Device,
    config: CameraConfig,
    _guard: DeviceGuard,
}

pub struct V4lSession<'a> {
    stream: v4l::io::mmap::Stream<'a>,
    format: v4l::Format,
}

impl V4lCamera {
    /// Acquire `lock` (bounded by `lock_timeout_ms`) and open the configured
    /// device. The lock is released again if opening fails.
    pub fn open(lock: &DeviceLock, config: &CameraConfig) -> Result<Self> {
        let guard = lock.acquire(Duration::from_millis(config.lock_timeout_ms))?;
        let index = config.device_index;
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| RollcallError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| RollcallError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device.format()
            .map_err(|e| RollcallError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc != FourCC::new(b"GREY") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device.format()
            .map_err(|e| RollcallError::Camera(format!("Failed to get final format: {}", e)))?;
        if actual.width != config.width || actual.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, config.width, config.height
            );
        }

        Ok(Self { device, config: config.clone(), _guard: guard })
    }

    /// Every `/dev/video*` node that answers a capability query.
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();
        for entry in fs::read_dir("/dev")? {
            let path = entry?.path();
            let Some(index) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };
            let formats = device
                .enum_formats()
                .unwrap_or_default()
                .iter()
                .map(|f| f.fourcc.str().unwrap_or("UNKNOWN").to_string())
                .collect();
            cameras.push(CameraInfo { index, name: caps.card.clone(), formats });
        }
        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    pub fn start_session(&mut self) -> Result<V4lSession<'_>> {
        let format = self.device.format()
            .map_err(|e| RollcallError::Camera(format!("Failed to get format: {}", e)))?;
        let mut stream = v4l::io::mmap::Stream::with_buffers(&mut self.device, Type::VideoCapture, 4)
            .map_err(|e| RollcallError::Camera(format!("Failed to create stream: {}", e)))?;

        for i in 0..self.config.warmup_frames {
            stream.next()
                .map_err(|e| RollcallError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
            std::thread::sleep(Duration::from_millis(self.config.warmup_delay_ms));
        }
        tracing::debug!("Camera ready");

        Ok(V4lSession { stream, format })
    }
}

impl FrameSource for V4lSession<'_> {
    fn capture_frame(&mut self) -> Result<Option<DynamicImage>> {
        let (buf, _meta) = self.stream.next()
            .map_err(|e| RollcallError::Camera(format!("Failed to capture: {}", e)))?;
        if buf.is_empty() {
            return Ok(None);
        }

        if self.format.fourcc == FourCC::new(b"GREY") {
            let img = ImageBuffer::<Luma<u8>, _>::from_raw(self.format.width, self.format.height, buf.to_vec())
                .ok_or_else(|| RollcallError::Camera("Failed to create grayscale image buffer".into()))?;
            Ok(Some(DynamicImage::ImageLuma8(img)))
        } else if self.format.fourcc == FourCC::new(b"MJPG") {
            match image::load_from_memory_with_format(buf, ImageFormat::Jpeg) {
                Ok(img) => Ok(Some(img)),
                Err(e) => {
                    tracing::debug!("Dropping undecodable MJPG frame: {}", e);
                    Ok(None)
                }
            }
        } else {
            Err(RollcallError::Camera(format!("Unsupported format {}", self.format.fourcc)))
        }
    }
}
