//! V4L2 capture device.
//!
//! Opens a local device node (e.g. `/dev/video0`), negotiates a format close to the
//! configured size and normalizes every buffer to packed RGB24.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::device::{CaptureDevice, DeviceConfig};
use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::Frame;

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// An opened V4L2 device. Dropping it stops streaming and closes the node.
pub struct V4l2Camera {
    config: DeviceConfig,
    state: V4l2State,
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl V4l2Camera {
    pub fn open(config: DeviceConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                config.device,
                format.fourcc
            )
        })?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            config,
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
        })
    }
}

impl CaptureDevice for V4l2Camera {
    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let format = self.format;
        let (width, height) = (self.width, self.height);
        let (pixels, width, height) = self.state.with_mut(|fields| -> Result<_> {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            normalize_to_rgb(buf, width, height, format)
        })?;
        Frame::new(pixels, width, height)
            .with_context(|| format!("frame from {}", self.config.device))
    }
}
