//! Sensors module.
//!
//! A [`Sensor`] opens capture devices by name and hands out an exclusively owned
//! [`FrameSource`]. Dropping the source releases the device.
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::{
    error::{CaptureError, StreamError},
    frame::{ChannelOrder, Frame},
};

type Error = Box<dyn std::error::Error>;

/// Open capture device producing frames on demand.
pub trait FrameSource: Send {
    /// Read the next frame. `Ok(None)` marks the end of the stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Factory acquiring exclusive access to a capture device.
pub trait Sensor: Send + Sync {
    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, StreamError>;
}

/// Capture settings of a V4L2 camera.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// FourCC of the capture format, one of `MJPG`, `RGB3` or `BGR3`.
    pub format: String,
    /// Requested resolution, the largest supported one if unset.
    pub resolution: Option<(u32, u32)>,
    /// Requested frames per second, the highest supported rate if unset.
    pub frame_rate: Option<u32>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            format: "MJPG".into(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// Sensor opening video devices on a Linux machine.
pub struct V4lSensor {
    settings: CameraSettings,
}

impl V4lSensor {
    pub fn new(settings: CameraSettings) -> Self {
        Self { settings }
    }

    fn start_camera(&self, device: &str) -> Result<V4lCamera, Error> {
        let format = self.settings.format.as_bytes();
        let pixel_format = PixelFormat::from_fourcc(format)
            .ok_or_else(|| simple_error!("Unsupported format {}", &self.settings.format))?;

        let mut cam = Camera::new(device)?;
        log_supported_formats(&cam, &self.settings.format);

        let resolution = self
            .settings
            .resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let interval = self
            .settings
            .frame_rate
            .map(|fps| Ok((1, fps)))
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        cam.start(&Config {
            interval,
            resolution,
            format,
            ..Default::default()
        })?;

        log::info!(
            "Using camera {} at {}x{}, interval {}/{}",
            device,
            resolution.0,
            resolution.1,
            interval.0,
            interval.1
        );

        Ok(V4lCamera {
            device: device.to_owned(),
            cam,
            pixel_format,
        })
    }
}

impl Sensor for V4lSensor {
    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, StreamError> {
        match self.start_camera(device) {
            Ok(camera) => Ok(Box::new(camera)),
            Err(err) => Err(StreamError::DeviceUnavailable {
                device: device.to_owned(),
                reason: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PixelFormat {
    Mjpg,
    Rgb,
    Bgr,
}

impl PixelFormat {
    fn from_fourcc(fourcc: &[u8]) -> Option<Self> {
        match fourcc {
            b"MJPG" => Some(Self::Mjpg),
            b"RGB3" => Some(Self::Rgb),
            b"BGR3" => Some(Self::Bgr),
            _ => None,
        }
    }
}

/// Started camera, stopped and closed when dropped.
pub struct V4lCamera {
    device: String,
    cam: Camera,
    pixel_format: PixelFormat,
}

impl FrameSource for V4lCamera {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let captured = self.cam.capture()?;
        let (width, height) = captured.resolution;

        let frame = match self.pixel_format {
            PixelFormat::Mjpg => {
                let image: image::RgbImage = turbojpeg::decompress_image(&captured[..])
                    .map_err(|e| CaptureError::Decode(e.to_string()))?;
                Frame::from_rgb(image)
            }
            PixelFormat::Rgb => Frame::new(width, height, ChannelOrder::Rgb, captured.to_vec()),
            PixelFormat::Bgr => Frame::new(width, height, ChannelOrder::Bgr, captured.to_vec()),
        };

        Ok(Some(frame))
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        if let Err(e) = self.cam.stop() {
            log::debug!("Stopping {} failed: {}", &self.device, e);
        }
        log::info!("Released camera {}", &self.device);
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height) num_pixels)
            .map(|res| (res, res.0 * res.1))
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the shortest frame interval for the given format and resolution.
///
/// Intervals are `(numerator, denominator)` seconds per frame.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(num, _)| *num > 0)
            .max_by(|a, b| frames_per_second(a).total_cmp(&frames_per_second(b)))
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn frames_per_second(interval: &(u32, u32)) -> f64 {
    interval.1 as f64 / interval.0 as f64
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn interval_to_frame_rate() {
        assert_eq!(frames_per_second(&(1, 30)), 30.0);
        assert_eq!(frames_per_second(&(2, 15)), 7.5);
    }

    #[test]
    fn unsupported_format_is_unavailable() {
        let sensor = V4lSensor::new(CameraSettings {
            format: "YUYV".into(),
            ..Default::default()
        });

        match sensor.open("/dev/video0") {
            Err(StreamError::DeviceUnavailable { device, reason }) => {
                assert_eq!(device, "/dev/video0");
                assert!(reason.contains("YUYV"));
            }
            _ => panic!("expected an unavailable device"),
        }
    }

    #[test]
    fn missing_device_is_unavailable() {
        let sensor = V4lSensor::new(CameraSettings::default());
        assert!(matches!(
            sensor.open("/dev/does-not-exist"),
            Err(StreamError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn get_cam_info_if_available() -> Result<(), Error> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                let format = b"MJPG";
                if let Ok(selected_resolution) = get_max_resolution(&cam, format) {
                    let frame_rates = cam.intervals(format, selected_resolution)?;
                    println!("Supported frame rates: {frame_rates:?}");
                }
            }
        }

        Ok(())
    }
}
