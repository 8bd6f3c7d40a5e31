//! In-memory raster frames passed between capture, detection and encoding.
//!
use image::RgbImage;

use crate::error::DetectionError;

/// Order of the three colour channels of each pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Decoded 8-bit, three-channel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            order,
            data,
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height, ChannelOrder::Rgb, image.into_raw())
    }

    /// Number of bytes the pixel buffer must hold for the frame dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Convert into an RGB image, swapping channels of BGR frames.
    pub fn into_rgb(self) -> Result<RgbImage, DetectionError> {
        let expected = self.expected_len();
        let actual = self.data.len();
        if self.is_empty() || actual != expected {
            return Err(DetectionError::MalformedFrame { expected, actual });
        }

        let mut data = self.data;
        if self.order == ChannelOrder::Bgr {
            data.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
        }

        RgbImage::from_raw(self.width, self.height, data)
            .ok_or(DetectionError::MalformedFrame { expected, actual })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bgr_frames_are_swapped_to_rgb() {
        let frame = Frame::new(2, 1, ChannelOrder::Bgr, vec![1, 2, 3, 4, 5, 6]);
        let image = frame.into_rgb().unwrap();

        assert_eq!(image.into_raw(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn short_buffer_is_malformed() {
        let frame = Frame::new(2, 2, ChannelOrder::Rgb, vec![0; 5]);

        match frame.into_rgb() {
            Err(DetectionError::MalformedFrame { expected, actual }) => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn zero_sized_frame_is_empty() {
        assert!(Frame::new(0, 10, ChannelOrder::Rgb, vec![]).is_empty());
    }
}
