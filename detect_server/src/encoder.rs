//! Frame encoding and multipart framing of encoded frames.
//!
use bytes::{BufMut, Bytes, BytesMut};
use turbojpeg::{Image, PixelFormat, Subsamp};

use crate::{
    error::EncodeError,
    frame::{ChannelOrder, Frame},
};

/// Boundary separating the parts of a `multipart/x-mixed-replace` response.
pub const BOUNDARY: &str = "frame";

/// Content type of the streaming response.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Compresses annotated frames for transport.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError>;

    /// MIME type of the encoded payload.
    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }
}

/// JPEG encoder with a fixed quality setting.
pub struct JpegEncoder {
    quality: i32,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100) as i32,
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(EncodeError::EmptyFrame);
        }
        let expected = frame.expected_len();
        if frame.data.len() != expected {
            return Err(EncodeError::BufferSize {
                expected,
                actual: frame.data.len(),
            });
        }

        let format = match frame.order {
            ChannelOrder::Rgb => PixelFormat::RGB,
            ChannelOrder::Bgr => PixelFormat::BGR,
        };
        let image = Image {
            pixels: frame.data.as_slice(),
            width: frame.width as usize,
            pitch: frame.width as usize * 3,
            height: frame.height as usize,
            format,
        };

        let buf = turbojpeg::compress(image, self.quality, Subsamp::Sub2x2)
            .map_err(|e| EncodeError::Codec(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&buf))
    }
}

/// One encoded frame ready for multipart transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    content_type: &'static str,
    payload: Bytes,
}

impl EncodedChunk {
    pub fn new(content_type: &'static str, payload: Bytes) -> Self {
        Self {
            content_type,
            payload,
        }
    }

    /// Plain text part used to report a failed session to the client.
    pub fn error_message(message: &str) -> Self {
        Self::new("text/plain", Bytes::copy_from_slice(message.as_bytes()))
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Frame the payload as `--frame\r\nContent-Type: <type>\r\n\r\n<payload>\r\n`.
    pub fn into_part(self) -> Bytes {
        let header = format!("--{}\r\nContent-Type: {}\r\n\r\n", BOUNDARY, self.content_type);
        let mut buf = BytesMut::with_capacity(header.len() + self.payload.len() + 2);
        buf.put_slice(header.as_bytes());
        buf.put_slice(&self.payload);
        buf.put_slice(b"\r\n");

        buf.freeze()
    }
}
