//! Scripted sensors, detectors and encoders for the streaming tests.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use detect_server::{
    encoder::FrameEncoder,
    error::{CaptureError, DetectionError, EncodeError, StreamError},
    frame::{ChannelOrder, Frame},
    inferer::Detector,
    sensors::{FrameSource, Sensor},
};

/// Open, close and read counts shared by a sensor and its sources.
#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub reads: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// What a scripted source does once its frames are used up.
#[derive(Clone, Copy)]
pub enum Ending {
    EndOfStream,
    CaptureError,
}

#[derive(Clone, Copy)]
pub enum Script {
    /// Yield this many 2x2 frames, then end.
    Frames(usize, Ending),
    /// Yield zero-sized frames forever.
    EmptyFrames,
    /// Refuse to open.
    Unavailable,
}

pub struct ScriptedSensor {
    pub script: Script,
    pub counters: Arc<Counters>,
}

impl ScriptedSensor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn frames(n: usize) -> Self {
        Self::new(Script::Frames(n, Ending::EndOfStream))
    }

    pub fn endless() -> Self {
        Self::frames(usize::MAX)
    }
}

impl Sensor for ScriptedSensor {
    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, StreamError> {
        if let Script::Unavailable = self.script {
            return Err(StreamError::DeviceUnavailable {
                device: device.to_owned(),
                reason: "no such device".into(),
            });
        }

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script: self.script,
            produced: 0,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedSource {
    script: Script,
    produced: usize,
    counters: Arc<Counters>,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Frames(n, ending) if self.produced >= n => match ending {
                Ending::EndOfStream => Ok(None),
                Ending::CaptureError => Err(CaptureError::Decode("corrupt frame".into())),
            },
            Script::Frames(..) => {
                let index = (self.produced % 256) as u8;
                self.produced += 1;
                Ok(Some(Frame::new(2, 2, ChannelOrder::Rgb, vec![index; 12])))
            }
            Script::EmptyFrames => Ok(Some(Frame::new(0, 0, ChannelOrder::Rgb, vec![]))),
            Script::Unavailable => unreachable!("unavailable sources are never opened"),
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct IdentityDetector;

impl Detector for IdentityDetector {
    fn annotate(&self, frame: Frame) -> Result<Frame, DetectionError> {
        Ok(frame)
    }
}

/// Fails on the given call, counting from one.
pub struct FailingDetector {
    pub fail_on: usize,
    pub calls: AtomicUsize,
}

impl FailingDetector {
    pub fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Detector for FailingDetector {
    fn annotate(&self, frame: Frame) -> Result<Frame, DetectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(DetectionError::Model("model exploded".into()));
        }
        Ok(frame)
    }
}

pub struct SlowDetector(pub Duration);

impl Detector for SlowDetector {
    fn annotate(&self, frame: Frame) -> Result<Frame, DetectionError> {
        std::thread::sleep(self.0);
        Ok(frame)
    }
}

pub struct IdentityEncoder;

impl FrameEncoder for IdentityEncoder {
    fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError> {
        if frame.is_empty() {
            return Err(EncodeError::EmptyFrame);
        }
        Ok(Bytes::copy_from_slice(&frame.data))
    }
}
