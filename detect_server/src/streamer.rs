//! Annotated live streams.
//!
//! A [`StreamController`] hands out one [`Session`] per stream request. A session is a lazy,
//! pull-driven iterator: every call to `next` reads one frame from its source, runs the detector
//! on it and encodes the result, so at most one frame is in flight. The frame source is opened
//! on the first pull and released exactly once, when the session ends or is dropped.
//!
//! Every session owns a [`StopToken`] holding its [`StreamState`]. The controller only keeps
//! weak references to the tokens of live sessions, so a stop request reaches the sessions that
//! are running at that moment and never a session started afterwards.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use futures::Stream;

use crate::{
    encoder::{EncodedChunk, FrameEncoder},
    error::StreamError,
    inferer::Detector,
    meter::METER,
    sensors::{FrameSource, Sensor},
};

/// Run/stop signal of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Running,
    Stopped,
}

/// Shared handle to the state of one session.
#[derive(Debug, Clone)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn state(&self) -> StreamState {
        match self.0.load(Ordering::Relaxed) {
            true => StreamState::Running,
            false => StreamState::Stopped,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == StreamState::Stopped
    }
}

/// Settings applied to every session of a controller.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Device opened by sessions started without an explicit device.
    pub device: String,
    /// Maximum time to produce one chunk, `None` to wait indefinitely.
    pub frame_timeout: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            frame_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Creates streaming sessions and forwards stop requests to them.
pub struct StreamController {
    sensor: Arc<dyn Sensor>,
    detector: Arc<dyn Detector>,
    encoder: Arc<dyn FrameEncoder>,
    settings: StreamSettings,
    sessions: Mutex<Vec<Weak<AtomicBool>>>,
}

impl StreamController {
    pub fn new(
        sensor: Arc<dyn Sensor>,
        detector: Arc<dyn Detector>,
        encoder: Arc<dyn FrameEncoder>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            sensor,
            detector,
            encoder,
            settings,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Start a new session on `device` in the running state.
    ///
    /// The device is not opened before the first frame is pulled.
    pub fn stream(&self, device: &str) -> Session {
        let token = StopToken::new();
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.retain(|state| state.strong_count() > 0);
            sessions.push(Arc::downgrade(&token.0));
        }

        Session {
            device: device.to_owned(),
            token,
            sensor: Arc::clone(&self.sensor),
            detector: Arc::clone(&self.detector),
            encoder: Arc::clone(&self.encoder),
            source: None,
            finished: false,
            frames: 0,
        }
    }

    /// Session on the configured default device.
    pub fn stream_default(&self) -> Session {
        self.stream(&self.settings.device)
    }

    /// Signal every live session to stop. Returns the number of sessions signalled.
    pub fn stop(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut stopped = 0;
        sessions.retain(|state| match state.upgrade() {
            Some(state) => {
                if state.swap(false, Ordering::Relaxed) {
                    stopped += 1;
                }
                false
            }
            None => false,
        });

        log::info!("Stop requested, signalled {} session(s)", stopped);
        stopped
    }

    /// Number of sessions that are still running.
    pub fn active_sessions(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|state| state.load(Ordering::Relaxed))
            .count()
    }
}

/// One streaming session from device open to release.
pub struct Session {
    device: String,
    token: StopToken,
    sensor: Arc<dyn Sensor>,
    detector: Arc<dyn Detector>,
    encoder: Arc<dyn FrameEncoder>,
    source: Option<Box<dyn FrameSource>>,
    finished: bool,
    frames: u64,
}

impl Session {
    pub fn token(&self) -> &StopToken {
        &self.token
    }

    pub fn state(&self) -> StreamState {
        self.token.state()
    }

    /// Number of chunks emitted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn finish(&mut self) {
        self.finished = true;
        self.token.stop();
        self.release();
    }

    fn release(&mut self) {
        if let Some(source) = self.source.take() {
            drop(source);
            METER.session_released();
            log::info!(
                "Released {} after {} frame(s)",
                &self.device,
                self.frames
            );
        }
    }

    /// Produce the next chunk, or `None` once the session has ended.
    fn step(&mut self) -> Option<Result<EncodedChunk, StreamError>> {
        if self.finished {
            return None;
        }

        if self.source.is_none() {
            match self.sensor.open(&self.device) {
                Ok(source) => {
                    log::info!("Opened {}", &self.device);
                    METER.session_opened();
                    self.source = Some(source);
                }
                Err(err) => {
                    log::error!("Session on {} failed to start: {}", &self.device, err);
                    self.finish();
                    return Some(Err(err));
                }
            }
        }

        if self.token.is_stopped() {
            log::info!("Session on {} stopped", &self.device);
            self.finish();
            return None;
        }

        let frame = match self.source.as_mut()?.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("End of stream on {}", &self.device);
                self.finish();
                return None;
            }
            Err(err) => {
                log::warn!("Ending session on {}: {}", &self.device, err);
                self.finish();
                return None;
            }
        };
        METER.tick_captured();

        let encoded = self
            .detector
            .annotate(frame)
            .map_err(StreamError::from)
            .and_then(|frame| self.encoder.encode(&frame).map_err(StreamError::from));

        match encoded {
            Ok(payload) => {
                METER.tick_annotated();
                self.frames += 1;
                Some(Ok(EncodedChunk::new(self.encoder.content_type(), payload)))
            }
            Err(err) => {
                METER.tick_failed();
                log::error!("Session on {} failed: {}", &self.device, err);
                self.finish();
                Some(Err(err))
            }
        }
    }

    /// Adapt the session to an async stream.
    ///
    /// Every pull runs on the blocking thread pool. If a pull takes longer than `frame_timeout`,
    /// a [`StreamError::Timeout`] is yielded and the stream ends; the session is released as
    /// soon as the pending pull returns.
    pub fn into_stream(
        self,
        frame_timeout: Option<Duration>,
    ) -> impl Stream<Item = Result<EncodedChunk, StreamError>> + Send {
        async_stream::stream! {
            let mut session = Some(self);
            while let Some(mut current) = session.take() {
                let pull = tokio::task::spawn_blocking(move || {
                    let item = current.next();
                    (current, item)
                });

                let joined = match frame_timeout {
                    Some(limit) => match tokio::time::timeout(limit, pull).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            log::error!("No frame within {:?}, ending session", limit);
                            yield Err(StreamError::Timeout(limit));
                            break;
                        }
                    },
                    None => pull.await,
                };

                match joined {
                    Ok((current, Some(item))) => {
                        session = Some(current);
                        yield item;
                    }
                    Ok((_, None)) => break,
                    Err(e) => {
                        yield Err(StreamError::Worker(e.to_string()));
                        break;
                    }
                }
            }
        }
    }
}

impl Iterator for Session {
    type Item = Result<EncodedChunk, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.stop();
        self.release();
    }
}
