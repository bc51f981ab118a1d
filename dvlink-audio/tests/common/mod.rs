//! Shared helpers for audio pipeline integration tests

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dvlink_audio::device::{CaptureDevice, Period, PlaybackDevice, ramp};
use dvlink_audio::{
    AudioBackend, AudioConfig, AudioManager, DeviceError, LoopbackVocoder, PacketSink,
    SyntheticBackend,
};
use dvlink_common::dsvt::WirePacket;

/// How long a test waits for an expected outcome
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the loopback vocoder waits before reporting a timeout
pub const VOCODER_TIMEOUT: Duration = Duration::from_millis(20);

/// Configuration with the pipeline's pauses shortened for tests
pub fn fast_config() -> AudioConfig {
    let mut config = AudioConfig::new("N0CALL", "W1AW", 'D');
    config.consumer_retry = Duration::from_millis(1);
    config.playback_retry = Duration::from_millis(1);
    config.echo_settle = Duration::from_millis(10);
    config.playback_prebuffer = Duration::from_millis(10);
    config.frame_pacing = Duration::from_millis(1);
    config.stream_timeout = Duration::from_millis(200);
    config
}

/// Manager over `backend` with a fresh loopback vocoder
pub fn manager(backend: Arc<dyn AudioBackend>) -> AudioManager {
    AudioManager::new(
        fast_config(),
        backend,
        Arc::new(LoopbackVocoder::new(VOCODER_TIMEOUT)),
    )
}

/// Unpaced synthetic backend that records playback
pub fn recorder() -> Arc<SyntheticBackend> {
    Arc::new(SyntheticBackend::new(dvlink_audio::Signal::Silence))
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Packet sink that keeps every datagram
#[derive(Default)]
pub struct RecordingSink {
    datagrams: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn packets(&self) -> Vec<WirePacket> {
        self.datagrams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|d| WirePacket::from_bytes(d).expect("sink received a valid packet"))
            .collect()
    }
}

impl PacketSink for RecordingSink {
    fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.datagrams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(datagram.to_vec());
        Ok(())
    }
}

// =============================================================================
// Key-Off Backend
// =============================================================================

/// Microphone that produces numbered ramps and keys off after `frames` reads
pub struct KeyOffBackend {
    frames: u64,
    hot_mic: Arc<AtomicBool>,
    reads: Arc<AtomicU64>,
}

impl KeyOffBackend {
    pub fn new(frames: u64, hot_mic: Arc<AtomicBool>) -> Self {
        Self {
            frames,
            hot_mic,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl AudioBackend for KeyOffBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        Ok(Box::new(KeyOffCapture {
            frames: self.frames,
            hot_mic: self.hot_mic.clone(),
            reads: self.reads.clone(),
        }))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        Err(DeviceError::Open {
            direction: "playback",
            reason: "capture only".to_string(),
        })
    }
}

struct KeyOffCapture {
    frames: u64,
    hot_mic: Arc<AtomicBool>,
    reads: Arc<AtomicU64>,
}

impl CaptureDevice for KeyOffCapture {
    fn read_period(&mut self, buf: &mut Period) -> Result<usize, DeviceError> {
        let count = self.reads.fetch_add(1, Ordering::SeqCst);
        ramp(buf, count);
        if count + 1 >= self.frames {
            self.hot_mic.store(false, Ordering::SeqCst);
        }
        Ok(buf.len())
    }
}

// =============================================================================
// Dead Microphone
// =============================================================================

/// Backend whose sound card cannot be opened
pub struct DeadMicBackend;

impl AudioBackend for DeadMicBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        Err(DeviceError::Open {
            direction: "capture",
            reason: "unplugged".to_string(),
        })
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        Err(DeviceError::Open {
            direction: "playback",
            reason: "unplugged".to_string(),
        })
    }
}
