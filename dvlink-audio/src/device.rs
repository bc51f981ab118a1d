//! Audio hardware capability
//!
//! Stages open their device on their own thread and read or write exactly
//! one 20 ms period per call. Devices are closed when dropped.
//!
//! [`SyntheticBackend`] stands in for hardware: it generates silence or a
//! numbered ramp on capture and records everything written for playback.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dvlink_common::frame::{FRAME_DURATION_MS, SAMPLES_PER_FRAME};

use crate::error::DeviceError;

/// One period of PCM samples
pub type Period = [i16; SAMPLES_PER_FRAME];

/// Microphone side of an audio device
pub trait CaptureDevice {
    /// Fill `buf` with the next period; returns the samples actually read
    fn read_period(&mut self, buf: &mut Period) -> Result<usize, DeviceError>;
}

/// Speaker side of an audio device
pub trait PlaybackDevice {
    /// Play one period; returns the samples actually written
    fn write_period(&mut self, buf: &Period) -> Result<usize, DeviceError>;

    /// Wait for queued audio to finish playing
    fn drain(&mut self) {}
}

/// Opens capture and playback devices
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, DeviceError>;
    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, DeviceError>;
}

// =============================================================================
// Synthetic Backend
// =============================================================================

/// What the synthetic microphone produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// All-zero periods
    Silence,
    /// A ramp whose first sample is the period number
    Ramp,
}

/// Clock-driven stand-in for audio hardware
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    signal: Signal,
    period: Option<Duration>,
    played: Option<Arc<Mutex<Vec<Period>>>>,
}

impl SyntheticBackend {
    /// Unpaced backend: periods are produced and consumed immediately
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            period: None,
            played: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Run at real time, one period every 20 ms
    pub fn paced(mut self) -> Self {
        self.period = Some(Duration::from_millis(FRAME_DURATION_MS));
        self
    }

    /// Throw playback away instead of recording it
    pub fn discarding(mut self) -> Self {
        self.played = None;
        self
    }

    /// Everything written to playback devices so far
    pub fn played(&self) -> Vec<Period> {
        self.played
            .as_ref()
            .map(|played| played.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }
}

impl AudioBackend for SyntheticBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        Ok(Box::new(SyntheticCapture {
            signal: self.signal,
            count: 0,
            pacer: self.period.map(Pacer::new),
        }))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        Ok(Box::new(SyntheticPlayback {
            played: self.played.clone(),
            pacer: self.period.map(Pacer::new),
        }))
    }
}

struct SyntheticCapture {
    signal: Signal,
    count: u64,
    pacer: Option<Pacer>,
}

impl CaptureDevice for SyntheticCapture {
    fn read_period(&mut self, buf: &mut Period) -> Result<usize, DeviceError> {
        if let Some(pacer) = &mut self.pacer {
            pacer.wait();
        }
        match self.signal {
            Signal::Silence => buf.fill(0),
            Signal::Ramp => ramp(buf, self.count),
        }
        self.count += 1;
        Ok(SAMPLES_PER_FRAME)
    }
}

struct SyntheticPlayback {
    played: Option<Arc<Mutex<Vec<Period>>>>,
    pacer: Option<Pacer>,
}

impl PlaybackDevice for SyntheticPlayback {
    fn write_period(&mut self, buf: &Period) -> Result<usize, DeviceError> {
        if let Some(pacer) = &mut self.pacer {
            pacer.wait();
        }
        if let Some(played) = &self.played {
            played
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(*buf);
        }
        Ok(SAMPLES_PER_FRAME)
    }
}

/// Fill `buf` with ramp number `count`
pub fn ramp(buf: &mut Period, count: u64) {
    for (i, sample) in buf.iter_mut().enumerate() {
        *sample = (i as i16).wrapping_mul(64);
    }
    buf[0] = count as i16;
}

/// Sleeps until the next period boundary
struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        } else if now - self.next > self.period {
            // Fell behind; resynchronize instead of bursting
            self.next = now;
        }
        self.next += self.period;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_numbers_periods() {
        let backend = SyntheticBackend::new(Signal::Ramp);
        let mut capture = backend.open_capture().expect("open capture");
        let mut buf = [0; SAMPLES_PER_FRAME];

        for expected in 0..3 {
            let read = capture.read_period(&mut buf).expect("read");
            assert_eq!(read, SAMPLES_PER_FRAME);
            assert_eq!(buf[0], expected);
            assert_eq!(buf[1], 64);
        }
    }

    #[test]
    fn test_silence() {
        let backend = SyntheticBackend::new(Signal::Silence);
        let mut capture = backend.open_capture().expect("open capture");
        let mut buf = [1; SAMPLES_PER_FRAME];
        capture.read_period(&mut buf).expect("read");
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_playback_recorded() {
        let backend = SyntheticBackend::new(Signal::Silence);
        let mut playback = backend.open_playback().expect("open playback");
        let mut buf = [0; SAMPLES_PER_FRAME];
        ramp(&mut buf, 9);
        playback.write_period(&buf).expect("write");

        let played = backend.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0][0], 9);
    }

    #[test]
    fn test_paced_capture_takes_real_time() {
        let backend = SyntheticBackend::new(Signal::Silence).paced();
        let mut capture = backend.open_capture().expect("open capture");
        let mut buf = [0; SAMPLES_PER_FRAME];

        let start = Instant::now();
        for _ in 0..4 {
            capture.read_period(&mut buf).expect("read");
        }
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}
