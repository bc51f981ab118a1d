//! Sound card access through cpal
//!
//! cpal delivers samples on its own callback thread. Capture callbacks
//! append to a shared ring and `read_period` takes 160 samples at a time;
//! playback works the other way round. Streams are not `Send`, so devices
//! are opened on the stage thread that uses them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use dvlink_common::frame::{SAMPLE_RATE, SAMPLES_PER_FRAME};

use crate::device::{AudioBackend, CaptureDevice, Period, PlaybackDevice};
use crate::error::DeviceError;

// =============================================================================
// Constants
// =============================================================================

/// Name that selects the host's default device
pub const SYSTEM_DEFAULT_DEVICE_NAME: &str = "default";

/// Periods held before the oldest captured audio is discarded
const MAX_CAPTURE_PERIODS: usize = 10;

/// Periods queued for the speaker before writers are held back
const MAX_PLAYBACK_PERIODS: usize = 8;

/// Longest wait for a full period before a short read is reported
const PERIOD_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest wait for queued playback to finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const POLL: Duration = Duration::from_millis(2);

type SampleRing = Arc<Mutex<VecDeque<i16>>>;

// =============================================================================
// Device Lookup
// =============================================================================

/// Names of the input and output devices the default host offers
pub fn list_devices() -> (Vec<String>, Vec<String>) {
    let host = cpal::default_host();
    let inputs = host.input_devices().map(device_names).unwrap_or_default();
    let outputs = host.output_devices().map(device_names).unwrap_or_default();
    (inputs, outputs)
}

fn device_names(devices: impl Iterator<Item = Device>) -> Vec<String> {
    devices
        .filter_map(|d| d.description().ok().map(|desc| desc.name().to_string()))
        .collect()
}

fn find_input_device(name: &str) -> Option<Device> {
    let host = cpal::default_host();
    if name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME {
        return host.default_input_device();
    }
    host.input_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_input_device())
}

fn find_output_device(name: &str) -> Option<Device> {
    let host = cpal::default_host();
    if name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME {
        return host.default_output_device();
    }
    host.output_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_output_device())
}

fn open_error(direction: &'static str, reason: impl ToString) -> DeviceError {
    DeviceError::Open {
        direction,
        reason: reason.to_string(),
    }
}

/// Sample format to use for an 8 kHz mono stream
fn pick_format(
    configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
) -> Option<SampleFormat> {
    let supported = [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];
    let usable: Vec<SampleFormat> = configs
        .filter(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SAMPLE_RATE
                && c.max_sample_rate() >= SAMPLE_RATE
                && supported.contains(&c.sample_format())
        })
        .map(|c| c.sample_format())
        .collect();

    supported.into_iter().find(|f| usable.contains(f))
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        buffer_size: cpal::BufferSize::Default,
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Audio hardware reached through the platform's default cpal host
#[derive(Debug, Clone)]
pub struct CpalBackend {
    input_device: String,
    output_device: String,
}

impl CpalBackend {
    /// # Arguments
    ///
    /// * `input_device` - Microphone name, or empty for the default
    /// * `output_device` - Speaker name, or empty for the default
    pub fn new(input_device: &str, output_device: &str) -> Self {
        Self {
            input_device: input_device.to_string(),
            output_device: output_device.to_string(),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        let device = find_input_device(&self.input_device)
            .ok_or_else(|| open_error("capture", "input device not found"))?;
        let format = pick_format(
            device
                .supported_input_configs()
                .map_err(|e| open_error("capture", e))?,
        )
        .ok_or_else(|| open_error("capture", "no 8 kHz mono input format"))?;

        let ring: SampleRing = Arc::new(Mutex::new(VecDeque::new()));
        let overrun = Arc::new(AtomicBool::new(false));
        let (error_tx, error_rx) = crossbeam_channel::unbounded();

        let stream = match format {
            SampleFormat::I16 => build_input::<i16>(&device, ring.clone(), overrun.clone(), error_tx),
            SampleFormat::F32 => build_input::<f32>(&device, ring.clone(), overrun.clone(), error_tx),
            SampleFormat::U16 => build_input::<u16>(&device, ring.clone(), overrun.clone(), error_tx),
            other => return Err(open_error("capture", format!("unsupported format {:?}", other))),
        }?;
        stream.play().map_err(|e| open_error("capture", e))?;

        Ok(Box::new(CpalCapture {
            _stream: stream,
            ring,
            overrun,
            error_rx,
        }))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        let device = find_output_device(&self.output_device)
            .ok_or_else(|| open_error("playback", "output device not found"))?;
        let format = pick_format(
            device
                .supported_output_configs()
                .map_err(|e| open_error("playback", e))?,
        )
        .ok_or_else(|| open_error("playback", "no 8 kHz mono output format"))?;

        let ring: SampleRing = Arc::new(Mutex::new(VecDeque::new()));
        let flags = PlaybackFlags::default();
        let (error_tx, error_rx) = crossbeam_channel::unbounded();

        let stream = match format {
            SampleFormat::I16 => build_output::<i16>(&device, ring.clone(), flags.clone(), error_tx),
            SampleFormat::F32 => build_output::<f32>(&device, ring.clone(), flags.clone(), error_tx),
            SampleFormat::U16 => build_output::<u16>(&device, ring.clone(), flags.clone(), error_tx),
            other => return Err(open_error("playback", format!("unsupported format {:?}", other))),
        }?;
        stream.play().map_err(|e| open_error("playback", e))?;

        Ok(Box::new(CpalPlayback {
            _stream: stream,
            ring,
            flags,
            error_rx,
        }))
    }
}

// =============================================================================
// Capture
// =============================================================================

struct CpalCapture {
    _stream: Stream,
    ring: SampleRing,
    overrun: Arc<AtomicBool>,
    error_rx: Receiver<String>,
}

impl CaptureDevice for CpalCapture {
    fn read_period(&mut self, buf: &mut Period) -> Result<usize, DeviceError> {
        if let Ok(message) = self.error_rx.try_recv() {
            return Err(DeviceError::Stream(message));
        }

        let deadline = Instant::now() + PERIOD_TIMEOUT;
        loop {
            {
                let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
                if ring.len() >= SAMPLES_PER_FRAME || Instant::now() >= deadline {
                    let read = ring.len().min(SAMPLES_PER_FRAME);
                    for (slot, sample) in buf.iter_mut().zip(ring.drain(..read)) {
                        *slot = sample;
                    }
                    buf[read..].fill(0);

                    if self.overrun.swap(false, Ordering::SeqCst) {
                        return Err(DeviceError::Overrun);
                    }
                    return Ok(read);
                }
            }
            thread::sleep(POLL);
        }
    }
}

fn build_input<T>(
    device: &Device,
    ring: SampleRing,
    overrun: Arc<AtomicBool>,
    error_tx: Sender<String>,
) -> Result<Stream, DeviceError>
where
    T: Sample + cpal::SizedSample,
    i16: FromSample<T>,
{
    let limit = SAMPLES_PER_FRAME * MAX_CAPTURE_PERIODS;
    device
        .build_input_stream(
            &stream_config(),
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut ring = ring.lock().unwrap_or_else(PoisonError::into_inner);
                ring.extend(data.iter().map(|&s| i16::from_sample(s)));
                if ring.len() > limit {
                    let excess = ring.len() - limit;
                    ring.drain(..excess);
                    overrun.store(true, Ordering::SeqCst);
                }
            },
            move |err| {
                let _ = error_tx.send(err.to_string());
            },
            None,
        )
        .map_err(|e| open_error("capture", e))
}

// =============================================================================
// Playback
// =============================================================================

/// State shared with the output callback
#[derive(Clone, Default)]
struct PlaybackFlags {
    underrun: Arc<AtomicBool>,
    /// Set once the writer has queued its last period
    draining: Arc<AtomicBool>,
}

struct CpalPlayback {
    _stream: Stream,
    ring: SampleRing,
    flags: PlaybackFlags,
    error_rx: Receiver<String>,
}

impl CpalPlayback {
    fn queued(&self) -> usize {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl PlaybackDevice for CpalPlayback {
    fn write_period(&mut self, buf: &Period) -> Result<usize, DeviceError> {
        if let Ok(message) = self.error_rx.try_recv() {
            return Err(DeviceError::Stream(message));
        }

        // Hold the writer back to real time once the ring is full
        let limit = SAMPLES_PER_FRAME * MAX_PLAYBACK_PERIODS;
        while self.queued() > limit {
            thread::sleep(POLL);
        }

        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(buf.iter().copied());

        if self.flags.underrun.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::Underrun);
        }
        Ok(SAMPLES_PER_FRAME)
    }

    fn drain(&mut self) {
        self.flags.draining.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.queued() > 0 && Instant::now() < deadline {
            thread::sleep(POLL);
        }
    }
}

/// Move queued samples into a callback buffer, padding with silence
///
/// Returns true when the ring ran short in the middle of a stream. Running
/// dry while `draining` is the normal end of playback.
fn fill_output<T>(ring: &mut VecDeque<i16>, data: &mut [T], draining: bool) -> bool
where
    T: Sample + FromSample<i16>,
{
    let starved = !ring.is_empty() && ring.len() < data.len();
    for slot in data.iter_mut() {
        *slot = T::from_sample(ring.pop_front().unwrap_or(0));
    }
    starved && !draining
}

fn build_output<T>(
    device: &Device,
    ring: SampleRing,
    flags: PlaybackFlags,
    error_tx: Sender<String>,
) -> Result<Stream, DeviceError>
where
    T: Sample + cpal::SizedSample + FromSample<i16>,
{
    device
        .build_output_stream(
            &stream_config(),
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut ring = ring.lock().unwrap_or_else(PoisonError::into_inner);
                let draining = flags.draining.load(Ordering::SeqCst);
                if fill_output(&mut ring, data, draining) {
                    flags.underrun.store(true, Ordering::SeqCst);
                }
            },
            move |err| {
                let _ = error_tx.send(err.to_string());
            },
            None,
        )
        .map_err(|e| open_error("playback", e))
}
