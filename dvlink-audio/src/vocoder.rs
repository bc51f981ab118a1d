//! Vocoder device collaborator
//!
//! The vocoder is a shared device with two independent directions: PCM in,
//! compressed data out (encode) and compressed data in, PCM out (decode).
//! Results come back in submission order. At most one stage writes and one
//! stage reads per direction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dvlink_common::frame::{COMPRESSED_FRAME_SIZE, SAMPLES_PER_FRAME, SILENT_COMPRESSED};

use crate::device::Period;
use crate::error::VocoderError;

/// One compressed vocoder payload
pub type Payload = [u8; COMPRESSED_FRAME_SIZE];

/// A vocoder device
pub trait Vocoder: Send + Sync {
    fn is_open(&self) -> bool;

    /// Submit one period of PCM for encoding
    fn send_audio(&self, pcm: &Period) -> Result<(), VocoderError>;

    /// Collect the next encoded payload
    fn get_data(&self, out: &mut Payload) -> Result<(), VocoderError>;

    /// Submit one payload for decoding
    fn send_data(&self, data: &Payload) -> Result<(), VocoderError>;

    /// Collect the next decoded period
    fn get_audio(&self, out: &mut Period) -> Result<(), VocoderError>;
}

// =============================================================================
// Loopback Vocoder
// =============================================================================

/// Software vocoder used when no hardware is attached
///
/// Keeps the first four samples of each period verbatim, which is enough to
/// follow frames through the pipeline; silence encodes to the standard
/// silent payload.
pub struct LoopbackVocoder {
    open: AtomicBool,
    timeout: Duration,
    encoded_tx: Sender<Payload>,
    encoded_rx: Receiver<Payload>,
    decoded_tx: Sender<Period>,
    decoded_rx: Receiver<Period>,
}

impl LoopbackVocoder {
    /// Create an open vocoder whose reads give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let (encoded_tx, encoded_rx) = crossbeam_channel::unbounded();
        let (decoded_tx, decoded_rx) = crossbeam_channel::unbounded();
        Self {
            open: AtomicBool::new(true),
            timeout,
            encoded_tx,
            encoded_rx,
            decoded_tx,
            decoded_rx,
        }
    }

    /// Simulate the device going away
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), VocoderError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(VocoderError::NotOpen)
        }
    }

    fn recv<T>(&self, rx: &Receiver<T>) -> Result<T, VocoderError> {
        self.check_open()?;
        match rx.recv_timeout(self.timeout) {
            Ok(item) => Ok(item),
            Err(RecvTimeoutError::Timeout) => Err(VocoderError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(VocoderError::NotOpen),
        }
    }
}

impl Vocoder for LoopbackVocoder {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_audio(&self, pcm: &Period) -> Result<(), VocoderError> {
        self.check_open()?;
        self.encoded_tx
            .send(encode(pcm))
            .map_err(|_| VocoderError::NotOpen)
    }

    fn get_data(&self, out: &mut Payload) -> Result<(), VocoderError> {
        *out = self.recv(&self.encoded_rx)?;
        Ok(())
    }

    fn send_data(&self, data: &Payload) -> Result<(), VocoderError> {
        self.check_open()?;
        self.decoded_tx
            .send(decode(data))
            .map_err(|_| VocoderError::NotOpen)
    }

    fn get_audio(&self, out: &mut Period) -> Result<(), VocoderError> {
        *out = self.recv(&self.decoded_rx)?;
        Ok(())
    }
}

/// Samples carried verbatim in a loopback payload
const KEPT_SAMPLES: usize = 4;

fn encode(pcm: &Period) -> Payload {
    if pcm.iter().all(|&s| s == 0) {
        return SILENT_COMPRESSED;
    }

    let mut out = [0u8; COMPRESSED_FRAME_SIZE];
    for (i, sample) in pcm.iter().take(KEPT_SAMPLES).enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&sample.to_be_bytes());
    }
    let energy = pcm.iter().map(|&s| u64::from(s.unsigned_abs())).sum::<u64>()
        / SAMPLES_PER_FRAME as u64;
    out[COMPRESSED_FRAME_SIZE - 1] = (energy >> 7).min(255) as u8;
    out
}

fn decode(data: &Payload) -> Period {
    let mut pcm = [0i16; SAMPLES_PER_FRAME];
    if *data == SILENT_COMPRESSED {
        return pcm;
    }
    for (i, sample) in pcm.iter_mut().take(KEPT_SAMPLES).enumerate() {
        *sample = i16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
    }
    pcm
}
