//! Pipeline stages and the sessions that own them
//!
//! ```text
//! transmit:  capture -> mic -> encode -> vocoder -> relay -> compressed (echo)
//!                                 |                   |--> packets -> forward
//!                                 +--> encode_tags ---+
//!
//! playback:  compressed -> decode_in -> vocoder -> decode_out -> speaker -> playback
//!                              |                       ^
//!                              +--> decode_tags -------+
//! ```
//!
//! Every stage runs on its own thread and exits after handling the frame
//! that carries the end marker. A stage that fails raises its session's
//! abort flag so siblings waiting on an empty queue stop too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dvlink_common::dsvt::WirePacket;
use dvlink_common::frame::{AudioFrame, CompressedFrame, SAMPLES_PER_FRAME, Sequence};
use tracing::{debug, error, info, warn};

use crate::channel::PacketSink;
use crate::config::Destination;
use crate::device::{AudioBackend, Period};
use crate::error::{DeviceError, Result, VocoderError};
use crate::queue::FrameQueue;
use crate::vocoder::{Payload, Vocoder};

// =============================================================================
// Queues
// =============================================================================

/// Every queue in the pipeline
#[derive(Debug, Default)]
pub struct Queues {
    /// Capture to encode
    pub mic: FrameQueue<AudioFrame>,
    /// Sequence tags travelling alongside PCM sent to the vocoder
    pub encode_tags: FrameQueue<Sequence>,
    /// Echo relay or network receive to decode
    pub compressed: FrameQueue<CompressedFrame>,
    /// Sequence tags travelling alongside payloads sent to the vocoder
    pub decode_tags: FrameQueue<Sequence>,
    /// Decode to playback
    pub speaker: FrameQueue<AudioFrame>,
    /// Outbound packets for the gateway
    pub gateway: FrameQueue<WirePacket>,
    /// Outbound packets for the link service
    pub link: FrameQueue<WirePacket>,
}

impl Queues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbound packet queue for `destination`
    pub fn packets(&self, destination: Destination) -> Option<&FrameQueue<WirePacket>> {
        match destination {
            Destination::Loopback => None,
            Destination::Gateway => Some(&self.gateway),
            Destination::Link => Some(&self.link),
        }
    }

    /// Empty every queue
    pub fn clear(&self) {
        self.mic.clear();
        self.encode_tags.clear();
        self.compressed.clear();
        self.decode_tags.clear();
        self.speaker.clear();
        self.gateway.clear();
        self.link.clear();
    }

    /// Empty the queues feeding playback
    pub fn clear_playback(&self) {
        self.decode_tags.clear();
        self.speaker.clear();
    }
}

// =============================================================================
// Stage Context
// =============================================================================

/// What every stage of a session shares
#[derive(Clone)]
pub struct StageContext {
    pub queues: Arc<Queues>,
    pub vocoder: Arc<dyn Vocoder>,
    pub abort: Arc<AtomicBool>,
    /// Sleep between polls of an empty queue
    pub retry: Duration,
}

impl StageContext {
    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Run a vocoder read until it succeeds
    ///
    /// Timeouts are retried; returns `Ok(false)` if the session aborts first.
    fn vocoder_read(
        &self,
        mut read: impl FnMut(&dyn Vocoder) -> Result<(), VocoderError>,
    ) -> Result<bool> {
        loop {
            if self.aborted() {
                return Ok(false);
            }
            if !self.vocoder.is_open() {
                return Err(VocoderError::NotOpen.into());
            }
            match read(self.vocoder.as_ref()) {
                Ok(()) => return Ok(true),
                Err(VocoderError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Next encoded frame, tagged with the sequence of the PCM it came from
    fn next_encoded(&self) -> Result<Option<CompressedFrame>> {
        let mut data: Payload = [0; 9];
        if !self.vocoder_read(|v| v.get_data(&mut data))? {
            return Ok(None);
        }
        let seq = self.queues.encode_tags.pop_wait(&self.abort, self.retry);
        Ok(seq.map(|seq| CompressedFrame::new(data, seq)))
    }
}

// =============================================================================
// Session
// =============================================================================

struct Stage {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// A group of stages started together and joined together
pub struct Session {
    kind: &'static str,
    abort: Arc<AtomicBool>,
    stages: Vec<Stage>,
}

impl Session {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            abort: Arc::new(AtomicBool::new(false)),
            stages: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Context for stages of this session
    pub fn context(
        &self,
        queues: Arc<Queues>,
        vocoder: Arc<dyn Vocoder>,
        retry: Duration,
    ) -> StageContext {
        StageContext {
            queues,
            vocoder,
            abort: self.abort.clone(),
            retry,
        }
    }

    /// Start `stage` on its own thread
    pub fn spawn<F>(&mut self, name: &'static str, stage: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let abort = self.abort.clone();
        let handle = thread::Builder::new()
            .name(format!("dv-{}", name))
            .spawn(move || {
                let _guard = AbortOnPanic(abort.clone());
                match stage() {
                    Ok(()) => debug!(stage = name, "stage finished"),
                    Err(e) => {
                        warn!(stage = name, "stage stopped: {}", e);
                        abort.store(true, Ordering::SeqCst);
                    }
                }
            })?;
        self.stages.push(Stage { name, handle });
        Ok(())
    }

    /// Make waiting stages give up
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Whether every stage has exited
    pub fn is_finished(&self) -> bool {
        self.stages.iter().all(|s| s.handle.is_finished())
    }

    /// Wait for every stage; returns false if the session was aborted
    pub fn join(self) -> bool {
        for stage in self.stages {
            if stage.handle.join().is_err() {
                error!(session = self.kind, stage = stage.name, "stage panicked");
            }
        }
        !self.abort.load(Ordering::SeqCst)
    }
}

/// Raises the abort flag if a stage thread unwinds
struct AbortOnPanic(Arc<AtomicBool>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Transmit Stages
// =============================================================================

/// Read the microphone into the mic queue until `hot_mic` drops
///
/// The period read after `hot_mic` clears is tagged with the end marker and
/// is the last one produced.
pub fn capture(ctx: &StageContext, backend: &dyn AudioBackend, hot_mic: &AtomicBool) -> Result<()> {
    let mut device = backend.open_capture()?;
    let mut count = 0u64;

    loop {
        let mut samples: Period = [0; SAMPLES_PER_FRAME];
        match device.read_period(&mut samples) {
            Ok(read) if read < SAMPLES_PER_FRAME => {
                warn!(read, "short capture read");
            }
            Ok(_) => {}
            Err(DeviceError::Overrun) => warn!("capture overrun"),
            Err(e) => warn!("capture read failed: {}", e),
        }

        let keep_running = hot_mic.load(Ordering::SeqCst);
        let mut seq = Sequence::from_count(count);
        if !keep_running {
            seq = seq.with_end();
        }
        ctx.queues.mic.push(AudioFrame::new(samples, seq));
        count += 1;

        if !keep_running || ctx.aborted() {
            break;
        }
    }

    info!(frames = count, "capture finished");
    Ok(())
}

/// Feed captured PCM to the vocoder
pub fn encode(ctx: &StageContext) -> Result<()> {
    while let Some(frame) = ctx.queues.mic.pop_wait(&ctx.abort, ctx.retry) {
        if !ctx.vocoder.is_open() {
            return Err(VocoderError::NotOpen.into());
        }
        ctx.vocoder.send_audio(&frame.samples)?;
        ctx.queues.encode_tags.push(frame.seq);
        if frame.seq.is_end() {
            break;
        }
    }
    Ok(())
}

/// Collect encoded frames for local replay
pub fn echo_relay(ctx: &StageContext) -> Result<()> {
    while let Some(frame) = ctx.next_encoded()? {
        ctx.queues.compressed.push(frame);
        if frame.seq.is_end() {
            break;
        }
    }
    Ok(())
}

/// Wrap encoded frames into packets for `destination`
///
/// `header` is queued ahead of the first voice packet; voice packets reuse
/// its stream id and carry the frame's sequence tag as their control byte.
pub fn packet_relay(ctx: &StageContext, destination: Destination, header: WirePacket) -> Result<()> {
    let Some(queue) = ctx.queues.packets(destination) else {
        return Err(crate::error::AudioError::NotPacketDestination(destination));
    };
    let stream_id = header.stream_id;
    let mut header = Some(header);

    while let Some(frame) = ctx.next_encoded()? {
        if let Some(header) = header.take() {
            queue.push(header);
        }
        queue.push(WirePacket::voice(stream_id, &frame));
        if frame.seq.is_end() {
            break;
        }
    }
    Ok(())
}

/// Drain the outbound queue for `destination` into its channel
pub fn forward(ctx: &StageContext, destination: Destination, sink: &dyn PacketSink) -> Result<()> {
    let Some(queue) = ctx.queues.packets(destination) else {
        return Err(crate::error::AudioError::NotPacketDestination(destination));
    };

    let mut sent = 0usize;
    while let Some(packet) = queue.pop_wait(&ctx.abort, ctx.retry) {
        match sink.send(&packet.to_bytes()) {
            Ok(()) => sent += 1,
            Err(e) => warn!(?destination, "failed to deliver packet: {}", e),
        }
        if packet.is_last() {
            break;
        }
    }

    debug!(?destination, sent, "forwarder finished");
    Ok(())
}

// =============================================================================
// Playback Stages
// =============================================================================

/// Feed compressed frames to the vocoder
///
/// A stream that stays quiet for `idle` is closed with a silent end-marked
/// frame, so playback ends even when the real end-marked packet is lost.
pub fn decode_in(ctx: &StageContext, idle: Duration) -> Result<()> {
    let mut last: Option<Sequence> = None;

    loop {
        let deadline = Instant::now() + idle;
        let frame = match ctx.queues.compressed.pop_wait_until(&ctx.abort, ctx.retry, deadline) {
            Some(frame) => frame,
            None if ctx.aborted() => break,
            None => {
                let next = last.map_or(0, |seq| u64::from(seq.value()) + 1);
                warn!(?idle, "stream went quiet, closing playback");
                CompressedFrame::silence(Sequence::from_count(next).with_end())
            }
        };
        last = Some(frame.seq);

        ctx.queues.decode_tags.push(frame.seq);
        if !ctx.vocoder.is_open() {
            return Err(VocoderError::NotOpen.into());
        }
        ctx.vocoder.send_data(&frame.data)?;
        if frame.seq.is_end() {
            break;
        }
    }
    Ok(())
}

/// Collect decoded PCM for the speaker
pub fn decode_out(ctx: &StageContext) -> Result<()> {
    loop {
        let mut samples: Period = [0; SAMPLES_PER_FRAME];
        if !ctx.vocoder_read(|v| v.get_audio(&mut samples))? {
            return Ok(());
        }
        let Some(seq) = ctx.queues.decode_tags.pop_wait(&ctx.abort, ctx.retry) else {
            return Ok(());
        };
        ctx.queues.speaker.push(AudioFrame::new(samples, seq));
        if seq.is_end() {
            return Ok(());
        }
    }
}

/// Play decoded PCM after letting `prebuffer` worth of audio accumulate
pub fn playback(ctx: &StageContext, backend: &dyn AudioBackend, prebuffer: Duration) -> Result<()> {
    thread::sleep(prebuffer);
    let mut device = backend.open_playback()?;
    let mut played = 0usize;

    while let Some(frame) = ctx.queues.speaker.pop_wait(&ctx.abort, ctx.retry) {
        match device.write_period(&frame.samples) {
            Ok(written) if written < SAMPLES_PER_FRAME => {
                warn!(written, "short playback write");
            }
            Ok(_) => {}
            Err(DeviceError::Underrun) => warn!("playback underrun"),
            Err(e) => warn!("playback write failed: {}", e),
        }
        played += 1;
        if frame.seq.is_end() {
            break;
        }
    }

    device.drain();
    info!(frames = played, "playback finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Signal, SyntheticBackend};
    use crate::vocoder::LoopbackVocoder;

    const RETRY: Duration = Duration::from_millis(1);

    fn context(session: &Session) -> StageContext {
        session.context(
            Arc::new(Queues::new()),
            Arc::new(LoopbackVocoder::new(Duration::from_millis(20))),
            RETRY,
        )
    }

    #[test]
    fn test_encode_passes_tags_through() {
        let session = Session::new("test");
        let ctx = context(&session);
        for n in 0..3u64 {
            let mut seq = Sequence::from_count(n);
            if n == 2 {
                seq = seq.with_end();
            }
            ctx.queues.mic.push(AudioFrame::silence(seq));
        }

        encode(&ctx).expect("encode");
        echo_relay(&ctx).expect("relay");

        let tags: Vec<u8> = std::iter::from_fn(|| ctx.queues.compressed.pop())
            .map(|f| f.seq.to_byte())
            .collect();
        assert_eq!(tags, vec![0, 1, 0x42]);
    }

    #[test]
    fn test_encode_stops_when_vocoder_closed() {
        let session = Session::new("test");
        let vocoder = Arc::new(LoopbackVocoder::new(Duration::from_millis(20)));
        vocoder.close();
        let ctx = session.context(Arc::new(Queues::new()), vocoder, RETRY);
        ctx.queues.mic.push(AudioFrame::silence(Sequence::from_count(0)));

        assert!(encode(&ctx).is_err());
        assert!(ctx.queues.encode_tags.is_empty());
    }

    #[test]
    fn test_failed_stage_aborts_siblings() {
        let mut session = Session::new("test");
        let ctx = context(&session);

        let waiting = ctx.clone();
        session
            .spawn("waiter", move || decode_in(&waiting, Duration::from_secs(60)))
            .expect("spawn");
        session
            .spawn("failer", || Err(VocoderError::NotOpen.into()))
            .expect("spawn");

        assert!(!session.join());
    }

    #[test]
    fn test_decode_in_closes_quiet_stream() {
        let session = Session::new("test");
        let ctx = context(&session);
        ctx.queues.compressed.push(CompressedFrame::silence(Sequence::from_count(0)));
        ctx.queues.compressed.push(CompressedFrame::silence(Sequence::from_count(1)));

        decode_in(&ctx, Duration::from_millis(20)).expect("decode");

        let tags: Vec<u8> = std::iter::from_fn(|| ctx.queues.decode_tags.pop())
            .map(Sequence::to_byte)
            .collect();
        assert_eq!(tags, vec![0, 1, 2 | 0x40]);
    }

    #[test]
    fn test_packet_relay_header_first() {
        let session = Session::new("test");
        let ctx = context(&session);
        ctx.queues.mic.push(AudioFrame::silence(Sequence::from_count(0)));
        ctx.queues
            .mic
            .push(AudioFrame::silence(Sequence::from_count(1).with_end()));

        let header = WirePacket::header(
            0x1234,
            dvlink_common::dsvt::RadioHeader::new("N0CALL", 'D', "CQCQCQ", "N0CALL"),
        );
        encode(&ctx).expect("encode");
        packet_relay(&ctx, Destination::Gateway, header).expect("relay");

        let packets: Vec<_> = std::iter::from_fn(|| ctx.queues.gateway.pop()).collect();
        assert_eq!(packets.len(), 3);
        assert!(packets[0].is_header());
        assert_eq!(packets[1].ctrl, 0x00);
        assert_eq!(packets[2].ctrl, 0x41);
        assert!(packets.iter().all(|p| p.stream_id == 0x1234));
        assert!(packets[2].is_last());
    }

    #[test]
    fn test_playback_stops_at_end_marker() {
        let session = Session::new("test");
        let ctx = context(&session);
        let backend = SyntheticBackend::new(Signal::Silence);
        for n in 0..4u64 {
            let mut seq = Sequence::from_count(n);
            if n == 2 {
                seq = seq.with_end();
            }
            ctx.queues.speaker.push(AudioFrame::silence(seq));
        }

        playback(&ctx, &backend, Duration::ZERO).expect("playback");
        assert_eq!(backend.played().len(), 3);
        assert_eq!(ctx.queues.speaker.len(), 1);
    }
}
