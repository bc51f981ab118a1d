//! Session controller for the audio pipeline
//!
//! The [`AudioManager`] owns the queues, the shared vocoder and at most one
//! transmit and one playback session. Callers serialize access to it (the
//! binary keeps it behind a mutex shared with the channel readers).

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use dvlink_common::dsvt::{WirePacket, new_stream_id};
use dvlink_common::frame::{COMPRESSED_FRAME_SIZE, CompressedFrame, Sequence};
use dvlink_common::local::LocalMessage;
use tracing::{debug, info};

use crate::channel::PacketSink;
use crate::config::{AudioConfig, Destination};
use crate::device::AudioBackend;
use crate::error::{AudioError, Result};
use crate::stages::{self, Queues, Session};
use crate::vocoder::Vocoder;

/// Optional leading magic of a stored voice file
const VOICE_FILE_MAGIC: &[u8; 4] = b"AMBE";

/// Stream id meaning no inbound stream is being tracked
const IDLE_STREAM: u16 = 0;

pub struct AudioManager {
    config: AudioConfig,
    backend: Arc<dyn AudioBackend>,
    vocoder: Arc<dyn Vocoder>,
    queues: Arc<Queues>,
    /// Cleared to make the capture stage end-mark its next frame
    hot_mic: Arc<AtomicBool>,
    gateway_sink: Option<Arc<dyn PacketSink>>,
    link_sink: Option<Arc<dyn PacketSink>>,
    transmit: Option<(Destination, Session)>,
    /// Outcome of the last echo recording, until it is played back
    echo_recording: Option<bool>,
    playback: Option<Session>,
    gateway_stream: u16,
    link_stream: u16,
}

impl AudioManager {
    /// Create an idle manager
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration snapshot
    /// * `backend` - Audio hardware
    /// * `vocoder` - Shared vocoder device
    pub fn new(
        config: AudioConfig,
        backend: Arc<dyn AudioBackend>,
        vocoder: Arc<dyn Vocoder>,
    ) -> Self {
        Self {
            config,
            backend,
            vocoder,
            queues: Arc::new(Queues::new()),
            hot_mic: Arc::new(AtomicBool::new(false)),
            gateway_sink: None,
            link_sink: None,
            transmit: None,
            echo_recording: None,
            playback: None,
            gateway_stream: IDLE_STREAM,
            link_stream: IDLE_STREAM,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn queues(&self) -> &Arc<Queues> {
        &self.queues
    }

    /// Attach the channel packets for `destination` are delivered to
    pub fn set_sink(&mut self, destination: Destination, sink: Arc<dyn PacketSink>) -> Result<()> {
        match destination {
            Destination::Loopback => return Err(AudioError::NotPacketDestination(destination)),
            Destination::Gateway => self.gateway_sink = Some(sink),
            Destination::Link => self.link_sink = Some(sink),
        }
        Ok(())
    }

    fn sink(&self, destination: Destination) -> Result<Arc<dyn PacketSink>> {
        let sink = match destination {
            Destination::Loopback => return Err(AudioError::NotPacketDestination(destination)),
            Destination::Gateway => self.gateway_sink.as_ref(),
            Destination::Link => self.link_sink.as_ref(),
        };
        sink.cloned().ok_or(AudioError::NoChannel(destination))
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmit.as_ref().is_some_and(|(_, s)| !s.is_finished())
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Stream id currently tracked for packets from `source`
    pub fn tracked_stream(&self, source: Destination) -> u16 {
        match source {
            Destination::Gateway => self.gateway_stream,
            Destination::Link => self.link_stream,
            Destination::Loopback => IDLE_STREAM,
        }
    }

    fn tracked_stream_mut(&mut self, source: Destination) -> Option<&mut u16> {
        match source {
            Destination::Gateway => Some(&mut self.gateway_stream),
            Destination::Link => Some(&mut self.link_stream),
            Destination::Loopback => None,
        }
    }

    /// Join sessions whose stages have all exited
    fn reap(&mut self) {
        if self.transmit.as_ref().is_some_and(|(_, s)| s.is_finished()) {
            if let Some((destination, session)) = self.transmit.take() {
                let clean = session.join();
                debug!(?destination, clean, "reaped transmit session");
                self.transmit_finished(destination, clean);
            }
        }
        if self.playback.as_ref().is_some_and(Session::is_finished) {
            if let Some(session) = self.playback.take() {
                debug!(clean = session.join(), "reaped playback session");
            }
        }
    }

    // =========================================================================
    // Transmit
    // =========================================================================

    /// Key up: start capturing and relaying toward `destination`
    ///
    /// # Arguments
    ///
    /// * `destination` - Loopback (echo test), gateway or link
    /// * `target` - Destination callsign placed in the radio header
    pub fn start_transmit(&mut self, destination: Destination, target: &str) -> Result<()> {
        self.reap();
        if self.transmit.is_some() {
            return Err(AudioError::Busy("transmit"));
        }
        if self.playback.is_some() {
            return Err(AudioError::Busy("playback"));
        }
        let sink = match destination {
            Destination::Loopback => None,
            _ => Some(self.sink(destination)?),
        };

        self.queues.clear();
        self.echo_recording = None;
        self.hot_mic.store(true, Ordering::SeqCst);

        let mut session = Session::new("transmit");
        if let Err(e) = self.spawn_transmit(&mut session, destination, target, sink) {
            self.hot_mic.store(false, Ordering::SeqCst);
            session.abort();
            session.join();
            return Err(e);
        }

        info!(?destination, target, "transmit started");
        self.transmit = Some((destination, session));
        Ok(())
    }

    fn spawn_transmit(
        &self,
        session: &mut Session,
        destination: Destination,
        target: &str,
        sink: Option<Arc<dyn PacketSink>>,
    ) -> Result<()> {
        let ctx = session.context(
            self.queues.clone(),
            self.vocoder.clone(),
            self.config.consumer_retry,
        );

        let (c, backend, hot_mic) = (ctx.clone(), self.backend.clone(), self.hot_mic.clone());
        session.spawn("capture", move || {
            stages::capture(&c, backend.as_ref(), &hot_mic)
        })?;

        let c = ctx.clone();
        session.spawn("encode", move || stages::encode(&c))?;

        match sink {
            None => {
                let c = ctx.clone();
                session.spawn("echo", move || stages::echo_relay(&c))?;
            }
            Some(sink) => {
                let header = WirePacket::header(new_stream_id(), self.config.radio_header(target));
                let c = ctx.clone();
                session.spawn("packetize", move || {
                    stages::packet_relay(&c, destination, header)
                })?;
                let c = ctx;
                session.spawn("forward", move || {
                    stages::forward(&c, destination, sink.as_ref())
                })?;
            }
        }
        Ok(())
    }

    /// Key off and wait for the transmission to drain
    ///
    /// Returns false if nothing was transmitting or a stage failed.
    pub fn stop_transmit(&mut self) -> bool {
        self.hot_mic.store(false, Ordering::SeqCst);
        match self.transmit.take() {
            Some((destination, session)) => {
                let clean = session.join();
                info!(?destination, clean, "transmit stopped");
                self.transmit_finished(destination, clean);
                clean
            }
            None => false,
        }
    }

    fn transmit_finished(&mut self, destination: Destination, clean: bool) {
        if destination == Destination::Loopback {
            self.echo_recording = Some(clean);
        }
    }

    // =========================================================================
    // Playback
    // =========================================================================

    /// Replay an echo recording once its transmission has drained
    ///
    /// Keys off first if the recording is still running. A recording can be
    /// played back once.
    pub fn start_playback(&mut self) -> Result<()> {
        if self.transmit.is_some() {
            self.stop_transmit();
        }
        self.reap();
        if self.playback.is_some() {
            return Err(AudioError::Busy("playback"));
        }

        match self.echo_recording.take() {
            Some(true) => {}
            // An aborted recording never queued its end-marked frame
            Some(false) => {
                self.queues.compressed.clear();
                return Err(AudioError::Aborted("transmit"));
            }
            None => return Err(AudioError::NoRecording),
        }

        thread::sleep(self.config.echo_settle);
        self.spawn_playback()
    }

    fn spawn_playback(&mut self) -> Result<()> {
        self.queues.clear_playback();

        let mut session = Session::new("playback");
        if let Err(e) = self.spawn_playback_stages(&mut session) {
            session.abort();
            session.join();
            return Err(e);
        }

        debug!("playback started");
        self.playback = Some(session);
        Ok(())
    }

    fn spawn_playback_stages(&self, session: &mut Session) -> Result<()> {
        let ctx = session.context(
            self.queues.clone(),
            self.vocoder.clone(),
            self.config.consumer_retry,
        );

        let c = ctx.clone();
        let idle = self.config.stream_timeout;
        session.spawn("decode-in", move || stages::decode_in(&c, idle))?;

        let c = ctx.clone();
        session.spawn("decode-out", move || stages::decode_out(&c))?;

        let mut c = ctx;
        c.retry = self.config.playback_retry;
        let (backend, prebuffer) = (self.backend.clone(), self.config.playback_prebuffer);
        session.spawn("playback", move || {
            stages::playback(&c, backend.as_ref(), prebuffer)
        })
    }

    /// Wait for the current playback to finish
    ///
    /// Returns false if nothing was playing or a stage failed.
    pub fn wait_playback(&mut self) -> bool {
        match self.playback.take() {
            Some(session) => session.join(),
            None => false,
        }
    }

    // =========================================================================
    // Inbound Packets
    // =========================================================================

    pub fn receive_from_gateway(&mut self, packet: &WirePacket) -> Result<()> {
        self.receive(Destination::Gateway, packet)
    }

    pub fn receive_from_link(&mut self, packet: &WirePacket) -> Result<()> {
        self.receive(Destination::Link, packet)
    }

    fn receive(&mut self, source: Destination, packet: &WirePacket) -> Result<()> {
        self.expire_streams();
        let tracked = self.tracked_stream(source);

        if packet.is_header() {
            if tracked != IDLE_STREAM {
                self.set_tracked(source, packet.stream_id);
                return Ok(());
            }

            if self.playback.is_some() {
                debug!(?source, stream_id = packet.stream_id, "playback busy, header ignored");
                return Ok(());
            }
            if matches!(self.transmit, Some((Destination::Loopback, _))) {
                debug!(?source, stream_id = packet.stream_id, "echo test running, header ignored");
                return Ok(());
            }

            self.queues.compressed.clear();
            self.spawn_playback()?;
            self.set_tracked(source, packet.stream_id);
            info!(?source, stream_id = packet.stream_id, "inbound stream started");
            return Ok(());
        }

        if tracked == IDLE_STREAM || packet.stream_id != tracked {
            debug!(?source, stream_id = packet.stream_id, tracked, "foreign voice packet dropped");
            return Ok(());
        }

        let Some(frame) = packet.voice_frame() else {
            return Ok(());
        };
        self.queues.compressed.push(frame);

        if frame.seq.is_end() {
            self.set_tracked(source, IDLE_STREAM);
            let clean = self.wait_playback();
            info!(?source, stream_id = packet.stream_id, clean, "inbound stream ended");
        }
        Ok(())
    }

    /// Forget tracked streams whose playback already ended on its own
    fn expire_streams(&mut self) {
        self.reap();
        if self.playback.is_some() {
            return;
        }
        for source in [Destination::Gateway, Destination::Link] {
            let stream_id = self.tracked_stream(source);
            if stream_id != IDLE_STREAM {
                info!(?source, stream_id, "inbound stream timed out");
                self.set_tracked(source, IDLE_STREAM);
            }
        }
    }

    fn set_tracked(&mut self, source: Destination, stream_id: u16) {
        if let Some(tracked) = self.tracked_stream_mut(source) {
            *tracked = stream_id;
        }
    }

    /// Dispatch a datagram read from the channel fed by `source`
    pub fn handle_local(&mut self, source: Destination, bytes: &[u8]) -> Result<()> {
        match LocalMessage::from_bytes(bytes)? {
            LocalMessage::Dsvt(packet) => self.receive(source, &packet),
            LocalMessage::Play(path) => self.play_file(Path::new(&path)),
            LocalMessage::M17(frame) => {
                debug!(?source, stream_id = frame.stream_id, "M17 frame dropped");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Stored Voice
    // =========================================================================

    /// Play a stored voice file through the speaker
    ///
    /// Ignored while another playback is running.
    pub fn play_file(&mut self, path: &Path) -> Result<()> {
        self.reap();
        if self.playback.is_some() {
            info!(path = %path.display(), "playback busy, file ignored");
            return Ok(());
        }
        if self.transmit.is_some() {
            return Err(AudioError::Busy("transmit"));
        }

        let frames = parse_voice_file(&fs::read(path)?);
        if frames.is_empty() {
            return Err(AudioError::EmptyVoiceFile(path.to_path_buf()));
        }

        info!(path = %path.display(), frames = frames.len(), "playing voice file");
        self.queues.compressed.clear();
        for frame in frames {
            self.queues.compressed.push(frame);
        }
        self.spawn_playback()
    }

    /// Send a short silent transmission without touching the microphone
    ///
    /// # Arguments
    ///
    /// * `destination` - Gateway or link
    /// * `target` - Destination callsign placed in the radio header
    pub fn quick_key(&self, destination: Destination, target: &str) -> Result<()> {
        let sink = self.sink(destination)?;
        let stream_id = new_stream_id();

        sink.send(&WirePacket::header(stream_id, self.config.radio_header(target)).to_bytes())?;

        // The last voice packet carries the end marker, so send at least one
        let frames = self.config.quick_key_frames.max(1);
        for count in 0..frames {
            thread::sleep(self.config.frame_pacing);
            let mut seq = Sequence::from_count(count as u64);
            if count + 1 == frames {
                seq = seq.with_end();
            }
            let packet = WirePacket::voice(stream_id, &CompressedFrame::silence(seq));
            sink.send(&packet.to_bytes())?;
        }

        info!(?destination, target, frames, "quick-key sent");
        Ok(())
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.hot_mic.store(false, Ordering::SeqCst);
        if let Some((_, session)) = self.transmit.take() {
            session.abort();
            session.join();
        }
        if let Some(session) = self.playback.take() {
            session.abort();
            session.join();
        }
    }
}

/// Split a stored voice file into frames, end-marking the last
pub fn parse_voice_file(bytes: &[u8]) -> Vec<CompressedFrame> {
    let body = bytes.strip_prefix(VOICE_FILE_MAGIC.as_slice()).unwrap_or(bytes);
    let chunks = body.chunks_exact(COMPRESSED_FRAME_SIZE);
    let total = chunks.len();

    chunks
        .enumerate()
        .map(|(i, chunk)| {
            let mut data = [0u8; COMPRESSED_FRAME_SIZE];
            data.copy_from_slice(chunk);
            let mut seq = Sequence::from_count(i as u64);
            if i + 1 == total {
                seq = seq.with_end();
            }
            CompressedFrame::new(data, seq)
        })
        .collect()
}
