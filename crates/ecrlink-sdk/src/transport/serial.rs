//! Serial transport engine.
//!
//! Thread roles per engine:
//! - the caller, which sends and then waits on the correlation cache;
//! - `ecr-serial-reader`, which decodes incoming bytes, acks data packets
//!   and stores replies (never blocks on anything but the port);
//! - `ecr-serial-writer`, the only code that writes to the port, draining
//!   the outbound queue in order.
//!
//! Lifecycle: `Closed -> Opening -> Handshaking -> Connected -> Closing -> Closed`.
//! The reader and writer are started before the handshake so that the
//! confirm can be observed; a handshake timeout tears them down again.
//! A fatal port error in either worker drops the link to `Closing`; `close`
//! then joins the workers and returns it to `Closed`.

use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ecrlink_core::error::{EcrError, Result};
use ecrlink_core::protocol::frame::{encode_packet, FrameDecoder, Packet, PacketType};

use crate::cache::CorrelationCache;
use crate::config::{SdkConfig, SerialSection};
use crate::transport::codec;
use crate::transport::link::SerialLink;
use crate::transport::outbound::OutboundQueue;
use crate::transport::Transport;

const READ_BUF: usize = 1024;
/// Pause after an empty read when the link has no back-off of its own.
const EMPTY_READ_PAUSE: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Opening,
    Handshaking,
    Connected,
    Closing,
}

struct Shared {
    state: Mutex<LinkState>,
    queue: OutboundQueue,
    decoder: FrameDecoder,
    /// Set by the reader when a HandshakeConfirm arrives.
    confirmed: AtomicBool,
    /// Cleared to stop the reader thread.
    reading: AtomicBool,
    next_id: AtomicU8,
    cache: Arc<CorrelationCache>,
}

impl Shared {
    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn set_state(&self, next: LinkState) {
        let mut state = self.state.lock();
        tracing::debug!(from = ?*state, to = ?next, "serial link state");
        *state = next;
    }

    /// Move `from -> to` only if the link is still in `from`.
    fn promote(&self, from: LinkState, to: LinkState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        tracing::debug!(from = ?from, to = ?to, "serial link state");
        *state = to;
        true
    }

    /// The port is gone. Stop both workers and refuse further sends.
    fn fail_link(&self) {
        let failed = self.promote(LinkState::Connected, LinkState::Closing)
            || self.promote(LinkState::Handshaking, LinkState::Closing);
        if !failed {
            return;
        }
        self.queue.close();
        self.reading.store(false, Ordering::Release);
    }

    /// Data packet ids run 1..=255 and wrap; 0 is reserved for control packets.
    fn next_packet_id(&self) -> u8 {
        let step = |id: u8| Some(if id == u8::MAX { 1 } else { id + 1 });
        match self.next_id.fetch_update(Ordering::AcqRel, Ordering::Acquire, step) {
            Ok(id) | Err(id) => id,
        }
    }

    fn enqueue(&self, packet: &Packet, priority: bool) -> Result<()> {
        let frame = encode_packet(packet)?;
        let queued = if priority {
            self.queue.push_priority(frame)
        } else {
            self.queue.push(frame)
        };
        if queued {
            Ok(())
        } else {
            Err(EcrError::Connection("serial writer stopped".into()))
        }
    }

    fn on_bytes(&self, bytes: &[u8]) {
        for packet in self.decoder.feed(bytes) {
            self.on_packet(packet);
        }
    }

    fn on_packet(&self, packet: Packet) {
        match packet.packet_type {
            PacketType::HandshakeConfirm => {
                if !self.confirmed.swap(true, Ordering::AcqRel) {
                    tracing::debug!("handshake confirmed by peer");
                }
            }
            PacketType::Handshake => {
                tracing::debug!("peer handshake ignored");
            }
            PacketType::Common if packet.is_data() => {
                // Ack before anything else queued; exactly one per data packet.
                if let Err(e) = self.enqueue(&Packet::ack(packet.id), true) {
                    tracing::warn!(packet_id = packet.id, error = %e, "ack not queued");
                }
                codec::store_reply(&self.cache, packet.data);
            }
            PacketType::Common if packet.is_ack() => {
                tracing::trace!(ack = packet.ack, "peer acked packet");
            }
            PacketType::Common => {
                tracing::trace!("heartbeat received");
            }
        }
    }
}

#[derive(Default)]
struct Workers {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
}

impl Workers {
    fn take(&mut self) -> Workers {
        std::mem::take(self)
    }
}

pub struct SerialEngine {
    cfg: SerialSection,
    poll: Duration,
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

impl SerialEngine {
    pub fn new(cfg: SerialSection, cache: Arc<CorrelationCache>, poll: Duration) -> Self {
        Self {
            cfg,
            poll,
            shared: Arc::new(Shared {
                state: Mutex::new(LinkState::Closed),
                queue: OutboundQueue::new(),
                decoder: FrameDecoder::new(),
                confirmed: AtomicBool::new(false),
                reading: AtomicBool::new(false),
                next_id: AtomicU8::new(1),
                cache,
            }),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn from_config(cfg: &SdkConfig) -> Self {
        Self::new(
            cfg.serial.clone(),
            Arc::new(CorrelationCache::from_config(&cfg.cache)),
            cfg.poll_interval(),
        )
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn cache(&self) -> &Arc<CorrelationCache> {
        &self.shared.cache
    }

    /// Open the configured port and run the handshake.
    pub async fn connect(&self) -> Result<()> {
        self.begin_open()?;

        let cfg = self.cfg.clone();
        let opened = tokio::task::spawn_blocking(move || SerialLink::open(&cfg))
            .await
            .map_err(|e| EcrError::Internal(format!("serial open task failed: {e}")))
            .and_then(|r| r);

        match opened {
            Ok(link) => self.handshake(link).await,
            Err(e) => {
                self.shared.set_state(LinkState::Closed);
                Err(e)
            }
        }
    }

    /// Run the handshake over an already-open link.
    pub async fn connect_with(&self, link: SerialLink) -> Result<()> {
        self.begin_open()?;
        self.handshake(link).await
    }

    fn begin_open(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if *state != LinkState::Closed {
            return Err(EcrError::Connection(format!(
                "serial link busy ({:?})",
                *state
            )));
        }
        *state = LinkState::Opening;
        Ok(())
    }

    async fn handshake(&self, link: SerialLink) -> Result<()> {
        let shared = &self.shared;
        shared.queue.reopen();
        shared.decoder.reset();
        shared.confirmed.store(false, Ordering::Release);
        shared.reading.store(true, Ordering::Release);
        shared.set_state(LinkState::Handshaking);

        if let Err(e) = self.spawn_io(link) {
            self.teardown().await;
            return Err(e);
        }

        let started = Instant::now();
        let deadline = started + self.cfg.connect_timeout();
        let interval = self.cfg.handshake_interval();
        let mut next_attempt = started;

        loop {
            if shared.confirmed.load(Ordering::Acquire) {
                break;
            }
            if shared.state() != LinkState::Handshaking {
                self.teardown().await;
                return Err(EcrError::Connection("serial port lost during handshake".into()));
            }
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(waited_ms, "serial handshake timed out");
                self.teardown().await;
                return Err(EcrError::HandshakeTimeout { waited_ms });
            }
            if now >= next_attempt {
                if let Err(e) = shared.enqueue(&Packet::handshake(), false) {
                    self.teardown().await;
                    return Err(e);
                }
                next_attempt = now + interval;
            }
            tokio::time::sleep(self.poll.min(deadline - now)).await;
        }

        if !shared.promote(LinkState::Handshaking, LinkState::Connected) {
            self.teardown().await;
            return Err(EcrError::Connection("serial port lost during handshake".into()));
        }
        if let Some(every) = self.cfg.heartbeat_interval() {
            self.workers.lock().heartbeat = Some(spawn_heartbeat(Arc::downgrade(shared), every));
        }
        tracing::info!(
            port = %self.cfg.port,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "serial link connected"
        );
        Ok(())
    }

    fn spawn_io(&self, link: SerialLink) -> Result<()> {
        let SerialLink {
            reader,
            writer,
            idle_backoff,
        } = link;

        let writer_handle = {
            let shared = self.shared.clone();
            std::thread::Builder::new()
                .name("ecr-serial-writer".into())
                .spawn(move || writer_loop(&shared, writer))
                .map_err(|e| EcrError::Internal(format!("spawn serial writer failed: {e}")))?
        };
        self.workers.lock().writer = Some(writer_handle);

        let reader_handle = {
            let shared = self.shared.clone();
            std::thread::Builder::new()
                .name("ecr-serial-reader".into())
                .spawn(move || reader_loop(&shared, reader, idle_backoff))
                .map_err(|e| EcrError::Internal(format!("spawn serial reader failed: {e}")))?
        };
        self.workers.lock().reader = Some(reader_handle);
        Ok(())
    }

    /// Stop workers and wait for them. Frames already queued are written first.
    async fn teardown(&self) {
        self.shared.set_state(LinkState::Closing);
        let workers = self.signal_stop();
        let joined = tokio::task::spawn_blocking(move || {
            if let Some(h) = workers.writer {
                let _ = h.join();
            }
            if let Some(h) = workers.reader {
                let _ = h.join();
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::warn!(error = %e, "serial worker join failed");
        }
        self.shared.decoder.reset();
        self.shared.set_state(LinkState::Closed);
    }

    fn signal_stop(&self) -> Workers {
        let workers = self.workers.lock().take();
        if let Some(hb) = &workers.heartbeat {
            hb.abort();
        }
        self.shared.queue.close();
        self.shared.reading.store(false, Ordering::Release);
        workers
    }

    /// Queue a raw, already-framed buffer.
    pub fn write(&self, frame: Bytes) -> Result<()> {
        self.ensure_connected()?;
        if self.shared.queue.push(frame) {
            Ok(())
        } else {
            Err(EcrError::Connection("serial writer stopped".into()))
        }
    }

    /// Frame `payload` as a data packet and queue it. Returns the packet id.
    pub fn send_data(&self, payload: Bytes) -> Result<u8> {
        self.ensure_connected()?;
        let id = self.shared.next_packet_id();
        self.shared.enqueue(&Packet::data(id, payload), false)?;
        tracing::debug!(packet_id = id, "data packet queued");
        Ok(id)
    }

    /// Wait for and consume the reply to `msg_id`.
    pub async fn read(&self, msg_id: &str, timeout: Duration) -> Result<Bytes> {
        self.shared.cache.wait_take(msg_id, timeout, self.poll).await
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.shared.state() {
            LinkState::Connected => Ok(()),
            other => Err(EcrError::Connection(format!("serial link not connected ({other:?})"))),
        }
    }

    /// Idempotent. Also reaps a link that failed on its own.
    pub async fn close(&self) {
        if self.shared.state() == LinkState::Closed {
            return;
        }
        self.teardown().await;
        tracing::info!(port = %self.cfg.port, "serial link closed");
    }
}

impl Drop for SerialEngine {
    fn drop(&mut self) {
        if self.shared.state() != LinkState::Closed {
            // Threads exit on their own once signalled; nothing to join here.
            let _ = self.signal_stop();
        }
    }
}

#[async_trait]
impl Transport for SerialEngine {
    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    async fn send(&self, payload: Bytes) -> Result<()> {
        self.send_data(payload).map(|_| ())
    }

    async fn receive(&self, msg_id: &str, timeout: Duration) -> Result<Bytes> {
        self.read(msg_id, timeout).await
    }

    fn default_timeout(&self) -> Duration {
        self.cfg.read_timeout()
    }

    async fn close(&self) {
        SerialEngine::close(self).await
    }
}

fn reader_loop(shared: &Shared, mut reader: Box<dyn Read + Send>, idle_backoff: Option<Duration>) {
    let mut buf = [0u8; READ_BUF];
    let pause = idle_backoff.unwrap_or(EMPTY_READ_PAUSE);

    while shared.reading.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => std::thread::sleep(pause),
            Ok(n) => shared.on_bytes(&buf[..n]),
            Err(e) if matches!(e.kind(), IoErrorKind::TimedOut | IoErrorKind::WouldBlock) => {
                if let Some(backoff) = idle_backoff {
                    std::thread::sleep(backoff);
                }
            }
            Err(e) if e.kind() == IoErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!(error = %e, "serial read failed, link down");
                shared.fail_link();
                break;
            }
        }
    }
    tracing::debug!("serial reader exited");
}

fn writer_loop(shared: &Shared, mut writer: Box<dyn Write + Send>) {
    while let Some(frame) = shared.queue.pop_blocking() {
        if let Err(e) = writer.write_all(&frame).and_then(|_| writer.flush()) {
            tracing::warn!(error = %e, len = frame.len(), "serial write failed, link down");
            shared.fail_link();
            break;
        }
    }
    tracing::debug!("serial writer exited");
}

fn spawn_heartbeat(shared: Weak<Shared>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(shared) = shared.upgrade() else { break };
            if shared.state() != LinkState::Connected {
                break;
            }
            if shared.enqueue(&Packet::heartbeat(), false).is_err() {
                break;
            }
            tracing::trace!("heartbeat queued");
        }
    })
}
