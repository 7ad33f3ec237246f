#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

//! In-memory serial link and a scripted terminal on the far end.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use ecrlink_core::protocol::frame::{encode_packet, FrameDecoder, Packet};
use ecrlink_sdk::config::SdkConfig;
use ecrlink_sdk::transport::link::SerialLink;

const READ_SLICE: Duration = Duration::from_millis(20);

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_SLICE) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Err(io::ErrorKind::BrokenPipe.into()),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// Blocks writes while the gate is shut.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn shut(&self) {
        *self.0 .0.lock().unwrap() = true;
    }

    pub fn open(&self) {
        *self.0 .0.lock().unwrap() = false;
        self.0 .1.notify_all();
    }

    fn pass(&self) {
        let (lock, cvar) = &*self.0;
        let mut shut = lock.lock().unwrap();
        while *shut {
            shut = cvar.wait(shut).unwrap();
        }
    }
}

pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
    gate: Gate,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.gate.pass();
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The terminal side of a pipe.
pub struct Peer {
    to_engine: Sender<Vec<u8>>,
    from_engine: Receiver<Vec<u8>>,
    decoder: FrameDecoder,
    inbox: VecDeque<Packet>,
}

impl Peer {
    pub fn send_packet(&self, packet: &Packet) {
        self.send_raw(&encode_packet(packet).unwrap());
    }

    pub fn send_raw(&self, bytes: &[u8]) {
        self.to_engine.send(bytes.to_vec()).unwrap();
    }

    /// Next packet written by the engine, if any arrives within `timeout`.
    pub fn next_packet(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(p) = self.inbox.pop_front() {
                return Some(p);
            }
            let left = deadline.checked_duration_since(Instant::now())?;
            match self.from_engine.recv_timeout(left) {
                Ok(chunk) => self.inbox.extend(self.decoder.feed(&chunk)),
                Err(_) => return None,
            }
        }
    }

    /// Skip packets until one matches.
    pub fn expect(&mut self, timeout: Duration, pred: impl Fn(&Packet) -> bool) -> Packet {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline
                .checked_duration_since(Instant::now())
                .expect("timed out waiting for packet");
            let p = self.next_packet(left).expect("timed out waiting for packet");
            if pred(&p) {
                return p;
            }
        }
    }

    /// Everything the engine writes within `window`.
    pub fn collect(&mut self, window: Duration) -> Vec<Packet> {
        let deadline = Instant::now() + window;
        let mut out = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match self.next_packet(left) {
                Some(p) => out.push(p),
                None => break,
            }
        }
        out
    }
}

pub fn pipe() -> (SerialLink, Peer, Gate) {
    let (to_engine, engine_rx) = channel();
    let (engine_tx, from_engine) = channel();
    let gate = Gate::default();

    let link = SerialLink::new(
        Box::new(PipeReader {
            rx: engine_rx,
            pending: VecDeque::new(),
        }),
        Box::new(PipeWriter {
            tx: engine_tx,
            gate: gate.clone(),
        }),
    );
    let peer = Peer {
        to_engine,
        from_engine,
        decoder: FrameDecoder::new(),
        inbox: VecDeque::new(),
    };
    (link, peer, gate)
}

pub fn test_config() -> SdkConfig {
    let mut cfg = SdkConfig::new("wz6012822ca2f1as78");
    cfg.serial.connect_timeout_ms = 2_000;
    cfg.serial.handshake_interval_ms = 50;
    cfg.serial.read_timeout_ms = 2_000;
    cfg.socket.server_port = 0;
    cfg.socket.read_timeout_ms = 2_000;
    cfg.poll_interval_ms = 5;
    cfg
}
