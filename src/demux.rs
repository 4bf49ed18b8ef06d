// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The UART demultiplexer (spec §4.4). The transport supports one reader;
// this task is the sole caller of `Transport::read_available` and
// publishes what it reads into per-consumer buffers that the master and
// slave state machines drain independently.
//
// Spec §9's design notes call this restatement — continuous reads
// published into per-consumer ring buffers, rather than a queue of
// one-shot read vessels round-tripped through the demultiplexer — an
// equivalent, preferred alternative to the source's vessel-queue design,
// as long as (a) exactly one reader touches the transport, (b) each
// consumer observes every byte exactly once, (c) bytes arrive in order.
// Since spec §5 guarantees the master and slave state machines are never
// both active at once on a given link, this implementation keeps that
// guarantee cheaply: the demultiplexer only appends to the buffer of
// whichever consumer is currently marked active, so the idle side's
// buffer never accumulates bytes it will never read. Grounded on
// `waiter.rs`'s condvar-plus-mutex rendezvous, generalized from a single
// named waiter to one per consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::transport::Transport;

/// Which state machine is the current consumer of transport bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerId {
    Master,
    Slave,
}

impl ConsumerId {
    fn tag(self) -> u8 {
        match self {
            ConsumerId::Master => 0,
            ConsumerId::Slave => 1,
        }
    }
}

struct Ring {
    buf: Mutex<VecDeque<u8>>,
    cv: Condvar,
}

impl Ring {
    fn new() -> Self {
        Self { buf: Mutex::new(VecDeque::new()), cv: Condvar::new() }
    }

    fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut buf = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        buf.extend(bytes.iter().copied());
        drop(buf);
        self.cv.notify_all();
    }
}

/// A consumer's read handle into its own ring buffer.
///
/// `read_bytes` mirrors the source's blocking `read_bytes(buffer, length,
/// caller)` helper: it waits (bounded by `timeout`, spec §5: "twice the
/// step interval") for bytes to arrive, appends whatever is available to
/// `dest`, and returns the number of bytes appended (`0` on timeout — the
/// equivalent of "returns unchanged length", i.e. back off and retry).
pub struct ConsumerPort {
    ring: Arc<Ring>,
}

impl ConsumerPort {
    pub fn read_bytes(&self, dest: &mut Vec<u8>, timeout: Duration) -> usize {
        let mut buf = self.ring.buf.lock().unwrap_or_else(|p| p.into_inner());
        if buf.is_empty() {
            let (guard, _timeout_result) = match self.ring.cv.wait_timeout_while(buf, timeout, |b| b.is_empty()) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            buf = guard;
        }
        let n = buf.len();
        dest.extend(buf.drain(..));
        n
    }
}

/// Owns the background thread that is the transport's sole reader.
///
/// `stop` takes `&self` (not `&mut self`) so a `LinkSystem` can share one
/// `Demultiplexer` between its own shutdown path and the master thread's
/// calls to [`Demultiplexer::set_active`] via a plain `Arc`.
pub struct Demultiplexer {
    quit: Arc<AtomicBool>,
    active: Arc<AtomicU8>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Demultiplexer {
    /// Start the demultiplexer task. Returns the handle (drop or call
    /// [`Demultiplexer::stop`] to join the background thread) and one
    /// [`ConsumerPort`] per state machine.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        step_interval: Duration,
    ) -> (Self, ConsumerPort, ConsumerPort) {
        let master_ring = Arc::new(Ring::new());
        let slave_ring = Arc::new(Ring::new());
        let quit = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicU8::new(ConsumerId::Slave.tag()));

        let (t, q, a, mr, sr) = (
            transport,
            quit.clone(),
            active.clone(),
            master_ring.clone(),
            slave_ring.clone(),
        );
        let handle = thread::spawn(move || demux_loop(t, step_interval, q, a, mr, sr));

        (
            Demultiplexer { quit, active, handle: Mutex::new(Some(handle)) },
            ConsumerPort { ring: master_ring },
            ConsumerPort { ring: slave_ring },
        )
    }

    /// Mark which consumer is currently entitled to transport bytes
    /// (spec §5: the master and slave are never both active).
    pub fn set_active(&self, who: ConsumerId) {
        self.active.store(who.tag(), Ordering::Release);
    }

    pub fn stop(&self) {
        self.quit.store(true, Ordering::Release);
        let mut slot = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(h) = slot.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn demux_loop(
    transport: Arc<dyn Transport>,
    step_interval: Duration,
    quit: Arc<AtomicBool>,
    active: Arc<AtomicU8>,
    master_ring: Arc<Ring>,
    slave_ring: Arc<Ring>,
) {
    let mut last_byte_at = Instant::now();
    while !quit.load(Ordering::Acquire) {
        let bytes = transport.read_available();
        if !bytes.is_empty() {
            last_byte_at = Instant::now();
            if active.load(Ordering::Acquire) == ConsumerId::Master.tag() {
                master_ring.push(&bytes);
            } else {
                slave_ring.push(&bytes);
            }
        }
        // Pace polling to roughly the configured step interval; this also
        // delimits the "quiet batch" boundary spec §4.4 describes, though
        // with continuous per-byte delivery the batching is advisory only.
        let _ = last_byte_at;
        thread::sleep(step_interval.min(Duration::from_millis(5)).max(Duration::from_micros(200)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    #[test]
    fn master_port_receives_bytes_while_active() {
        let (near, far) = LoopbackTransport::pair();
        let (demux, master_port, _slave_port) =
            Demultiplexer::spawn(Arc::new(near), Duration::from_millis(2));
        demux.set_active(ConsumerId::Master);

        far.write_all(&[1, 2, 3]);
        let mut dest = Vec::new();
        let n = master_port.read_bytes(&mut dest, Duration::from_millis(200));
        assert_eq!(n, 3);
        assert_eq!(dest, vec![1, 2, 3]);
        demux.stop();
    }

    #[test]
    fn inactive_consumer_does_not_receive_bytes() {
        let (near, far) = LoopbackTransport::pair();
        let (demux, _master_port, slave_port) =
            Demultiplexer::spawn(Arc::new(near), Duration::from_millis(2));
        demux.set_active(ConsumerId::Master);

        far.write_all(&[9, 9]);
        let mut dest = Vec::new();
        let n = slave_port.read_bytes(&mut dest, Duration::from_millis(50));
        assert_eq!(n, 0);
        demux.stop();
    }

    #[test]
    fn read_bytes_times_out_with_no_traffic() {
        let (near, _far) = LoopbackTransport::pair();
        let (demux, master_port, _slave_port) =
            Demultiplexer::spawn(Arc::new(near), Duration::from_millis(2));
        demux.set_active(ConsumerId::Master);

        let mut dest = Vec::new();
        let n = master_port.read_bytes(&mut dest, Duration::from_millis(30));
        assert_eq!(n, 0);
        demux.stop();
    }
}
