// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// Top-level wiring (spec §4, §6): owns the registry, the demultiplexer, and
// the long-lived master/slave threads, and exposes `call` plus the
// registry/accessor operations as one surface. Grounded on
// `proto/service_group.rs`'s `ServiceGroup`, which owns and supervises a
// set of long-lived worker threads the same way `LinkSystem` owns the
// demultiplexer, master, and slave threads — generalized from process
// instances under failover to in-process threads under a fixed protocol
// role each.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::demux::{ConsumerId, Demultiplexer};
use crate::event::{Event, EventSink};
use crate::master::{MasterConfig, MasterMachine};
use crate::registry::{BlockRole, Registry};
use crate::slave::{SlaveConfig, SlaveMachine};
use crate::transport::Transport;

/// Process-wide configuration (spec §6). The transport's own hardware
/// parameters (port, baud rate, RX/TX pins) are out of scope here: they
/// belong to whatever concrete `Transport` the caller constructs, not to
/// this crate (spec §1's abstract-byte-stream boundary).
#[derive(Debug, Clone)]
pub struct Config {
    /// Lower clamp on a `call`'s requested chunk size.
    pub legacy_buffer_size: u16,
    /// Upper clamp on a `call`'s requested chunk size, and the slave's own
    /// ceiling on how large a chunk it will ever send.
    pub available_buffer_size: u16,
    /// `master_timeout` / `slave_timeout`: no forward progress this long
    /// aborts the in-flight session.
    pub default_timeout: Duration,
    /// Demultiplexer polling pace; state machines wait up to twice this
    /// for bytes (spec §5).
    pub step_interval: Duration,
    /// Bounded capacity of the dedicated event-sink channel.
    pub event_queue_size: usize,
    /// Bounded capacity of the call queue (spec §4.6: "single-element").
    pub call_queue_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            legacy_buffer_size: 64,
            available_buffer_size: 4096,
            default_timeout: Duration::from_secs(5),
            step_interval: Duration::from_millis(5),
            event_queue_size: 32,
            call_queue_length: 1,
        }
    }
}

/// Result of enqueuing a `call`, mirroring spec §6's documented return
/// codes via [`CallOutcome::code`] for callers that want the literal
/// integer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Enqueued,
    NotFound,
    /// The named block is this peer's slave-owned copy; it cannot be pulled.
    SlaveOwned,
}

impl CallOutcome {
    pub fn code(self) -> i32 {
        match self {
            CallOutcome::Enqueued => 0,
            CallOutcome::NotFound => -1,
            CallOutcome::SlaveOwned => -2,
        }
    }
}

struct CallRequest {
    name: String,
    max_chunk_size: u16,
    timeout: Duration,
}

/// Owns the registry plus every background thread (spec §5: one per
/// state machine, one for the demultiplexer, one for the event sink).
/// Dropping a `LinkSystem` stops all of them.
pub struct LinkSystem {
    registry: Arc<Registry>,
    demux: Arc<Demultiplexer>,
    call_tx: Option<mpsc::SyncSender<CallRequest>>,
    quit: Arc<AtomicBool>,
    legacy_buffer_size: u16,
    available_buffer_size: u16,
    default_timeout: Duration,
    master_handle: Option<thread::JoinHandle<()>>,
    slave_handle: Option<thread::JoinHandle<()>>,
    event_handle: Option<thread::JoinHandle<()>>,
}

impl LinkSystem {
    /// Bring up queues, the event thread, the transport's demultiplexer,
    /// and the master/slave threads (spec §6: `init`).
    pub fn init(
        transport: Arc<dyn Transport>,
        config: Config,
        on_event: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let (demux, master_port, slave_port) =
            Demultiplexer::spawn(transport.clone(), config.step_interval);
        let demux = Arc::new(demux);

        let (event_tx, event_rx) = mpsc::sync_channel::<Event>(config.event_queue_size.max(1));
        let event_handle = thread::spawn(move || {
            for event in event_rx {
                on_event(&event);
            }
        });
        let events = EventSink::new(move |event: &Event| {
            let _ = event_tx.send(event.clone());
        });

        let read_timeout = config.step_interval * 2;
        let quit = Arc::new(AtomicBool::new(false));

        let slave_cfg = SlaveConfig {
            local_chunk_limit: config.available_buffer_size,
            session_timeout: config.default_timeout,
            read_timeout,
            max_buffer: config.available_buffer_size as usize * 4,
            legacy_bytes: config.legacy_buffer_size as usize,
        };
        let slave = SlaveMachine::new(registry.clone(), transport.clone(), slave_port, events.clone(), slave_cfg);
        let slave_quit = quit.clone();
        let slave_handle = thread::spawn(move || slave.run(|| slave_quit.load(Ordering::Acquire)));

        let (call_tx, call_rx) = mpsc::sync_channel::<CallRequest>(config.call_queue_length.max(1));
        let master_cfg = MasterConfig { read_timeout };
        let master = MasterMachine::new(registry.clone(), transport, master_port, events, master_cfg);
        let master_demux = demux.clone();
        let master_handle = thread::spawn(move || {
            for req in call_rx {
                // spec §4.6/§5: the two state machines never share the
                // transport at once; the demultiplexer hand-off is what
                // suspends the long-lived slave task for the duration.
                master_demux.set_active(ConsumerId::Master);
                master.run_transfer(&req.name, req.max_chunk_size, req.timeout);
                master_demux.set_active(ConsumerId::Slave);
            }
        });

        Self {
            registry,
            demux,
            call_tx: Some(call_tx),
            quit,
            legacy_buffer_size: config.legacy_buffer_size,
            available_buffer_size: config.available_buffer_size,
            default_timeout: config.default_timeout,
            master_handle: Some(master_handle),
            slave_handle: Some(slave_handle),
            event_handle: Some(event_handle),
        }
    }

    /// Allocate a zero-initialized blob block (spec §4.1).
    pub fn new_blob(&self, name: &str, length: usize, role: BlockRole, trigger: [u8; 8], pattern: [u8; 8]) -> i32 {
        match self.registry.new_blob(name, length, role, trigger, pattern) {
            Ok(_) => 0,
            Err(_) => -3, // spec §8: duplicate name returns -3
        }
    }

    /// Allocate a zero-initialized fixed-stride array block (spec §4.1).
    pub fn new_array(
        &self,
        name: &str,
        n: usize,
        stride: usize,
        role: BlockRole,
        trigger: [u8; 8],
        pattern: [u8; 8],
    ) -> i32 {
        match self.registry.new_array(name, n, stride, role, trigger, pattern) {
            Ok(_) => 0,
            Err(_) => -3,
        }
    }

    /// Enqueue a master transfer for `name` (spec §6: `call`). Clamps
    /// `max_chunk_size` to `[legacy_buffer_size, available_buffer_size]`
    /// and validates the block before it ever reaches the wire. `timeout_ms
    /// == 0` falls back to the process-wide `default_timeout`.
    pub fn call(&self, name: &str, timeout_ms: u64, max_chunk_size: u16) -> CallOutcome {
        let block = match self.registry.lookup(name) {
            Some(b) => b,
            None => return CallOutcome::NotFound,
        };
        if block.role() == BlockRole::SlaveOwned {
            return CallOutcome::SlaveOwned;
        }
        let clamped = max_chunk_size.clamp(self.legacy_buffer_size, self.available_buffer_size);
        let timeout = if timeout_ms == 0 { self.default_timeout } else { Duration::from_millis(timeout_ms) };
        if let Some(call_tx) = &self.call_tx {
            let _ = call_tx.send(CallRequest { name: name.to_string(), max_chunk_size: clamped, timeout });
        }
        CallOutcome::Enqueued
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Drop for LinkSystem {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::Release);
        self.demux.stop();
        if let Some(h) = self.slave_handle.take() {
            let _ = h.join();
        }
        // A struct's fields outlive its own `drop` body, so `self.call_tx`
        // would otherwise stay alive for this whole method and the master
        // thread's `for req in call_rx` would never see the channel close.
        // Drop it explicitly first so the master thread's loop can end.
        self.call_tx.take();
        if let Some(h) = self.master_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.event_handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::sync::atomic::AtomicUsize;

    fn trig(tag: &str) -> [u8; 8] {
        let mut t = [0u8; 8];
        let bytes = tag.as_bytes();
        let n = bytes.len().min(8);
        t[..n].copy_from_slice(&bytes[..n]);
        t
    }

    #[test]
    fn call_on_missing_block_returns_not_found() {
        let (near, _far) = LoopbackTransport::pair();
        let sys = LinkSystem::init(Arc::new(near), Config::default(), |_| {});
        assert_eq!(sys.call("nope", 1000, 128), CallOutcome::NotFound);
        assert_eq!(CallOutcome::NotFound.code(), -1);
    }

    #[test]
    fn call_on_slave_owned_block_is_rejected_with_no_wire_traffic() {
        let (near, far) = LoopbackTransport::pair();
        let sys = LinkSystem::init(Arc::new(near), Config::default(), |_| {});
        sys.new_blob("x", 10, BlockRole::SlaveOwned, trig("xt"), trig("xp"));
        let outcome = sys.call("x", 1000, 128);
        assert_eq!(outcome, CallOutcome::SlaveOwned);
        assert_eq!(outcome.code(), -2);
        std::thread::sleep(Duration::from_millis(20));
        assert!(far.read_available().is_empty());
    }

    #[test]
    fn new_blob_twice_returns_negative_three() {
        let (near, _far) = LoopbackTransport::pair();
        let sys = LinkSystem::init(Arc::new(near), Config::default(), |_| {});
        assert_eq!(sys.new_blob("d", 4, BlockRole::MasterConsumer, trig("dt"), trig("dp")), 0);
        assert_eq!(sys.new_blob("d", 4, BlockRole::MasterConsumer, trig("dt"), trig("dp")), -3);
    }

    #[test]
    fn call_on_existing_master_consumer_block_enqueues() {
        let (near, _far) = LoopbackTransport::pair();
        let sys = LinkSystem::init(Arc::new(near), Config::default(), |_| {});
        sys.new_blob("m", 4, BlockRole::MasterConsumer, trig("mt"), trig("mp"));
        assert_eq!(sys.call("m", 1000, 128), CallOutcome::Enqueued);
    }

    #[test]
    fn events_reach_the_registered_callback() {
        let (near, _far) = LoopbackTransport::pair();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sys = LinkSystem::init(Arc::new(near), Config::default(), move |_event| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        sys.new_blob("e", 4, BlockRole::MasterConsumer, trig("et"), trig("ep"));
        sys.call("e", 1000, 128);
        // master-call fires as soon as the master thread dequeues the request.
        std::thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::Relaxed) > 0);
    }
}
