// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The event sink (spec §4.7, §6). A single user callback fired on protocol
// milestones and error conditions — this is the crate's entire
// observability surface, standing in for the `ESP_LOGI` call sites of the
// pre-distillation source rather than a logging framework: the teacher
// crate carries no logging dependency either (it relies on `io::Result`
// and, in its demo binaries, `println!`), so events are simply structured
// in place of log lines.

use std::sync::Arc;

/// Per-chunk data carried by a `master-chunk-rx` or `slave-chunk-rq` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEvent {
    pub count: u8,
    pub size: u16,
}

/// One protocol milestone or error condition, per spec §6's stable event
/// ID ordering within a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MasterCall { block: String },
    MasterAnswered { block: String, payload_length: u32 },
    MasterChunkRx { block: String, chunk: ChunkEvent },
    MasterUpdated { block: String, length: usize },
    MasterIdle,
    MasterTimeout { block: String },
    MasterAllocError { block: String },
    SlaveInited { block: String },
    SlaveDemanded { block: String },
    SlaveChunkRq { block: String, chunk: ChunkEvent },
    SlaveReleased { block: String },
    SlaveFinished { block: String },
    SlaveTimeout { block: String },
    SlaveAllocError { block: String },
}

/// Single-consumer callback fired on every [`Event`]. Lifetime of event
/// data is the callback invocation, matching spec §4.7.
#[derive(Clone)]
pub struct EventSink {
    callback: Arc<dyn Fn(&Event) + Send + Sync>,
}

impl EventSink {
    pub fn new(callback: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Self { callback: Arc::new(callback) }
    }

    /// An event sink that discards everything, for callers that don't
    /// need observability (e.g. one-off `call`s in a test).
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: Event) {
        (self.callback)(&event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callback_observes_emitted_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sink = EventSink::new(move |_event| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        sink.emit(Event::MasterIdle);
        sink.emit(Event::SlaveReleased { block: "x".into() });
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = EventSink::noop();
        sink.emit(Event::MasterCall { block: "b".into() });
    }
}
