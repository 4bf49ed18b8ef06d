// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The slave state machine (spec §4.5): scans incoming bytes for any
// locally-owned block's trigger, answers with the block's length, then
// streams chunks as the peer's master state machine requests them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::demux::ConsumerPort;
use crate::event::{ChunkEvent, Event, EventSink};
use crate::frame::{find_token, ChunkRequest, ChunkResponse, TriggerResponse};
use crate::registry::{Block, BlockAccess, BlockRole, Registry};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlaveState {
    Idle,
    Init,
    Chunk,
    Ending,
    Abort,
}

pub struct SlaveConfig {
    /// This peer's own ceiling on chunk size, independent of what the
    /// master requests (spec §4.5: `chunk_max = min(max_size, local_limit)`).
    pub local_chunk_limit: u16,
    /// `slave_timeout` — a session stuck mid-transfer this long aborts.
    pub session_timeout: Duration,
    /// Bounded wait on the demultiplexer, spec §5: "twice the step interval".
    pub read_timeout: Duration,
    /// Compaction threshold: once the scan buffer grows past this without
    /// progress, slide the trailing `legacy_bytes` to the front.
    pub max_buffer: usize,
    pub legacy_bytes: usize,
}

pub struct SlaveMachine {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    port: ConsumerPort,
    events: EventSink,
    cfg: SlaveConfig,
}

impl SlaveMachine {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        port: ConsumerPort,
        events: EventSink,
        cfg: SlaveConfig,
    ) -> Self {
        Self { registry, transport, port, events, cfg }
    }

    /// Run the slave loop until `should_stop` returns true. Each idle->…
    /// ->ending/abort cycle serves at most one transfer for one
    /// slave-owned block; control returns to idle scanning afterward.
    pub fn run(&self, should_stop: impl Fn() -> bool) {
        let mut buf: Vec<u8> = Vec::new();
        while !should_stop() {
            self.compact(&mut buf);
            self.port.read_bytes(&mut buf, self.cfg.read_timeout);
            self.serve_one_cycle(&mut buf);
        }
    }

    fn compact(&self, buf: &mut Vec<u8>) {
        if buf.len() > self.cfg.max_buffer {
            let keep_from = buf.len().saturating_sub(self.cfg.legacy_bytes);
            buf.drain(..keep_from);
        }
    }

    /// Scan for a trigger match and, if one is found, run that transfer
    /// to completion (ending or abort) before returning.
    fn serve_one_cycle(&self, buf: &mut Vec<u8>) {
        let owned: Vec<Arc<Block>> = self
            .registry
            .iter()
            .into_iter()
            .filter(|b| b.role() == BlockRole::SlaveOwned)
            .collect();

        let Some((pos, block)) = self.find_trigger_match(buf, &owned) else {
            return;
        };
        if buf.len() < pos + 8 + 4 {
            return; // header not fully arrived yet; try again next read
        }
        let header: [u8; 4] = buf[pos + 8..pos + 12].try_into().expect("slice is 4 bytes");
        let Some(open) = ChunkRequest::decode(&header) else {
            return; // header CRC invalid: remain idle, scan again next cycle
        };

        self.events.emit(Event::SlaveDemanded { block: block.name().to_string() });
        buf[pos..pos + 8].copy_from_slice(block.pattern());
        buf.drain(..pos);

        let chunk_max = open.max_size.min(self.cfg.local_chunk_limit);
        if open.resend != 0 {
            // spec §4.5: resend set on the initial request aborts. Route
            // through run_session's abort arm rather than returning bare,
            // so the ending/abort release-and-emit sequence still runs
            // even though no mutex was ever taken (mtos.c's abort path
            // always posts the released event before returning to idle).
            self.run_session(buf, &block, chunk_max, SlaveState::Abort);
            return;
        }

        self.run_session(buf, &block, chunk_max, SlaveState::Init);
    }

    fn find_trigger_match<'a>(&self, buf: &[u8], owned: &'a [Arc<Block>]) -> Option<(usize, Arc<Block>)> {
        let mut best: Option<(usize, Arc<Block>)> = None;
        for block in owned {
            if let Some(pos) = find_token(buf, block.trigger()) {
                if best.as_ref().map(|(p, _)| pos < *p).unwrap_or(true) {
                    best = Some((pos, block.clone()));
                }
            }
        }
        best
    }

    fn run_session(&self, buf: &mut Vec<u8>, block: &Arc<Block>, chunk_max: u16, start: SlaveState) {
        let mut state = start;
        let mut last_progress = Instant::now();
        let mut access: Option<BlockAccess> = None;
        let mut bytes_confirmed: usize = 0;
        let mut bytes_to_send: usize = 0;
        let mut count: u8 = 0;
        let mut length: usize = 0;

        loop {
            if state != SlaveState::Ending
                && state != SlaveState::Abort
                && Instant::now().saturating_duration_since(last_progress) > self.cfg.session_timeout
            {
                self.events.emit(Event::SlaveTimeout { block: block.name().to_string() });
                state = SlaveState::Abort;
            }

            match state {
                SlaveState::Idle => unreachable!("run_session only entered after a trigger match"),
                SlaveState::Init => {
                    match self.registry.grab(block.name(), self.cfg.session_timeout) {
                        Ok(a) => {
                            length = a.len();
                            let resp = TriggerResponse { payload_length: length as u32 };
                            let mut wire = block.trigger().to_vec();
                            wire.extend_from_slice(&resp.encode());
                            self.transport.write_all(&wire);
                            self.events.emit(Event::SlaveInited { block: block.name().to_string() });
                            access = Some(a);
                            last_progress = Instant::now();
                            state = SlaveState::Chunk;
                        }
                        Err(_) => {
                            state = SlaveState::Abort;
                        }
                    }
                }
                SlaveState::Chunk => {
                    self.port.read_bytes(buf, self.cfg.read_timeout);
                    let Some(pos) = find_token(buf, block.pattern()) else { continue };
                    if buf.len() < pos + 8 + 4 {
                        continue;
                    }
                    let header: [u8; 4] = buf[pos + 8..pos + 12].try_into().expect("slice is 4 bytes");
                    let Some(req) = ChunkRequest::decode(&header) else {
                        buf.drain(..pos + 1);
                        continue;
                    };
                    buf.drain(..pos + 12);
                    last_progress = Instant::now();

                    if req.resend == 0 {
                        bytes_confirmed += bytes_to_send;
                        bytes_to_send = chunk_max as usize;
                        bytes_to_send = bytes_to_send.min(length - bytes_confirmed);
                        count = count.wrapping_add(1);
                    }
                    if bytes_confirmed == length {
                        state = SlaveState::Ending;
                        continue;
                    }
                    let chunk = access.as_ref().expect("locked for the chunk phase").with_bytes(|bytes| {
                        bytes[bytes_confirmed..bytes_confirmed + bytes_to_send].to_vec()
                    });
                    let resp = ChunkResponse { size: bytes_to_send as u16, count };
                    let mut wire = block.pattern().to_vec();
                    wire.extend_from_slice(&resp.encode());
                    wire.extend_from_slice(&chunk);
                    wire.extend_from_slice(&crate::frame::payload_tail(&chunk));
                    self.transport.write_all(&wire);
                    self.events.emit(Event::SlaveChunkRq {
                        block: block.name().to_string(),
                        chunk: ChunkEvent { count, size: bytes_to_send as u16 },
                    });
                }
                SlaveState::Ending | SlaveState::Abort => {
                    if let Some(a) = access.take() {
                        let _ = self.registry.release(a);
                    }
                    self.events.emit(Event::SlaveReleased { block: block.name().to_string() });
                    if state == SlaveState::Ending {
                        self.events.emit(Event::SlaveFinished { block: block.name().to_string() });
                    }
                    return;
                }
            }
        }
    }
}
