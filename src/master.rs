// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The master state machine (spec §4.6): issues a trigger for one named
// block, waits out the slave's trigger-response, then drives the chunk
// loop to completion, swapping the block's storage in on success.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::demux::ConsumerPort;
use crate::event::{ChunkEvent, Event, EventSink};
use crate::frame::{find_token, ChunkRequest, ChunkResponse, TriggerResponse, RESEND_WAIT};
use crate::registry::Registry;
use crate::transport::Transport;

/// Upper bound on an announced `payload_length`, standing in for the
/// allocation failure the source models with a failed `malloc`: safe
/// Rust's `Vec` allocator does not fail gracefully, so a trigger-response
/// claiming more than this is treated as an alloc error instead.
pub const MAX_TRANSFER_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MasterState {
    Init,
    Chunk,
    Ending,
    Abort,
}

pub struct MasterConfig {
    /// Bounded wait on the demultiplexer, spec §5: "twice the step interval".
    pub read_timeout: Duration,
}

/// Outcome of one `run_transfer` call, independent of the public `call()`
/// return codes `system.rs` derives from it (found/not-found/slave-owned
/// are rejected before a `MasterMachine` is ever invoked). An oversized
/// trigger-response alloc failure does not surface here: spec §4.6 has it
/// fall back to idle and re-trigger rather than end the call, so it only
/// ever shows up as a delayed `Timeout` if the peer keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Updated { length: usize },
    Timeout,
}

pub struct MasterMachine {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    port: ConsumerPort,
    events: EventSink,
    cfg: MasterConfig,
}

impl MasterMachine {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        port: ConsumerPort,
        events: EventSink,
        cfg: MasterConfig,
    ) -> Self {
        Self { registry, transport, port, events, cfg }
    }

    /// Run one full transfer of `block_name` to completion. The caller is
    /// responsible for having already rejected not-found and
    /// slave-owned blocks, and for parking the local slave task for the
    /// duration (spec §4.6, §5: the two state machines never share the
    /// transport at once).
    pub fn run_transfer(&self, block_name: &str, max_chunk_size: u16, call_timeout: Duration) -> TransferOutcome {
        self.events.emit(Event::MasterCall { block: block_name.to_string() });

        let access = match self.registry.grab(block_name, call_timeout) {
            Ok(a) => a,
            Err(_) => {
                self.events.emit(Event::MasterTimeout { block: block_name.to_string() });
                return TransferOutcome::Timeout;
            }
        };
        let block = access.block().clone();

        let send_trigger = |transport: &dyn Transport, trigger_token: &[u8; 8]| {
            let req = ChunkRequest { max_size: max_chunk_size, resend: 0 };
            let mut wire = trigger_token.to_vec();
            wire.extend_from_slice(&req.encode());
            transport.write_all(&wire);
        };
        send_trigger(self.transport.as_ref(), block.trigger());

        let mut buf: Vec<u8> = Vec::new();
        let mut state = MasterState::Init;
        let mut last_progress = Instant::now();
        let mut accumulator: Vec<u8> = Vec::new();
        let mut payload_size: usize = 0;
        let mut payload_count: usize = 0;
        let mut resend: u8 = 0;
        let mut count: u8 = 0;

        let outcome = loop {
            if state != MasterState::Ending
                && state != MasterState::Abort
                && Instant::now().saturating_duration_since(last_progress) > call_timeout
            {
                self.events.emit(Event::MasterTimeout { block: block_name.to_string() });
                state = MasterState::Abort;
            }

            match state {
                MasterState::Init => {
                    self.port.read_bytes(&mut buf, self.cfg.read_timeout);
                    let Some(pos) = find_token(&buf, block.trigger()) else { continue };
                    if buf.len() < pos + 8 + 4 {
                        continue;
                    }
                    let header: [u8; 4] = buf[pos + 8..pos + 12].try_into().expect("slice is 4 bytes");
                    buf.drain(..pos + 12);
                    let Some(resp) = TriggerResponse::decode(&header) else {
                        continue; // header-crc-invalid: keep scanning, spec §7
                    };
                    last_progress = Instant::now();
                    let length = resp.payload_length as usize;
                    if length > MAX_TRANSFER_BYTES {
                        // spec §4.6: allocation failure falls back to idle and re-triggers,
                        // it does not abort the call outright.
                        self.events.emit(Event::MasterAllocError { block: block_name.to_string() });
                        send_trigger(self.transport.as_ref(), block.trigger());
                        continue;
                    }
                    accumulator = vec![0u8; length];
                    payload_size = length;
                    payload_count = 0;
                    resend = 0;
                    count = 0;
                    self.events
                        .emit(Event::MasterAnswered { block: block_name.to_string(), payload_length: length as u32 });
                    state = MasterState::Chunk;
                }
                MasterState::Chunk => {
                    self.port.read_bytes(&mut buf, self.cfg.read_timeout);
                    let Some(pos) = find_token(&buf, block.pattern()) else { continue };
                    if buf.len() < pos + 8 + 4 {
                        continue;
                    }
                    let header: [u8; 4] = buf[pos + 8..pos + 12].try_into().expect("slice is 4 bytes");
                    let Some(resp) = ChunkResponse::decode(&header) else {
                        buf.drain(..pos + 1);
                        continue; // header-crc-invalid: drop one byte and rescan
                    };

                    let body_start = pos + 12;
                    let needed = resp.size as usize + 4;
                    if buf.len() < body_start + needed {
                        resend = RESEND_WAIT; // not enough bytes yet; don't transmit this cycle
                        continue;
                    }

                    last_progress = Instant::now();
                    let payload = buf[body_start..body_start + resp.size as usize].to_vec();
                    let tail: [u8; 4] = buf[body_start + resp.size as usize..body_start + needed]
                        .try_into()
                        .expect("slice is 4 bytes");
                    buf.drain(..body_start + needed);

                    if crate::frame::verify_payload(&payload, &tail) {
                        accumulator[payload_count..payload_count + payload.len()].copy_from_slice(&payload);
                        payload_count += payload.len();
                        count = resp.count;
                        resend = 0;
                        self.events.emit(Event::MasterChunkRx {
                            block: block_name.to_string(),
                            chunk: ChunkEvent { count, size: resp.size },
                        });
                    } else {
                        resend = 1;
                    }

                    if resend != RESEND_WAIT {
                        let req = ChunkRequest { max_size: max_chunk_size, resend };
                        let mut wire = block.pattern().to_vec();
                        wire.extend_from_slice(&req.encode());
                        self.transport.write_all(&wire);
                    }

                    if payload_count >= payload_size {
                        state = MasterState::Ending;
                    }
                }
                MasterState::Ending => {
                    break TransferOutcome::Updated { length: payload_size };
                }
                MasterState::Abort => {
                    break TransferOutcome::Timeout;
                }
            }
        };

        if let TransferOutcome::Updated { length } = outcome {
            self.registry.complete_master_transfer(&block, accumulator);
            self.events.emit(Event::MasterUpdated { block: block_name.to_string(), length });
        }
        let _ = self.registry.release(access);
        self.events.emit(Event::MasterIdle);
        outcome
    }
}
