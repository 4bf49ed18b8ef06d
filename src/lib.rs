// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// A named, mutex-guarded shared-memory block registry for two embedded
// peers connected by a single full-duplex byte stream, plus the chunked,
// CRC-verified master/slave transfer protocol that keeps one peer's copy
// of a named block in sync with its counterpart's.

mod crc;
mod error;

pub mod accessor;
pub mod demux;
pub mod event;
pub mod frame;
pub mod master;
pub mod registry;
pub mod slave;
pub mod system;
pub mod transport;

pub use error::{LinkError, Result};
pub use event::{ChunkEvent, Event, EventSink};
pub use registry::{Block, BlockKind, BlockRole, Registry};
pub use system::{CallOutcome, Config, LinkSystem};
pub use transport::{LoopbackTransport, Transport};
