// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The underlying byte-stream transport is out of scope for this crate
// (spec §1): it is treated as an abstract full-duplex channel yielding and
// accepting opaque byte sequences. `Transport` is the seam; a real UART
// driver implements it on the target, and `LoopbackTransport` stands in
// for it in tests — the same role the teacher's `platform::PlatformShm`/
// `PlatformMutex` traits play in hiding POSIX vs. Windows behind one
// surface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A full-duplex byte-stream collaborator. Implementors need not be
/// reliable or ordered beyond "bytes written are eventually readable in
/// the order written" — that guarantee is all the demultiplexer and state
/// machines rely on.
pub trait Transport: Send + Sync {
    /// Drain whatever bytes are currently buffered, without blocking.
    /// Returns an empty vector if nothing is available.
    fn read_available(&self) -> Vec<u8>;

    /// Write a complete frame. Implementations are expected to make this
    /// atomic with respect to other writers (spec §5: at most one state
    /// machine sends at a time, so no internal locking is required here).
    fn write_all(&self, bytes: &[u8]);
}

/// An in-memory, single-process loopback pair: bytes written to one end
/// are readable from the other. Used by the test suite in place of a real
/// UART.
pub struct LoopbackTransport {
    outgoing: Arc<Mutex<VecDeque<u8>>>,
    incoming: Arc<Mutex<VecDeque<u8>>>,
}

impl LoopbackTransport {
    /// Construct a connected pair: `(a, b)` where bytes `a` writes are
    /// read by `b`, and vice versa.
    pub fn pair() -> (Self, Self) {
        let ab = Arc::new(Mutex::new(VecDeque::new()));
        let ba = Arc::new(Mutex::new(VecDeque::new()));
        (
            LoopbackTransport { outgoing: ab.clone(), incoming: ba.clone() },
            LoopbackTransport { outgoing: ba, incoming: ab },
        )
    }
}

impl Transport for LoopbackTransport {
    fn read_available(&self) -> Vec<u8> {
        let mut q = self.incoming.lock().unwrap_or_else(|p| p.into_inner());
        q.drain(..).collect()
    }

    fn write_all(&self, bytes: &[u8]) {
        let mut q = self.outgoing.lock().unwrap_or_else(|p| p.into_inner());
        q.extend(bytes.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_delivers_bytes_in_order() {
        let (a, b) = LoopbackTransport::pair();
        a.write_all(&[1, 2, 3]);
        a.write_all(&[4, 5]);
        assert_eq!(b.read_available(), vec![1, 2, 3, 4, 5]);
        assert!(b.read_available().is_empty());
    }

    #[test]
    fn pair_is_full_duplex() {
        let (a, b) = LoopbackTransport::pair();
        a.write_all(&[9]);
        b.write_all(&[8]);
        assert_eq!(b.read_available(), vec![9]);
        assert_eq!(a.read_available(), vec![8]);
    }
}
