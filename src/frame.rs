// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The frame codec (spec §4.3, §6). Four 4-byte header shapes share the same
// footprint so a receiver can delay disambiguation until role-specific
// state is known, the same packed/union-of-shapes approach `channel.rs`
// uses for its `RingSlot`/`RingHeader` wire layout.

use crate::crc::{crc32_be, crc8_be};

/// Reserved by the master side only: "do not transmit a request this
/// cycle; I am still waiting for bytes". Never placed on the wire.
pub const RESEND_WAIT: u8 = 0xFF;

/// A fixed-width 8-byte token (trigger or pattern).
pub type Token = [u8; 8];

/// `chunk_request` — master → slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub max_size: u16,
    pub resend: u8,
}

impl ChunkRequest {
    /// Encode to the 4-byte wire form, header CRC-8 in byte 3.
    ///
    /// `resend == RESEND_WAIT` must never reach the wire (spec §4.3): the
    /// master only uses it as an internal sentinel to skip a cycle.
    pub fn encode(&self) -> [u8; 4] {
        debug_assert_ne!(
            self.resend, RESEND_WAIT,
            "RESEND_WAIT is sender-internal only and must not be placed on the wire"
        );
        let mut out = [0u8; 4];
        out[0..2].copy_from_slice(&self.max_size.to_le_bytes());
        out[2] = self.resend;
        out[3] = crc8_be(&out[0..3]);
        out
    }

    /// Decode and verify a candidate 4-byte header. Returns `None` on CRC
    /// mismatch (spec §7: header-crc-invalid is silently ignored).
    pub fn decode(bytes: &[u8; 4]) -> Option<Self> {
        if crc8_be(&bytes[0..3]) != bytes[3] {
            return None;
        }
        Some(Self {
            max_size: u16::from_le_bytes([bytes[0], bytes[1]]),
            resend: bytes[2],
        })
    }
}

/// `chunk_response` — slave → master. Followed on the wire by `size`
/// payload bytes and a 4-byte big-endian CRC-32 tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResponse {
    pub size: u16,
    pub count: u8,
}

impl ChunkResponse {
    pub fn encode(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out[0..2].copy_from_slice(&self.size.to_le_bytes());
        out[2] = self.count;
        out[3] = crc8_be(&out[0..3]);
        out
    }

    pub fn decode(bytes: &[u8; 4]) -> Option<Self> {
        if crc8_be(&bytes[0..3]) != bytes[3] {
            return None;
        }
        Some(Self {
            size: u16::from_le_bytes([bytes[0], bytes[1]]),
            count: bytes[2],
        })
    }
}

/// `trigger_response` — slave → master: the block's current length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerResponse {
    pub payload_length: u32, // only the low 24 bits are meaningful on the wire
}

impl TriggerResponse {
    pub fn encode(&self) -> [u8; 4] {
        debug_assert!(self.payload_length <= 0x00FF_FFFF, "payload_length must fit in 24 bits");
        let le = self.payload_length.to_le_bytes();
        let mut out = [le[0], le[1], le[2], 0];
        out[3] = crc8_be(&out[0..3]);
        out
    }

    pub fn decode(bytes: &[u8; 4]) -> Option<Self> {
        if crc8_be(&bytes[0..3]) != bytes[3] {
            return None;
        }
        Some(Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
        })
    }
}

/// Index of the first occurrence of an 8-byte token in `haystack`.
pub fn find_token(haystack: &[u8], token: &Token) -> Option<usize> {
    if haystack.len() < token.len() {
        return None;
    }
    haystack.windows(token.len()).position(|w| w == token)
}

/// Build the 4-byte big-endian CRC-32 tail for a chunk's payload.
pub fn payload_tail(payload: &[u8]) -> [u8; 4] {
    crc32_be(payload).to_be_bytes()
}

/// Verify a chunk payload against its 4-byte big-endian CRC-32 tail.
pub fn verify_payload(payload: &[u8], tail: &[u8; 4]) -> bool {
    crc32_be(payload) == u32::from_be_bytes(*tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_request_roundtrips() {
        let req = ChunkRequest { max_size: 4096, resend: 0 };
        let wire = req.encode();
        assert_eq!(ChunkRequest::decode(&wire), Some(req));
    }

    #[test]
    fn header_with_flipped_bit_fails_crc() {
        let req = ChunkRequest { max_size: 32, resend: 1 };
        let mut wire = req.encode();
        wire[0] ^= 0x01;
        assert_eq!(ChunkRequest::decode(&wire), None);
    }

    #[test]
    fn trigger_response_roundtrips() {
        let resp = TriggerResponse { payload_length: 100 };
        let wire = resp.encode();
        assert_eq!(TriggerResponse::decode(&wire), Some(resp));
    }

    #[test]
    fn chunk_response_roundtrips() {
        let resp = ChunkResponse { size: 32, count: 3 };
        let wire = resp.encode();
        assert_eq!(ChunkResponse::decode(&wire), Some(resp));
    }

    #[test]
    fn payload_tail_detects_corruption() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let tail = payload_tail(&payload);
        assert!(verify_payload(&payload, &tail));
        let mut corrupted = payload.clone();
        corrupted[2] ^= 0xFF;
        assert!(!verify_payload(&corrupted, &tail));
    }

    #[test]
    #[should_panic]
    fn encode_asserts_resend_wait_never_on_wire() {
        let req = ChunkRequest { max_size: 10, resend: RESEND_WAIT };
        let _ = req.encode();
    }
}
