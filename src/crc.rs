// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// CRC-8 (header) and CRC-32 (payload) primitives, both computed big-endian
// as the fleet's existing wire format expects. Neither the teacher crate nor
// the rest of the pack hand-rolls a CRC table; this follows the same
// catalog-algorithm approach as `oxidecomputer-hubris` and
// `wtfrank-dump_btrfs`, both of which pull a named `crc::Algorithm` out of
// the `crc` crate rather than writing one.

use crc::{Crc, CRC_32_MPEG_2, CRC_8_SMBUS};

static HEADER_CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
static PAYLOAD_CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC-8 over a header's first 3 bytes, stored in byte 3.
pub fn crc8_be(data: &[u8]) -> u8 {
    HEADER_CRC8.checksum(data)
}

/// CRC-32 over a block's full contents or a chunk's payload bytes.
pub fn crc32_be(data: &[u8]) -> u32 {
    PAYLOAD_CRC32.checksum(data)
}

/// Encode a CRC-32 as the big-endian 4-byte wire tail.
pub fn crc32_be_bytes(data: &[u8]) -> [u8; 4] {
    crc32_be(data).to_be_bytes()
}
