// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The accessor façade (spec §4.2): byte/string primitive operations keyed
// by block name. Grounded on `scoped_access.rs`'s RAII guard — lock,
// operate directly on the mapped bytes, unlock — generalized from raw shm
// pointers to the registry's per-block storage.
//
// Every operation here follows the same contract: acquire the block's
// mutex unconditionally, perform the operation, recompute the block's
// CRC-32 if it mutated storage, release the lock. If the named block does
// not exist, return `None` with no side effect — mirroring the C
// convention of a null pointer/negative result rather than a registry
// error, since these are meant to be used exactly like their libc
// namesakes.

use std::cmp::Ordering;
use std::time::Duration;

use crate::registry::Registry;

const FACADE_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Index of the first NUL byte in `bytes`, or `bytes.len()` if unterminated.
fn cstr_len(bytes: &[u8]) -> usize {
    bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len())
}

/// `strlen` — length of the block's contents up to its first NUL byte.
pub fn strlen(reg: &Registry, name: &str) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let len = access.with_bytes(cstr_len);
    reg.release(access).ok()?;
    Some(len)
}

/// `strcpy` — overwrite the block's contents with `src` plus a NUL
/// terminator. Returns the number of bytes written (including the NUL).
pub fn strcpy(reg: &Registry, name: &str, src: &[u8]) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let written = access.with_bytes_mut(|dst| {
        let n = (src.len() + 1).min(dst.len());
        dst[..n.saturating_sub(1)].copy_from_slice(&src[..n.saturating_sub(1)]);
        if n > 0 {
            dst[n - 1] = 0;
        }
        n
    });
    reg.release(access).ok()?;
    Some(written)
}

/// `strncpy` — bounded copy: at most `n` bytes of `src`, zero-padding the
/// remainder of the first `n` bytes of the block if `src` is shorter.
pub fn strncpy(reg: &Registry, name: &str, src: &[u8], n: usize) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let written = access.with_bytes_mut(|dst| {
        let cap = n.min(dst.len());
        let copy_len = src.len().min(cap);
        dst[..copy_len].copy_from_slice(&src[..copy_len]);
        for b in &mut dst[copy_len..cap] {
            *b = 0;
        }
        cap
    });
    reg.release(access).ok()?;
    Some(written)
}

/// `strcat` — append `src` after the block's existing NUL-terminated
/// contents, re-terminating. Returns the new string length (excluding NUL).
pub fn strcat(reg: &Registry, name: &str, src: &[u8]) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let new_len = access.with_bytes_mut(|dst| {
        let start = cstr_len(dst);
        let room = dst.len().saturating_sub(start + 1);
        let take = src.len().min(room);
        dst[start..start + take].copy_from_slice(&src[..take]);
        if start + take < dst.len() {
            dst[start + take] = 0;
        }
        start + take
    });
    reg.release(access).ok()?;
    Some(new_len)
}

/// `strncat` — bounded append: at most `n` bytes of `src`.
pub fn strncat(reg: &Registry, name: &str, src: &[u8], n: usize) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let new_len = access.with_bytes_mut(|dst| {
        let start = cstr_len(dst);
        let room = dst.len().saturating_sub(start + 1);
        let take = src.len().min(n).min(room);
        dst[start..start + take].copy_from_slice(&src[..take]);
        if start + take < dst.len() {
            dst[start + take] = 0;
        }
        start + take
    });
    reg.release(access).ok()?;
    Some(new_len)
}

/// `strcmp` — lexicographic comparison of the block's NUL-terminated
/// contents against `other`.
pub fn strcmp(reg: &Registry, name: &str, other: &[u8]) -> Option<Ordering> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let ord = access.with_bytes(|dst| {
        let a = &dst[..cstr_len(dst)];
        let b = &other[..cstr_len(other)];
        a.cmp(b)
    });
    reg.release(access).ok()?;
    Some(ord)
}

/// `strncmp` — bounded lexicographic comparison, at most `n` bytes.
pub fn strncmp(reg: &Registry, name: &str, other: &[u8], n: usize) -> Option<Ordering> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let ord = access.with_bytes(|dst| {
        let a = &dst[..cstr_len(dst).min(n)];
        let b = &other[..cstr_len(other).min(n)];
        a.cmp(b)
    });
    reg.release(access).ok()?;
    Some(ord)
}

/// `strchr` — index of the first occurrence of `byte` in the block's
/// NUL-terminated contents (search includes the terminator itself).
pub fn strchr(reg: &Registry, name: &str, byte: u8) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let found = access.with_bytes(|dst| {
        let len = cstr_len(dst);
        let end = (len + 1).min(dst.len());
        dst[..end].iter().position(|&b| b == byte)
    });
    reg.release(access).ok()?;
    found
}

/// `strrchr` — index of the last occurrence of `byte` before the
/// terminator.
pub fn strrchr(reg: &Registry, name: &str, byte: u8) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let found = access.with_bytes(|dst| {
        let len = cstr_len(dst);
        dst[..len].iter().rposition(|&b| b == byte)
    });
    reg.release(access).ok()?;
    found
}

/// `strpbrk` — index of the first byte in the block's contents that also
/// occurs in `accept`.
pub fn strpbrk(reg: &Registry, name: &str, accept: &[u8]) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let found = access.with_bytes(|dst| {
        let len = cstr_len(dst);
        dst[..len].iter().position(|b| accept.contains(b))
    });
    reg.release(access).ok()?;
    found
}

/// `strstr` — index of the first occurrence of `needle` in the block's
/// contents.
pub fn strstr(reg: &Registry, name: &str, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let found = access.with_bytes(|dst| {
        let len = cstr_len(dst);
        dst[..len].windows(needle.len()).position(|w| w == needle)
    });
    reg.release(access).ok()?;
    found
}

/// `strtok` — replacement for the stateful libc call: tokenizes the
/// block's contents on any byte in `delims`, writing a NUL over the
/// delimiter it consumes (mutating the block) and resuming from `pos` on
/// the next call, matching `strtok_r`'s reentrant-state convention rather
/// than libc's single hidden global.
pub fn strtok(reg: &Registry, name: &str, delims: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let token = access.with_bytes_mut(|dst| {
        let len = cstr_len(dst);
        let mut i = *pos;
        while i < len && delims.contains(&dst[i]) {
            i += 1;
        }
        if i >= len {
            *pos = len;
            return None;
        }
        let start = i;
        while i < len && !delims.contains(&dst[i]) {
            i += 1;
        }
        let token = dst[start..i].to_vec();
        if i < len {
            dst[i] = 0;
            i += 1;
        }
        *pos = i;
        Some(token)
    });
    reg.release(access).ok()?;
    token
}

/// `memset` — fill the first `len` bytes of the block's storage with `value`.
pub fn memset(reg: &Registry, name: &str, value: u8, len: usize) -> Option<()> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    access.with_bytes_mut(|dst| {
        let n = len.min(dst.len());
        for b in &mut dst[..n] {
            *b = value;
        }
    });
    reg.release(access).ok()?;
    Some(())
}

/// `memcpy` — copy `src` into the start of the block's storage (truncated
/// to the block's length).
pub fn memcpy(reg: &Registry, name: &str, src: &[u8]) -> Option<usize> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let n = access.with_bytes_mut(|dst| {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    });
    reg.release(access).ok()?;
    Some(n)
}

/// `memmove` — copy `len` bytes from `src_offset` to `dst_offset` within
/// the same block's storage, correct under overlap.
pub fn memmove(reg: &Registry, name: &str, src_offset: usize, dst_offset: usize, len: usize) -> Option<()> {
    let access = reg.grab(name, FACADE_LOCK_TIMEOUT).ok()?;
    let ok = access.with_bytes_mut(|dst| {
        if src_offset + len > dst.len() || dst_offset + len > dst.len() {
            return false;
        }
        dst.copy_within(src_offset..src_offset + len, dst_offset);
        true
    });
    reg.release(access).ok()?;
    ok.then_some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BlockRole;

    fn trig(tag: &str) -> [u8; 8] {
        let mut t = [0u8; 8];
        let bytes = tag.as_bytes();
        let n = bytes.len().min(8);
        t[..n].copy_from_slice(&bytes[..n]);
        t
    }

    fn fixture() -> Registry {
        let reg = Registry::new();
        reg.new_blob("s", 32, BlockRole::MasterConsumer, trig("st"), trig("sp")).unwrap();
        reg
    }

    #[test]
    fn strcpy_then_strlen_roundtrip() {
        let reg = fixture();
        strcpy(&reg, "s", b"hello").unwrap();
        assert_eq!(strlen(&reg, "s"), Some(5));
    }

    #[test]
    fn strcat_appends_after_existing_contents() {
        let reg = fixture();
        strcpy(&reg, "s", b"foo").unwrap();
        strcat(&reg, "s", b"bar").unwrap();
        assert_eq!(strlen(&reg, "s"), Some(6));
        assert_eq!(strcmp(&reg, "s", b"foobar"), Some(Ordering::Equal));
    }

    #[test]
    fn strstr_and_strchr_find_expected_offsets() {
        let reg = fixture();
        strcpy(&reg, "s", b"needle in haystack").unwrap();
        assert_eq!(strstr(&reg, "s", b"haystack"), Some(10));
        assert_eq!(strchr(&reg, "s", b' '), Some(6));
        assert_eq!(strrchr(&reg, "s", b' '), Some(9));
    }

    #[test]
    fn strtok_splits_on_delimiters_and_mutates_storage() {
        let reg = fixture();
        strcpy(&reg, "s", b"a,bb,ccc").unwrap();
        let mut pos = 0;
        assert_eq!(strtok(&reg, "s", b",", &mut pos), Some(b"a".to_vec()));
        assert_eq!(strtok(&reg, "s", b",", &mut pos), Some(b"bb".to_vec()));
        assert_eq!(strtok(&reg, "s", b",", &mut pos), Some(b"ccc".to_vec()));
        assert_eq!(strtok(&reg, "s", b",", &mut pos), None);
    }

    #[test]
    fn memset_then_memmove_shifts_bytes() {
        let reg = fixture();
        memcpy(&reg, "s", &[1, 2, 3, 4, 5]).unwrap();
        memmove(&reg, "s", 0, 2, 3).unwrap();
        let access = reg.grab("s", Duration::from_secs(1)).unwrap();
        access.with_bytes(|b| assert_eq!(&b[..5], &[1, 2, 1, 2, 3]));
        reg.release(access).unwrap();
    }

    #[test]
    fn missing_block_returns_none_with_no_side_effect() {
        let reg = fixture();
        assert_eq!(strlen(&reg, "missing"), None);
        assert_eq!(strcpy(&reg, "missing", b"x"), None);
    }
}
