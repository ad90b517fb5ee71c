//! Wire codec for Schannel session-cache control messages.
//!
//! The security authority speaks a fixed-layout binary protocol. Every
//! request starts with the same header shape (message tag, zeroed logon
//! LUID, a UNICODE_STRING-style server-name reference, flags); the purge
//! request optionally carries the server name as null-terminated UTF-16LE
//! bytes placed immediately after the header in the same allocation.
//!
//! Header layout (integers little-endian, pointer-width native):
//!
//! ```text
//! +--------------------+----------------------+
//! | offset             | field                |
//! +--------------------+----------------------+
//! | 0                  | u32 messageType      |
//! | 4                  | LUID logonId (8B, 0) |
//! | align(12, ptr)     | u16 nameLength       |
//! |   +2               | u16 nameMaxLength    |
//! | align(+4, ptr)     | ptr nameBuffer       |
//! |   +ptr             | u32 flags            |
//! | align(+4, ptr)     | (header end)         |
//! +--------------------+----------------------+
//! ```
//!
//! 40 bytes on 64-bit targets, 24 on 32-bit. The tag and flag values are
//! protocol constants matching the provider's ABI exactly; a deviation
//! silently produces wrong results rather than a decode error, so they are
//! not configurable.

use std::collections::TryReserveError;
use std::mem::size_of;

use thiserror::Error;

use crate::types::{CacheInfo, PerfInfo};

/// Message tag: purge cached sessions.
pub const SSL_PURGE_CACHE_MESSAGE: u32 = 3;
/// Message tag: query aggregate cache counters.
pub const SSL_CACHE_INFO_MESSAGE: u32 = 4;
/// Message tag: query performance counters.
pub const SSL_PERFMON_INFO_MESSAGE: u32 = 5;

/// Cache-info query flag: include client-side entries.
pub const SSL_RETRIEVE_CLIENT_ENTRIES: u32 = 0x0000_0001;
/// Cache-info query flag: include server-side entries.
pub const SSL_RETRIEVE_SERVER_ENTRIES: u32 = 0x0000_0002;

/// Purge flag: client entries.
pub const SSL_PURGE_CLIENT_ENTRIES: u32 = 0x0000_0001;
/// Purge flag: server entries.
pub const SSL_PURGE_SERVER_ENTRIES: u32 = 0x0000_0002;
/// Purge flag: all client entries.
pub const SSL_PURGE_CLIENT_ALL_ENTRIES: u32 = 0x0001_0000;
/// Purge flag: all server entries.
pub const SSL_PURGE_SERVER_ALL_ENTRIES: u32 = 0x0002_0000;
/// Purge flag: also drop IIS-mapped server-name ("locator") entries.
pub const SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS: u32 = 0x0004_0000;

const PTR_SIZE: usize = size_of::<usize>();

const fn align_to(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Byte offset of the u32 message tag.
pub const MESSAGE_TYPE_OFFSET: usize = 0;
/// Byte offset of the 8-byte logon LUID (always zeroed by this client).
pub const LOGON_ID_OFFSET: usize = 4;
/// Byte offset of the server-name length field (bytes, excluding terminator).
pub const NAME_LENGTH_OFFSET: usize = align_to(LOGON_ID_OFFSET + 8, PTR_SIZE);
/// Byte offset of the server-name maximum-length field (bytes, including terminator).
pub const NAME_MAX_LENGTH_OFFSET: usize = NAME_LENGTH_OFFSET + 2;
/// Byte offset of the server-name buffer pointer.
pub const NAME_BUFFER_OFFSET: usize = align_to(NAME_MAX_LENGTH_OFFSET + 2, PTR_SIZE);
/// Byte offset of the u32 flags field.
pub const FLAGS_OFFSET: usize = NAME_BUFFER_OFFSET + PTR_SIZE;
/// Total header size; trailing name bytes start here.
pub const HEADER_SIZE: usize = align_to(FLAGS_OFFSET + 4, PTR_SIZE);

/// Size of the fixed cache-info response record (7 × u32).
pub const CACHE_INFO_RESPONSE_SIZE: usize = 28;
/// Size of the perfmon request record (tag + flags).
pub const PERFMON_REQUEST_SIZE: usize = 8;
/// Size of the fixed perfmon response record (8 × u32).
pub const PERFMON_RESPONSE_SIZE: usize = 32;

/// Errors from encoding requests or decoding authority responses.
#[derive(Debug, Error)]
pub enum WireError {
    /// The authority's response buffer is shorter than the fixed record.
    #[error("response truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Size of the fixed record being decoded.
        expected: usize,
        /// Bytes actually returned by the authority.
        actual: usize,
    },

    /// The server name does not fit the u16 wire length fields.
    #[error("server name too long for the wire format: {0} bytes")]
    NameTooLong(usize),

    /// The request buffer could not be allocated. The operation aborts
    /// before any channel call is attempted.
    #[error("failed to allocate request buffer: {0}")]
    Alloc(#[from] TryReserveError),
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Encode a cache-info query with the requested retrieve flags.
///
/// The logon LUID and the server-name reference stay zeroed; the query
/// message does not use them.
pub fn encode_cache_info_request(include_client: bool, include_server: bool) -> Vec<u8> {
    let mut flags = 0;
    if include_client {
        flags |= SSL_RETRIEVE_CLIENT_ENTRIES;
    }
    if include_server {
        flags |= SSL_RETRIEVE_SERVER_ENTRIES;
    }

    let mut buf = vec![0u8; HEADER_SIZE];
    write_u32(&mut buf, MESSAGE_TYPE_OFFSET, SSL_CACHE_INFO_MESSAGE);
    write_u32(&mut buf, FLAGS_OFFSET, flags);
    buf
}

/// Encode a purge request as one contiguous allocation.
///
/// When `server_name` is present and non-empty, the name is appended as a
/// null-terminated UTF-16LE sequence directly after the fixed header, and
/// the header's name reference is pointed at those trailing bytes: length
/// excludes the terminator, maximum length includes it, and the buffer
/// field holds the address of the trailing region inside this allocation.
/// The returned `Vec` must therefore not be reallocated before the call is
/// issued.
///
/// # Errors
///
/// Fails if the encoded name exceeds the u16 length fields or if the
/// buffer cannot be allocated; no channel call should be attempted after
/// either failure.
pub fn encode_purge_request(flags: u32, server_name: Option<&str>) -> Result<Vec<u8>, WireError> {
    let name: Option<Vec<u16>> = server_name
        .filter(|name| !name.is_empty())
        .map(|name| name.encode_utf16().chain(std::iter::once(0)).collect());

    let trailing_len = name.as_ref().map_or(0, |units| units.len() * 2);
    if trailing_len > u16::MAX as usize {
        return Err(WireError::NameTooLong(trailing_len));
    }

    let mut buf = Vec::new();
    buf.try_reserve_exact(HEADER_SIZE + trailing_len)?;
    buf.resize(HEADER_SIZE + trailing_len, 0);

    write_u32(&mut buf, MESSAGE_TYPE_OFFSET, SSL_PURGE_CACHE_MESSAGE);
    write_u32(&mut buf, FLAGS_OFFSET, flags);

    if let Some(units) = name {
        for (i, unit) in units.iter().enumerate() {
            write_u16(&mut buf, HEADER_SIZE + i * 2, *unit);
        }

        // Validated against u16::MAX above.
        write_u16(&mut buf, NAME_LENGTH_OFFSET, (trailing_len - 2) as u16);
        write_u16(&mut buf, NAME_MAX_LENGTH_OFFSET, trailing_len as u16);

        // The authority dereferences the name through this field; the name
        // lives at the tail of this same allocation. A Vec move transfers
        // the heap block, so the address stays valid until reallocation.
        let trailing_addr = buf.as_ptr() as usize + HEADER_SIZE;
        buf[NAME_BUFFER_OFFSET..NAME_BUFFER_OFFSET + PTR_SIZE]
            .copy_from_slice(&trailing_addr.to_le_bytes());
    }

    Ok(buf)
}

/// Encode a perfmon query (tag + zeroed flags).
pub fn encode_perfmon_request() -> Vec<u8> {
    let mut buf = vec![0u8; PERFMON_REQUEST_SIZE];
    write_u32(&mut buf, 0, SSL_PERFMON_INFO_MESSAGE);
    buf
}

/// Decode the fixed cache-info counter record from an authority-owned
/// buffer into an owned value. The caller releases the buffer afterwards
/// regardless of the outcome; no borrow of `bytes` survives this call.
pub fn decode_cache_info(bytes: &[u8]) -> Result<CacheInfo, WireError> {
    if bytes.len() < CACHE_INFO_RESPONSE_SIZE {
        return Err(WireError::Truncated {
            expected: CACHE_INFO_RESPONSE_SIZE,
            actual: bytes.len(),
        });
    }

    Ok(CacheInfo {
        cache_size: read_u32(bytes, 0),
        entries: read_u32(bytes, 4),
        active_entries: read_u32(bytes, 8),
        zombies: read_u32(bytes, 12),
        expired_zombies: read_u32(bytes, 16),
        aborted_zombies: read_u32(bytes, 20),
        deleted_zombies: read_u32(bytes, 24),
    })
}

/// Decode the fixed perfmon counter record.
pub fn decode_perf_info(bytes: &[u8]) -> Result<PerfInfo, WireError> {
    if bytes.len() < PERFMON_RESPONSE_SIZE {
        return Err(WireError::Truncated {
            expected: PERFMON_RESPONSE_SIZE,
            actual: bytes.len(),
        });
    }

    Ok(PerfInfo {
        client_cache_entries: read_u32(bytes, 0),
        server_cache_entries: read_u32(bytes, 4),
        client_active_entries: read_u32(bytes, 8),
        server_active_entries: read_u32(bytes, 12),
        client_handshakes_per_second: read_u32(bytes, 16),
        server_handshakes_per_second: read_u32(bytes, 20),
        client_reconnects_per_second: read_u32(bytes, 24),
        server_reconnects_per_second: read_u32(bytes, 28),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u16_at(buf: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([buf[offset], buf[offset + 1]])
    }

    fn read_ptr_at(buf: &[u8], offset: usize) -> usize {
        let mut bytes = [0u8; PTR_SIZE];
        bytes.copy_from_slice(&buf[offset..offset + PTR_SIZE]);
        usize::from_le_bytes(bytes)
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn header_offsets_on_64_bit() {
        assert_eq!(NAME_LENGTH_OFFSET, 16);
        assert_eq!(NAME_MAX_LENGTH_OFFSET, 18);
        assert_eq!(NAME_BUFFER_OFFSET, 24);
        assert_eq!(FLAGS_OFFSET, 32);
        assert_eq!(HEADER_SIZE, 40);
    }

    #[test]
    fn cache_info_request_layout() {
        let buf = encode_cache_info_request(true, true);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(read_u32(&buf, MESSAGE_TYPE_OFFSET), SSL_CACHE_INFO_MESSAGE);
        assert_eq!(
            read_u32(&buf, FLAGS_OFFSET),
            SSL_RETRIEVE_CLIENT_ENTRIES | SSL_RETRIEVE_SERVER_ENTRIES
        );

        // LUID and name reference stay zeroed.
        assert!(buf[LOGON_ID_OFFSET..LOGON_ID_OFFSET + 8].iter().all(|b| *b == 0));
        assert_eq!(read_u16_at(&buf, NAME_LENGTH_OFFSET), 0);
        assert_eq!(read_ptr_at(&buf, NAME_BUFFER_OFFSET), 0);
    }

    #[test]
    fn cache_info_request_client_only() {
        let buf = encode_cache_info_request(true, false);
        assert_eq!(read_u32(&buf, FLAGS_OFFSET), SSL_RETRIEVE_CLIENT_ENTRIES);
    }

    #[test]
    fn purge_request_without_name_is_header_only() {
        let buf = encode_purge_request(SSL_PURGE_CLIENT_ENTRIES, None).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(read_u32(&buf, MESSAGE_TYPE_OFFSET), SSL_PURGE_CACHE_MESSAGE);
        assert_eq!(read_u16_at(&buf, NAME_LENGTH_OFFSET), 0);
        assert_eq!(read_u16_at(&buf, NAME_MAX_LENGTH_OFFSET), 0);
        assert_eq!(read_ptr_at(&buf, NAME_BUFFER_OFFSET), 0);
    }

    #[test]
    fn purge_request_empty_name_treated_as_absent() {
        let buf = encode_purge_request(0, Some("")).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(read_u16_at(&buf, NAME_MAX_LENGTH_OFFSET), 0);
    }

    #[test]
    fn purge_request_name_round_trip() {
        let buf = encode_purge_request(SSL_PURGE_SERVER_ENTRIES, Some("host1")).unwrap();

        // "host1" is 5 UTF-16 units + terminator.
        assert_eq!(buf.len(), HEADER_SIZE + 12);
        assert_eq!(read_u16_at(&buf, NAME_LENGTH_OFFSET), 10);
        assert_eq!(read_u16_at(&buf, NAME_MAX_LENGTH_OFFSET), 12);

        let expected: Vec<u8> = "host1\0"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        assert_eq!(&buf[HEADER_SIZE..], &expected[..]);
    }

    #[test]
    fn purge_request_name_pointer_targets_trailing_bytes() {
        let buf = encode_purge_request(0, Some("example.test")).unwrap();
        let trailing_addr = read_ptr_at(&buf, NAME_BUFFER_OFFSET);
        assert_eq!(trailing_addr, buf.as_ptr() as usize + HEADER_SIZE);
    }

    #[test]
    fn purge_request_rejects_oversized_name() {
        let name = "x".repeat(40_000);
        let err = encode_purge_request(0, Some(&name)).unwrap_err();
        assert!(matches!(err, WireError::NameTooLong(_)));
    }

    #[test]
    fn cache_info_decodes_counters() {
        let mut bytes = Vec::new();
        for value in [100u32, 40, 30, 0, 0, 0, 0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let info = decode_cache_info(&bytes).unwrap();
        assert_eq!(info.cache_size, 100);
        assert_eq!(info.entries, 40);
        assert_eq!(info.active_entries, 30);
        assert_eq!(info.zombies, 0);
    }

    #[test]
    fn cache_info_rejects_short_buffer() {
        let err = decode_cache_info(&[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            WireError::Truncated {
                expected: CACHE_INFO_RESPONSE_SIZE,
                actual: 8,
            }
        ));
    }

    #[test]
    fn perfmon_request_is_tag_and_flags() {
        let buf = encode_perfmon_request();
        assert_eq!(buf.len(), PERFMON_REQUEST_SIZE);
        assert_eq!(read_u32(&buf, 0), SSL_PERFMON_INFO_MESSAGE);
        assert_eq!(read_u32(&buf, 4), 0);
    }

    #[test]
    fn perfmon_decodes_counters() {
        let mut bytes = Vec::new();
        for value in [10u32, 20, 5, 8, 100, 200, 3, 4] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let info = decode_perf_info(&bytes).unwrap();
        assert_eq!(info.client_cache_entries, 10);
        assert_eq!(info.server_cache_entries, 20);
        assert_eq!(info.server_reconnects_per_second, 4);
    }
}
