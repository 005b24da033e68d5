//! Wire-order request constructors.
//!
//! Each builder lays the opcode's parameter words into the sixteen-byte
//! region of the request header and attaches the variable body, producing a
//! frame that is already in network byte order. The stream id is stamped
//! later by the submission helper.

use crate::{
    byte_order::{write_network_u16, write_network_u32, write_network_u64},
    message::Message,
    protocol::{OPTION_REFRESH, ReadAheadList, RequestCode},
};

/// Build a `kXR_stat` request for `path`.
#[must_use]
pub fn stat(path: &str) -> Message {
    Message::request(RequestCode::Stat, [0u8; 16], path.as_bytes())
}

/// Build a `kXR_open` request for `path` with the given mode and option
/// words.
#[must_use]
pub fn open(path: &str, mode: u16, options: u16) -> Message {
    let mut params = [0u8; 16];
    params[0..2].copy_from_slice(&write_network_u16(mode));
    params[2..4].copy_from_slice(&write_network_u16(options));
    Message::request(RequestCode::Open, params, path.as_bytes())
}

/// Build a `kXR_read` request against an open file handle.
#[must_use]
pub fn read(handle: [u8; 4], offset: u64, len: u32) -> Message {
    let mut params = [0u8; 16];
    params[0..4].copy_from_slice(&handle);
    params[4..12].copy_from_slice(&write_network_u64(offset));
    params[12..16].copy_from_slice(&write_network_u32(len));
    Message::request(RequestCode::Read, params, &[])
}

/// Build a `kXR_readv` request; the body is the `readahead_list` array.
#[must_use]
pub fn readv(handle: [u8; 4], chunks: &[(u64, u32)]) -> Message {
    let mut body = Vec::with_capacity(chunks.len() * ReadAheadList::LEN);
    for &(offset, rlen) in chunks {
        let entry = ReadAheadList {
            handle,
            rlen,
            offset,
        };
        body.extend_from_slice(&entry.encode());
    }
    Message::request(RequestCode::ReadV, [0u8; 16], &body)
}

/// Build a `kXR_write` header for a raw-streamed payload of `len` bytes.
///
/// The data itself is not attached; the handler supplies it to the
/// transport through the raw-writer contract.
#[must_use]
pub fn write_raw(handle: [u8; 4], offset: u64, len: u32) -> Message {
    let mut params = [0u8; 16];
    params[0..4].copy_from_slice(&handle);
    params[4..12].copy_from_slice(&write_network_u64(offset));
    let mut msg = Message::request(RequestCode::Write, params, &[]);
    // dlen announces the streamed payload even though the buffer holds none.
    let header_len = msg.len();
    debug_assert_eq!(header_len, crate::protocol::REQUEST_HEADER_LEN);
    msg.set_raw_payload_len(len);
    msg
}

/// Build a `kXR_dirlist` request for `path`.
#[must_use]
pub fn dirlist(path: &str) -> Message {
    Message::request(RequestCode::Dirlist, [0u8; 16], path.as_bytes())
}

/// Build a `kXR_locate` request for `path`.
#[must_use]
pub fn locate(path: &str, options: u16) -> Message {
    let mut params = [0u8; 16];
    params[0..2].copy_from_slice(&write_network_u16(options));
    Message::request(RequestCode::Locate, params, path.as_bytes())
}

/// Build a `kXR_query` request.
#[must_use]
pub fn query(code: u16, args: &str) -> Message {
    let mut params = [0u8; 16];
    params[0..2].copy_from_slice(&write_network_u16(code));
    Message::request(RequestCode::Query, params, args.as_bytes())
}

/// Build a `kXR_mv` request; the body carries both space-separated paths.
#[must_use]
pub fn mv(source: &str, destination: &str) -> Message {
    let body = format!("{source} {destination}");
    Message::request(RequestCode::Mv, [0u8; 16], body.as_bytes())
}

/// Build a `kXR_rm` request for `path`.
#[must_use]
pub fn rm(path: &str) -> Message { Message::request(RequestCode::Rm, [0u8; 16], path.as_bytes()) }

/// Build a `kXR_rmdir` request for `path`.
#[must_use]
pub fn rmdir(path: &str) -> Message {
    Message::request(RequestCode::Rmdir, [0u8; 16], path.as_bytes())
}

/// Build a `kXR_mkdir` request for `path`.
#[must_use]
pub fn mkdir(path: &str, mode: u16) -> Message {
    let mut params = [0u8; 16];
    params[14..16].copy_from_slice(&write_network_u16(mode));
    Message::request(RequestCode::Mkdir, params, path.as_bytes())
}

/// Build a `kXR_chmod` request for `path`.
#[must_use]
pub fn chmod(path: &str, mode: u16) -> Message {
    let mut params = [0u8; 16];
    params[14..16].copy_from_slice(&write_network_u16(mode));
    Message::request(RequestCode::Chmod, params, path.as_bytes())
}

/// Build a `kXR_truncate` request for `path`.
#[must_use]
pub fn truncate(path: &str, size: u64) -> Message {
    let mut params = [0u8; 16];
    params[4..12].copy_from_slice(&write_network_u64(size));
    Message::request(RequestCode::Truncate, params, path.as_bytes())
}

/// `kXR_fattr` subcommand selectors.
pub mod fattr_subcode {
    /// Delete the named attributes.
    pub const DEL: u8 = 0;
    /// Fetch the named attributes.
    pub const GET: u8 = 1;
    /// List all attribute names.
    pub const LIST: u8 = 2;
    /// Set the supplied attributes.
    pub const SET: u8 = 3;
}

/// Build a `kXR_fattr` request around an already-encoded attribute vector.
#[must_use]
pub fn fattr(handle: [u8; 4], subcode: u8, numattr: u8, body: &[u8]) -> Message {
    let mut params = [0u8; 16];
    params[0..4].copy_from_slice(&handle);
    params[4] = subcode;
    params[5] = numattr;
    Message::request(RequestCode::Fattr, params, body)
}

/// Number of attributes announced in a `kXR_fattr` request header.
#[must_use]
pub fn fattr_numattr(msg: &Message) -> u8 { msg.params().get(5).copied().unwrap_or(0) }

/// Switch on the refresh option for requests that support it.
///
/// Reissued `open` and `locate` requests set the refresh bit so the retry
/// is not served from a stale location cache.
pub fn switch_on_refresh(msg: &mut Message) {
    let range = match msg.request_code() {
        Some(RequestCode::Open) => 2..4,
        Some(RequestCode::Locate) => 0..2,
        _ => return,
    };
    let params = msg.params_mut();
    if params.len() < range.end {
        return;
    }
    let current = crate::byte_order::read_network_u16([params[range.start], params[range.start + 1]]);
    let updated = write_network_u16(current | OPTION_REFRESH);
    params[range.start..range.end].copy_from_slice(&updated);
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{byte_order::read_network_u16, protocol::REQUEST_HEADER_LEN};

    #[test]
    fn read_requests_lay_out_handle_offset_and_length() {
        let msg = read([9, 9, 9, 9], 0x0102_0304, 4096);
        let params = msg.params();
        assert_eq!(&params[0..4], &[9, 9, 9, 9]);
        assert_eq!(&params[4..12], &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(&params[12..16], &[0, 0, 0x10, 0]);
        assert_eq!(msg.request_dlen(), 0);
    }

    #[test]
    fn readv_bodies_are_chunk_header_arrays() {
        let msg = readv([1, 2, 3, 4], &[(0, 100), (100, 100)]);
        assert_eq!(msg.request_dlen() as usize, 2 * ReadAheadList::LEN);
        let body = msg.request_body();
        let first = ReadAheadList::decode(body[0..16].try_into().expect("16-byte header"));
        assert_eq!(first.rlen, 100);
        assert_eq!(first.offset, 0);
        let second = ReadAheadList::decode(body[16..32].try_into().expect("16-byte header"));
        assert_eq!(second.offset, 100);
    }

    #[test]
    fn raw_write_headers_announce_the_payload() {
        let msg = write_raw([1, 1, 1, 1], 512, 9000);
        assert_eq!(msg.len(), REQUEST_HEADER_LEN);
        assert_eq!(msg.request_dlen(), 9000);
    }

    #[rstest]
    #[case(open("/f", 0, 0), 2)]
    #[case(locate("/f", 0), 0)]
    fn refresh_bit_lands_in_the_option_word(#[case] mut msg: Message, #[case] at: usize) {
        switch_on_refresh(&mut msg);
        let params = msg.params();
        let word = read_network_u16([params[at], params[at + 1]]);
        assert_eq!(word & OPTION_REFRESH, OPTION_REFRESH);
    }

    #[test]
    fn refresh_is_a_no_op_for_other_opcodes() {
        let mut msg = stat("/f");
        let before = msg.clone();
        switch_on_refresh(&mut msg);
        assert_eq!(msg, before);
    }
}
