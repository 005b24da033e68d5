//! Owned wire frames and their typed header views.
//!
//! A [`Message`] is a growable owned byte buffer holding a marshalled frame
//! in wire order. The same type carries outbound requests (24-byte header
//! plus body) and inbound responses (8-byte header plus body); the accessor
//! families below expose the respective header fields without copying.
//! Frames are built in network byte order from the start, so there is no
//! separate marshalling pass.

use bytes::{BufMut, BytesMut};

use crate::{
    byte_order::{read_network_u16, read_network_u32, write_network_u16, write_network_u32},
    protocol::{
        REQUEST_BODY_OFFSET,
        REQUEST_DLEN_OFFSET,
        REQUEST_HEADER_LEN,
        REQUEST_PARAMS_OFFSET,
        RESPONSE_HEADER_LEN,
        RequestCode,
        ResponseStatus,
    },
};

/// An owned, marshalled protocol frame.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    buf: BytesMut,
}

impl Message {
    /// Wrap an existing wire-order buffer.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<BytesMut>) -> Self { Self { buf: bytes.into() } }

    /// Build a request frame from its opcode, parameter words and body.
    #[must_use]
    pub fn request(code: RequestCode, params: [u8; 16], body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + body.len());
        buf.put_slice(&[0, 0]);
        buf.put_slice(&write_network_u16(code.wire()));
        buf.put_slice(&params);
        buf.put_slice(&write_network_u32(u32::try_from(body.len()).unwrap_or(0)));
        buf.put_slice(body);
        Self { buf }
    }

    /// Total frame length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// The raw frame bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    fn read_u16_at(&self, offset: usize) -> u16 {
        if self.buf.len() < offset + 2 {
            return 0;
        }
        read_network_u16([self.buf[offset], self.buf[offset + 1]])
    }

    fn read_u32_at(&self, offset: usize) -> u32 {
        if self.buf.len() < offset + 4 {
            return 0;
        }
        read_network_u32([
            self.buf[offset],
            self.buf[offset + 1],
            self.buf[offset + 2],
            self.buf[offset + 3],
        ])
    }

    /// Stream identifier, common to both frame directions.
    #[must_use]
    pub fn stream_id(&self) -> u16 { self.read_u16_at(0) }

    /// Stamp the stream identifier.
    pub fn set_stream_id(&mut self, sid: u16) {
        if self.buf.len() >= 2 {
            self.buf[0..2].copy_from_slice(&write_network_u16(sid));
        }
    }

    /// Raw `requestid` header field.
    #[must_use]
    pub fn request_id_raw(&self) -> u16 { self.read_u16_at(2) }

    /// Decoded request opcode, when recognised.
    #[must_use]
    pub fn request_code(&self) -> Option<RequestCode> {
        RequestCode::from_wire(self.request_id_raw())
    }

    /// Opcode-specific parameter words of a request header.
    #[must_use]
    pub fn params(&self) -> &[u8] {
        if self.buf.len() < REQUEST_DLEN_OFFSET {
            return &[];
        }
        &self.buf[REQUEST_PARAMS_OFFSET..REQUEST_DLEN_OFFSET]
    }

    /// Mutable access to the parameter words of a request header.
    pub fn params_mut(&mut self) -> &mut [u8] {
        if self.buf.len() < REQUEST_DLEN_OFFSET {
            return &mut [];
        }
        &mut self.buf[REQUEST_PARAMS_OFFSET..REQUEST_DLEN_OFFSET]
    }

    /// `dlen` of a request header.
    #[must_use]
    pub fn request_dlen(&self) -> u32 { self.read_u32_at(REQUEST_DLEN_OFFSET) }

    /// Request body (path plus CGI for the path-bearing opcodes).
    #[must_use]
    pub fn request_body(&self) -> &[u8] {
        if self.buf.len() < REQUEST_BODY_OFFSET {
            return &[];
        }
        &self.buf[REQUEST_BODY_OFFSET..]
    }

    /// Replace the request body, updating `dlen`.
    pub fn set_request_body(&mut self, body: &[u8]) {
        if self.buf.len() < REQUEST_HEADER_LEN {
            return;
        }
        self.buf.truncate(REQUEST_HEADER_LEN);
        self.buf.put_slice(body);
        let dlen = write_network_u32(u32::try_from(body.len()).unwrap_or(0));
        self.buf[REQUEST_DLEN_OFFSET..REQUEST_HEADER_LEN].copy_from_slice(&dlen);
    }

    /// Announce a raw-streamed payload length in the request `dlen` without
    /// attaching body bytes.
    pub(crate) fn set_raw_payload_len(&mut self, len: u32) {
        if self.buf.len() >= REQUEST_HEADER_LEN {
            let wire = write_network_u32(len);
            self.buf[REQUEST_DLEN_OFFSET..REQUEST_HEADER_LEN].copy_from_slice(&wire);
        }
    }

    /// Raw status word of a response header.
    #[must_use]
    pub fn response_status_raw(&self) -> u16 { self.read_u16_at(2) }

    /// Decoded response status, when recognised.
    #[must_use]
    pub fn response_status(&self) -> Option<ResponseStatus> {
        ResponseStatus::from_wire(self.response_status_raw())
    }

    /// `dlen` of a response header.
    #[must_use]
    pub fn response_dlen(&self) -> u32 { self.read_u32_at(4) }

    /// Response body bytes attached so far.
    #[must_use]
    pub fn response_body(&self) -> &[u8] {
        if self.buf.len() < RESPONSE_HEADER_LEN {
            return &[];
        }
        &self.buf[RESPONSE_HEADER_LEN..]
    }

    /// Append streamed body bytes to a response frame.
    pub fn append_response_body(&mut self, bytes: &[u8]) { self.buf.put_slice(bytes); }

    /// Whether all `dlen` bytes of the response body are attached.
    #[must_use]
    pub fn response_body_complete(&self) -> bool {
        self.response_body().len() >= self.response_dlen() as usize
    }

    /// Human-readable request description for log lines.
    #[must_use]
    pub fn description(&self) -> String {
        let Some(code) = self.request_code() else {
            return format!("request #{}", self.request_id_raw());
        };
        let body = self.request_body();
        if code.is_path_bearing() && !body.is_empty() {
            let path = String::from_utf8_lossy(body);
            format!("{} (path: {})", code.name(), path)
        } else {
            code.name().to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frames_carry_wire_order_headers() {
        let msg = Message::request(RequestCode::Stat, [0u8; 16], b"/a/b");
        assert_eq!(msg.len(), REQUEST_HEADER_LEN + 4);
        assert_eq!(msg.request_code(), Some(RequestCode::Stat));
        assert_eq!(msg.request_dlen(), 4);
        assert_eq!(msg.request_body(), b"/a/b");
        // requestid is big-endian on the wire: 3017 == 0x0BC9.
        assert_eq!(&msg.as_slice()[2..4], &[0x0B, 0xC9]);
    }

    #[test]
    fn stream_id_stamps_in_place() {
        let mut msg = Message::request(RequestCode::Open, [0u8; 16], b"/x");
        msg.set_stream_id(0x0102);
        assert_eq!(msg.stream_id(), 0x0102);
        assert_eq!(&msg.as_slice()[0..2], &[0x01, 0x02]);
    }

    #[test]
    fn body_replacement_recomputes_dlen() {
        let mut msg = Message::request(RequestCode::Stat, [0u8; 16], b"/short");
        msg.set_request_body(b"/a/much/longer/path?tried=host1");
        assert_eq!(msg.request_dlen() as usize, msg.request_body().len());
        assert_eq!(msg.request_body(), b"/a/much/longer/path?tried=host1");
    }

    #[test]
    fn response_views_read_the_eight_byte_header() {
        // streamid=5, status=kXR_oksofar, dlen=3, body "abc".
        let mut raw = vec![0, 5, 0x0F, 0xA0, 0, 0, 0, 3];
        raw.extend_from_slice(b"abc");
        let msg = Message::from_bytes(&raw[..]);
        assert_eq!(msg.stream_id(), 5);
        assert_eq!(msg.response_status(), Some(ResponseStatus::OkSoFar));
        assert_eq!(msg.response_dlen(), 3);
        assert_eq!(msg.response_body(), b"abc");
        assert!(msg.response_body_complete());
    }

    #[test]
    fn partial_response_bodies_report_incomplete() {
        let raw = [0u8, 1, 0, 0, 0, 0, 0, 10];
        let mut msg = Message::from_bytes(&raw[..]);
        assert!(!msg.response_body_complete());
        msg.append_response_body(&[0u8; 10]);
        assert!(msg.response_body_complete());
    }
}
