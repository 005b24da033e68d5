//! Resumable raw-body readers.
//!
//! Sockets return partial reads, so each reader is an explicit progress
//! record on the handler rather than a blocking call: the transport
//! re-enters [`Inner::read_raw`] whenever more bytes are available, and the
//! record preserves every intermediate cursor across entries.
//!
//! Three readers exist, selected by the request opcode and response status:
//! single `kXR_read` payloads stream straight into the bound chunk buffer,
//! `kXR_readv` payloads run a two-phase chunk-header/chunk-data machine,
//! and everything else lands in the frame itself for later parsing.

use std::io;

use crate::{
    error::{Error, Result},
    message::Message,
    protocol::{ReadAheadList, RequestCode, ResponseStatus},
    transport::{RawProgress, RawSource},
};

use super::Inner;

const DISCARD_BUF_LEN: usize = 4096;

/// Which reader is driving the current frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum RawReader {
    Read,
    ReadV,
    Other,
}

/// Per-frame progress record for a raw body read.
#[derive(Debug)]
pub(super) struct RawState {
    reader: RawReader,
    /// Payload bytes of the current frame not yet consumed.
    frame_remaining: u32,
    header_buf: [u8; ReadAheadList::LEN],
    header_have: usize,
    header_done: bool,
    /// Bytes of the current chunk's data still expected.
    chunk_remaining: u32,
    /// The current chunk mismatched; its payload drains into the discard
    /// sink to keep the stream framed.
    discard: bool,
}

impl RawState {
    pub(super) fn for_frame(code: Option<RequestCode>, status: ResponseStatus, msg: &Message) -> Self {
        let reader = match (code, status) {
            (Some(RequestCode::Read), ResponseStatus::Ok | ResponseStatus::OkSoFar) => {
                RawReader::Read
            }
            (Some(RequestCode::ReadV), ResponseStatus::Ok | ResponseStatus::OkSoFar) => {
                RawReader::ReadV
            }
            _ => RawReader::Other,
        };
        let attached = u32::try_from(msg.response_body().len()).unwrap_or(0);
        Self {
            reader,
            frame_remaining: msg.response_dlen().saturating_sub(attached),
            header_buf: [0; ReadAheadList::LEN],
            header_have: 0,
            header_done: false,
            chunk_remaining: 0,
            discard: false,
        }
    }

}

impl Inner {
    /// Drive the active raw reader against `src`.
    ///
    /// Returns `Retry` with the byte count when the socket would block; the
    /// progress record stays on the handler for the next entry. On `Done`
    /// the record is cleared and the frame is ready for re-examination.
    pub(super) fn read_raw(
        &mut self,
        msg: &mut Message,
        src: &mut dyn RawSource,
    ) -> Result<(RawProgress, u32)> {
        let Some(mut state) = self.raw.take() else {
            return Err(Error::Protocol("no raw body read in progress".into()));
        };
        let result = match state.reader {
            RawReader::Other => self.read_raw_other(&mut state, msg, src),
            RawReader::Read => self.read_raw_read(&mut state, src),
            RawReader::ReadV => self.read_raw_readv(&mut state, src),
        };
        match result {
            Ok((RawProgress::Done, bytes)) => {
                self.raw_frame_done = true;
                Ok((RawProgress::Done, bytes))
            }
            Ok((RawProgress::Retry, bytes)) => {
                self.raw = Some(state);
                Ok((RawProgress::Retry, bytes))
            }
            Err(err) => Err(err),
        }
    }

    /// Read the remaining payload into the frame itself.
    fn read_raw_other(
        &mut self,
        state: &mut RawState,
        msg: &mut Message,
        src: &mut dyn RawSource,
    ) -> Result<(RawProgress, u32)> {
        let mut bytes = 0u32;
        let mut scratch = [0u8; DISCARD_BUF_LEN];
        while state.frame_remaining > 0 {
            let want = (state.frame_remaining as usize).min(scratch.len());
            match src.read(&mut scratch[..want]) {
                Ok(0) => return Err(closed()),
                Ok(n) => {
                    msg.append_response_body(&scratch[..n]);
                    state.frame_remaining -= u32::try_from(n).unwrap_or(0);
                    bytes += u32::try_from(n).unwrap_or(0);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((RawProgress::Retry, bytes));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok((RawProgress::Done, bytes))
    }

    /// Stream a single-read payload into the bound chunk buffer.
    fn read_raw_read(
        &mut self,
        state: &mut RawState,
        src: &mut dyn RawSource,
    ) -> Result<(RawProgress, u32)> {
        let mut fill = self.read_fill as usize;
        let mut bytes = 0u32;
        let mut progress = RawProgress::Done;
        {
            let chunk = self
                .chunks
                .as_mut()
                .and_then(|chunks| chunks.first_mut())
                .ok_or_else(|| Error::Protocol("read response without a bound chunk".into()))?;
            if fill + state.frame_remaining as usize > chunk.buf.len() {
                return Err(Error::Protocol(format!(
                    "read response overflows the destination buffer: {} > {}",
                    fill + state.frame_remaining as usize,
                    chunk.buf.len()
                )));
            }
            while state.frame_remaining > 0 {
                let end = fill + state.frame_remaining as usize;
                match src.read(&mut chunk.buf[fill..end]) {
                    Ok(0) => return Err(closed()),
                    Ok(n) => {
                        fill += n;
                        state.frame_remaining -= u32::try_from(n).unwrap_or(0);
                        bytes += u32::try_from(n).unwrap_or(0);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        progress = RawProgress::Retry;
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        self.read_fill = u32::try_from(fill).unwrap_or(u32::MAX);
        if progress == RawProgress::Done {
            if let Some(status) = self.chunk_status.first_mut() {
                status.done = true;
            }
        }
        Ok((progress, bytes))
    }

    /// Drive the two-phase vectored-read machine.
    fn read_raw_readv(
        &mut self,
        state: &mut RawState,
        src: &mut dyn RawSource,
    ) -> Result<(RawProgress, u32)> {
        let mut bytes = 0u32;
        loop {
            // A chunk completes the moment its payload drains, including at
            // the very end of the frame.
            if state.header_done && state.chunk_remaining == 0 {
                if !state.discard {
                    if let Some(status) = self.chunk_status.get_mut(self.readv_index) {
                        status.done = true;
                    }
                }
                self.readv_index += 1;
                state.header_done = false;
                state.header_have = 0;
                state.discard = false;
                continue;
            }

            if state.frame_remaining == 0 {
                if state.header_done && state.chunk_remaining > 0 {
                    return Err(Error::Protocol("readv chunk split across frames".into()));
                }
                if !state.header_done && state.header_have > 0 {
                    return Err(Error::Protocol(
                        "readv chunk header split across frames".into(),
                    ));
                }
                return Ok((RawProgress::Done, bytes));
            }

            if state.header_done {
                let consumed = self.read_chunk_data(state, src)?;
                match consumed {
                    Some(n) => bytes += n,
                    None => return Ok((RawProgress::Retry, bytes)),
                }
            } else {
                let want = (ReadAheadList::LEN - state.header_have)
                    .min(state.frame_remaining as usize);
                let start = state.header_have;
                match src.read(&mut state.header_buf[start..start + want]) {
                    Ok(0) => return Err(closed()),
                    Ok(n) => {
                        state.header_have += n;
                        state.frame_remaining -= u32::try_from(n).unwrap_or(0);
                        bytes += u32::try_from(n).unwrap_or(0);
                        if state.header_have == ReadAheadList::LEN {
                            self.begin_chunk(state)?;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Ok((RawProgress::Retry, bytes));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    /// Validate a freshly decoded chunk header against the bound chunk
    /// list.
    fn begin_chunk(&mut self, state: &mut RawState) -> Result<()> {
        let header = ReadAheadList::decode(&state.header_buf);
        let expected = self
            .chunks
            .as_ref()
            .and_then(|chunks| chunks.get(self.readv_index));
        let Some(expected) = expected else {
            return Err(Error::Protocol(format!(
                "readv response carries more chunks than requested (index {})",
                self.readv_index
            )));
        };
        if expected.offset != header.offset || expected.len != header.rlen {
            if let Some(status) = self.chunk_status.get_mut(self.readv_index) {
                status.size_error = true;
            }
            state.discard = true;
        } else {
            state.discard = false;
        }
        state.chunk_remaining = header.rlen;
        state.header_done = true;
        Ok(())
    }

    /// Move one socket read's worth of chunk data; `None` means the socket
    /// would block.
    fn read_chunk_data(
        &mut self,
        state: &mut RawState,
        src: &mut dyn RawSource,
    ) -> Result<Option<u32>> {
        let cap = state.chunk_remaining.min(state.frame_remaining) as usize;
        let read = if state.discard {
            let mut sink = [0u8; DISCARD_BUF_LEN];
            let want = cap.min(sink.len());
            src.read(&mut sink[..want])
        } else {
            let chunk = self
                .chunks
                .as_mut()
                .and_then(|chunks| chunks.get_mut(self.readv_index))
                .ok_or_else(|| Error::Protocol("readv chunk index out of range".into()))?;
            let start = chunk.buf.len() - state.chunk_remaining as usize;
            let end = start + cap.min(state.chunk_remaining as usize);
            src.read(&mut chunk.buf[start..end])
        };
        match read {
            Ok(0) => Err(closed()),
            Ok(n) => {
                state.chunk_remaining -= u32::try_from(n).unwrap_or(0);
                state.frame_remaining -= u32::try_from(n).unwrap_or(0);
                Ok(Some(u32::try_from(n).unwrap_or(0)))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn closed() -> Error { Error::Socket("connection closed during raw body read".into()) }
