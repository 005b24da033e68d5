//! Shared scenario harness: a scripted transport and frame builders.
//!
//! `MockTransport` plays the server side of a request lifecycle. Each
//! accepted send pops the next script entry for the target host and
//! delivers its frames through the real handler contract: examine, raw
//! body streaming, process. Stream events and send failures are scripted
//! the same way.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use xrootd_client::{
    Error,
    Message,
    MsgHandler,
    RawProgress,
    Result,
    StreamEvent,
    Transport,
    Url,
    byte_order::{write_network_u16, write_network_u32},
    protocol::{ReadAheadList, ResponseStatus},
    sid::SidManager,
};

/// Server behaviour for one accepted send.
pub enum ServerScript {
    /// Accept the send and deliver these frames in order.
    Frames(Vec<Vec<u8>>),
    /// Refuse the send with this error.
    FailSend(Error),
    /// Accept the send and deliver nothing.
    Quiet,
    /// Accept the send, then report a broken stream.
    Disconnect,
}

/// One accepted send, recorded for assertions.
#[derive(Clone)]
pub struct SendRecord {
    pub host: String,
    pub sid: u16,
    pub params: Vec<u8>,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    managers: HashMap<String, Arc<SidManager>>,
    scripts: HashMap<String, VecDeque<ServerScript>>,
    sends: Vec<SendRecord>,
    handlers: Vec<Arc<MsgHandler>>,
    adopted: Vec<Message>,
}

/// Scripted transport standing in for the connection pool.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Queue the behaviour for the next send towards `host` (a `host:port`
    /// id).
    pub fn script(&self, host: &str, entry: ServerScript) {
        self.lock()
            .scripts
            .entry(host.to_owned())
            .or_default()
            .push_back(entry);
    }

    /// Snapshot of the accepted sends.
    pub fn sends(&self) -> Vec<SendRecord> { self.lock().sends.clone() }

    /// The most recent handler the transport saw.
    pub fn handler(&self) -> Arc<MsgHandler> {
        self.lock()
            .handlers
            .last()
            .cloned()
            .expect("no handler was submitted")
    }

    /// Request buffers adopted for stateful sessions.
    pub fn adopted_count(&self) -> usize { self.lock().adopted.len() }

    /// The stream-id manager for `host`, creating it on first use.
    pub fn manager(&self, host: &str) -> Arc<SidManager> {
        self.lock()
            .managers
            .entry(host.to_owned())
            .or_insert_with(SidManager::new)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn accept(&self, url: &Url, msg: &Message, handler: &Arc<MsgHandler>) -> Option<ServerScript> {
        let mut state = self.lock();
        state.sends.push(SendRecord {
            host: url.host_id(),
            sid: msg.stream_id(),
            params: msg.params().to_vec(),
            body: msg.request_body().to_vec(),
        });
        state.handlers.push(Arc::clone(handler));
        state
            .scripts
            .get_mut(&url.host_id())
            .and_then(VecDeque::pop_front)
    }

    fn deliver(handler: &Arc<MsgHandler>, sid: u16, frames: Vec<Vec<u8>>) {
        for frame in frames {
            let mut header = frame[..8].to_vec();
            header[0..2].copy_from_slice(&write_network_u16(sid));
            let mut msg = Message::from_bytes(&header[..]);
            let mut body: &[u8] = &frame[8..];
            loop {
                match handler.examine(&msg) {
                    xrootd_client::ExamineAction::Ignore => break,
                    xrootd_client::ExamineAction::Raw => {
                        match handler.read_message_body(&mut msg, &mut body) {
                            Ok((RawProgress::Done, _)) => {}
                            Ok((RawProgress::Retry, _)) => {
                                panic!("raw reader asked to retry against a ready source")
                            }
                            Err(err) => {
                                handler.on_stream_event(StreamEvent::FatalError, err);
                                return;
                            }
                        }
                    }
                    xrootd_client::ExamineAction::Take => {
                        handler.process(msg);
                        break;
                    }
                    xrootd_client::ExamineAction::TakeAndRemove => {
                        handler.process(msg);
                        return;
                    }
                }
            }
        }
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        url: &Url,
        msg: &Message,
        handler: &Arc<MsgHandler>,
        _stateful: bool,
        _expires: u64,
    ) -> Result<()> {
        match self.accept(url, msg, handler) {
            Some(ServerScript::FailSend(err)) => Err(err),
            Some(ServerScript::Frames(frames)) => {
                handler.on_status_ready(msg, Ok(()));
                Self::deliver(handler, msg.stream_id(), frames);
                Ok(())
            }
            Some(ServerScript::Disconnect) => {
                handler.on_status_ready(msg, Ok(()));
                handler.on_stream_event(
                    StreamEvent::Broken,
                    Error::Socket("connection reset by peer".into()),
                );
                Ok(())
            }
            Some(ServerScript::Quiet) | None => {
                handler.on_status_ready(msg, Ok(()));
                Ok(())
            }
        }
    }

    fn redirect(&self, url: &Url, msg: &Message, handler: &Arc<MsgHandler>) -> Result<()> {
        // Dispatch through the virtual redirector: hand the handler a
        // synthetic full-URL redirect pointing back at the metalink.
        {
            let mut state = self.lock();
            state.sends.push(SendRecord {
                host: url.host_id(),
                sid: msg.stream_id(),
                params: msg.params().to_vec(),
                body: msg.request_body().to_vec(),
            });
            state.handlers.push(Arc::clone(handler));
        }
        handler.process(Message::from_bytes(&redirect_frame_url(0, &url.to_string())[..]));
        Ok(())
    }

    fn sid_manager(&self, url: &Url) -> Result<Arc<SidManager>> { Ok(self.manager(&url.host_id())) }

    fn adopt_request(&self, msg: Message) { self.lock().adopted.push(msg); }
}

/// Build a full response frame: 8-byte header plus body.
pub fn frame(sid: u16, status: ResponseStatus, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&write_network_u16(sid));
    out.extend_from_slice(&write_network_u16(status.wire()));
    out.extend_from_slice(&write_network_u32(
        u32::try_from(body.len()).expect("test body fits"),
    ));
    out.extend_from_slice(body);
    out
}

pub fn ok_frame(body: &[u8]) -> Vec<u8> { frame(0, ResponseStatus::Ok, body) }

pub fn oksofar_frame(body: &[u8]) -> Vec<u8> { frame(0, ResponseStatus::OkSoFar, body) }

pub fn wait_frame(seconds: u32) -> Vec<u8> {
    frame(0, ResponseStatus::Wait, &write_network_u32(seconds))
}

pub fn error_frame(code: u32, text: &str) -> Vec<u8> {
    let mut body = write_network_u32(code).to_vec();
    body.extend_from_slice(text.as_bytes());
    frame(0, ResponseStatus::Error, &body)
}

pub fn redirect_frame(port: u32, host_spec: &str) -> Vec<u8> {
    let mut body = write_network_u32(port).to_vec();
    body.extend_from_slice(host_spec.as_bytes());
    frame(0, ResponseStatus::Redirect, &body)
}

/// Redirect frame carrying a complete URL (the port -1 form).
pub fn redirect_frame_url(sid: u16, url: &str) -> Vec<u8> {
    let mut body = write_network_u32(u32::MAX).to_vec();
    body.extend_from_slice(url.as_bytes());
    frame(sid, ResponseStatus::Redirect, &body)
}

/// Build a readv response body from `(offset, data)` pairs; each chunk
/// header announces its data's length.
pub fn readv_body(handle: [u8; 4], chunks: &[(u64, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (offset, data) in chunks {
        let header = ReadAheadList {
            handle,
            rlen: u32::try_from(data.len()).expect("test chunk fits"),
            offset: *offset,
        };
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(data);
    }
    out
}

/// Byte source that serves fixed-size slices with `WouldBlock` between
/// them, then keeps blocking once drained.
pub struct StutterSource {
    data: Vec<u8>,
    pos: usize,
    slice: usize,
    ready: bool,
}

impl StutterSource {
    pub fn new(data: Vec<u8>, slice: usize) -> Self {
        Self {
            data,
            pos: 0,
            slice,
            ready: true,
        }
    }

    pub fn drained(&self) -> bool { self.pos == self.data.len() }
}

impl xrootd_client::RawSource for StutterSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.ready {
            self.ready = true;
            return Err(std::io::ErrorKind::WouldBlock.into());
        }
        if self.pos == self.data.len() {
            return Err(std::io::ErrorKind::WouldBlock.into());
        }
        let take = self.slice.min(buf.len()).min(self.data.len() - self.pos);
        buf[..take].copy_from_slice(&self.data[self.pos..self.pos + take]);
        self.pos += take;
        self.ready = false;
        Ok(take)
    }
}

/// Byte sink that accepts fixed-size slices with `WouldBlock` between
/// them.
pub struct StutterSink {
    pub written: Vec<u8>,
    slice: usize,
    ready: bool,
}

impl StutterSink {
    pub fn new(slice: usize) -> Self {
        Self {
            written: Vec::new(),
            slice,
            ready: true,
        }
    }
}

impl xrootd_client::RawSink for StutterSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.ready {
            self.ready = true;
            return Err(std::io::ErrorKind::WouldBlock.into());
        }
        let take = self.slice.min(buf.len());
        self.written.extend_from_slice(&buf[..take]);
        self.ready = false;
        Ok(take)
    }
}
