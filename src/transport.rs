//! Contracts between the message handler and its transport.
//!
//! The transport (post-master) owns sockets and multiplexes frames onto
//! handlers keyed by stream id. It drives a handler through four inbound
//! callbacks (frame examined/processed, raw body readable, stream event,
//! send-status ready) and accepts outbound work through [`Transport`].
//! Callbacks for one handler are serialised: the handler observes at most
//! one of them at a time.
//!
//! Binding rules: a handler is bound to a stream when [`Transport::send`]
//! or [`Transport::redirect`] accepts it, keyed by the stream id stamped on
//! the request. [`ExamineAction::TakeAndRemove`] drops the binding; a
//! resubmission after a redirect or retry re-binds the handler under its
//! freshly allocated stream id.

use std::{io, sync::Arc};

use crate::{
    error::Result,
    handler::MsgHandler,
    message::Message,
    response::ResponseBody,
    sid::SidManager,
    url::Url,
};

/// Classification of an inbound frame by [`MsgHandler::examine`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExamineAction {
    /// The frame is not for this handler; leave it alone.
    Ignore,
    /// Consume the frame via [`MsgHandler::process`]; keep the binding.
    Take,
    /// Consume the frame and drop the binding; this is the user-terminal
    /// frame and fires exactly once per handler.
    TakeAndRemove,
    /// The frame body is still on the socket; stream it through
    /// [`MsgHandler::read_message_body`], then examine again.
    Raw,
}

/// Progress of a resumable raw-body read or write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawProgress {
    /// The body has been fully consumed or produced.
    Done,
    /// The socket would block; re-enter when it is ready again.
    Retry,
}

/// Transport-level events delivered outside the frame flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamEvent {
    /// The connection dropped.
    Broken,
    /// The transport timed the stream out.
    Timeout,
    /// The transport hit an unrecoverable fault.
    FatalError,
}

/// Handler verdict on a stream event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamAction {
    /// The event does not concern this handler.
    Ignore,
    /// Drop the binding; the handler has either finished or re-bound
    /// itself elsewhere.
    RemoveHandler,
}

/// Non-blocking byte source for raw body reads.
///
/// `ErrorKind::WouldBlock` signals that the reader should return
/// [`RawProgress::Retry`]; a zero-length read means the peer closed the
/// connection.
pub trait RawSource {
    /// Read available bytes into `buf` without blocking.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl RawSource for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { io::Read::read(self, buf) }
}

/// Non-blocking byte sink for raw body writes.
pub trait RawSink {
    /// Write bytes from `buf` without blocking.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl RawSink for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Outbound contract offered by the transport.
pub trait Transport: Send + Sync + 'static {
    /// Bind `handler` to the stream for `url` and ship the request.
    ///
    /// # Errors
    ///
    /// Returns the transport's failure when the request cannot be accepted;
    /// the caller rolls back stream-id allocation in that case.
    fn send(
        &self,
        url: &Url,
        msg: &Message,
        handler: &Arc<MsgHandler>,
        stateful: bool,
        expires: u64,
    ) -> Result<()>;

    /// Dispatch a request through a virtual redirector without a
    /// pre-allocated stream id.
    ///
    /// # Errors
    ///
    /// Returns the transport's failure when the request cannot be accepted.
    fn redirect(&self, url: &Url, msg: &Message, handler: &Arc<MsgHandler>) -> Result<()>;

    /// The stream-id manager of the connection serving `url`.
    ///
    /// Implementations must not call back into the requesting handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Uninitialized`] when no connection
    /// can be established for `url`.
    fn sid_manager(&self, url: &Url) -> Result<Arc<SidManager>>;

    /// Adopt the request buffer of a stateful request whose session now
    /// owns it.
    fn adopt_request(&self, msg: Message) { drop(msg); }
}

/// Collaborator handling redirects whose target denotes a local path.
///
/// The handler keeps the exactly-once callback discipline; the collaborator
/// only produces the result for the locally served request.
pub trait LocalFileHandler: Send + Sync + 'static {
    /// Serve a locally redirected request and produce its result.
    ///
    /// # Errors
    ///
    /// Returns the failure to surface through the user callback.
    fn handle(&self, url: &Url, request: &Message) -> Result<ResponseBody>;
}
