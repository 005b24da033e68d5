//! Per-request message handler.
//!
//! A [`MsgHandler`] owns one request's identity across transport attempts:
//! it classifies inbound frames, drives raw-body reads, rewrites and
//! resubmits on redirects and waits, enforces the absolute deadline, and
//! delivers the final result to the user callback exactly once.
//!
//! The transport serialises a handler's callbacks; the handler nevertheless
//! owns a lock around its state so the contract survives transports that
//! cannot make that guarantee. Nothing here blocks: waits become timer
//! tasks, socket reads resume through explicit progress records, and
//! resubmissions go back through the transport.

mod href;
mod raw;
mod redirect;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, warn};

pub use href::HandlerRef;
use raw::RawState;
pub use redirect::RedirectEntry;

use crate::{
    clock::unix_now,
    config::Env,
    error::{Error, Result},
    message::Message,
    protocol::RequestCode,
    redirector::{RedirectorRegistry, VirtualRedirector},
    response::{
        Chunk,
        ChunkList,
        ChunkStatusEntry,
        HostInfo,
        HostList,
        ReadInfo,
        ResponseBody,
        ResponseCallback,
        ResponseOutcome,
        VectorReadInfo,
        assemble_body,
        leading_u32,
        parse_response,
    },
    sid::SidHolder,
    transport::{
        ExamineAction,
        LocalFileHandler,
        RawProgress,
        RawSink,
        RawSource,
        StreamAction,
        StreamEvent,
        Transport,
    },
    url::Url,
};

/// Lifecycle states of a request handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerState {
    /// Request written; awaiting an inbound frame.
    Sent,
    /// Header received; body pending via direct socket reads.
    AwaitingRaw,
    /// Server replied `kXR_wait`; sleeping until the retry time.
    Waiting,
    /// Rewriting and resubmitting towards a new endpoint.
    Redirecting,
    /// Partial responses accumulating.
    Assembling,
    /// Terminal; the user callback has been delivered or handed off.
    Done,
}

/// Construction parameters for a handler, filled by the submission helper.
pub(crate) struct HandlerParams {
    pub url: Url,
    pub request: Message,
    pub callback: ResponseCallback,
    pub sid: Option<SidHolder>,
    pub expires: u64,
    pub redirect_as_answer: bool,
    pub stateful: bool,
    pub redirect_limit: u16,
    pub chunk_list: Option<ChunkList>,
    pub load_balancer: Option<HostInfo>,
    pub metalink: Option<Arc<VirtualRedirector>>,
    pub hosts: HostList,
}

/// Collaborators an [`Inner`] transition may need, borrowed from the
/// handler.
pub(crate) struct Ctx<'a> {
    pub transport: &'a Arc<dyn Transport>,
    pub registry: &'a Arc<RedirectorRegistry>,
    pub env: &'a Env,
}

/// Deferred side effect of a state transition, run after the state lock is
/// released.
enum Effect {
    None,
    Complete(Completion),
    Resend,
    Sleep(u64),
    Local(Url),
}

struct Completion {
    callback: Option<ResponseCallback>,
    outcome: ResponseOutcome,
    adopt: Option<Message>,
}

pub(crate) struct Inner {
    state: HandlerState,
    url: Url,
    request: Option<Message>,
    partials: Vec<Message>,
    callback: Option<ResponseCallback>,
    sid: Option<SidHolder>,
    expires: u64,
    redirect_as_answer: bool,
    stateful: bool,
    hosts: HostList,
    load_balancer: Option<HostInfo>,
    chunks: Option<ChunkList>,
    chunk_status: Vec<ChunkStatusEntry>,
    redirects_left: u16,
    aggregated_wait: u64,
    metalink: Option<Arc<VirtualRedirector>>,
    metalink_cursor: usize,
    raw: Option<RawState>,
    raw_frame_done: bool,
    /// Cumulative fill of the single-read chunk buffer across partial
    /// frames.
    read_fill: u32,
    /// Index of the next expected `readv` chunk, persisted across frames.
    readv_index: usize,
    wait_rewrite: bool,
    async_offset: u32,
    trace: Vec<RedirectEntry>,
}

/// Handles one request from submission to the final user callback.
pub struct MsgHandler {
    inner: Mutex<Inner>,
    href: HandlerRef,
    transport: Arc<dyn Transport>,
    registry: Arc<RedirectorRegistry>,
    local: Option<Arc<dyn LocalFileHandler>>,
    env: Env,
}

impl MsgHandler {
    pub(crate) fn new(
        params: HandlerParams,
        transport: Arc<dyn Transport>,
        registry: Arc<RedirectorRegistry>,
        local: Option<Arc<dyn LocalFileHandler>>,
        env: Env,
    ) -> Arc<Self> {
        let chunk_status = params
            .chunk_list
            .as_ref()
            .map(|chunks| vec![ChunkStatusEntry::default(); chunks.len()])
            .unwrap_or_default();
        let inner = Inner {
            state: HandlerState::Sent,
            url: params.url,
            request: Some(params.request),
            partials: Vec::new(),
            callback: Some(params.callback),
            sid: params.sid,
            expires: params.expires,
            redirect_as_answer: params.redirect_as_answer,
            stateful: params.stateful,
            hosts: params.hosts,
            load_balancer: params.load_balancer,
            chunks: params.chunk_list,
            chunk_status,
            redirects_left: params.redirect_limit,
            aggregated_wait: 0,
            metalink: params.metalink,
            metalink_cursor: 0,
            raw: None,
            raw_frame_done: false,
            read_fill: 0,
            readv_index: 0,
            wait_rewrite: false,
            async_offset: 0,
            trace: Vec::new(),
        };
        let handler = Arc::new(Self {
            inner: Mutex::new(inner),
            href: HandlerRef::new(),
            transport,
            registry,
            local,
            env,
        });
        handler.href.bind(Arc::downgrade(&handler));
        handler
    }

    /// Examine an inbound frame and decide how the transport should treat
    /// it.
    #[must_use]
    pub fn examine(&self, msg: &Message) -> ExamineAction {
        let mut inner = self.lock();
        if inner.state == HandlerState::Done {
            return ExamineAction::Ignore;
        }
        let Some(sid) = inner.sid.as_ref().map(SidHolder::sid) else {
            return ExamineAction::Ignore;
        };
        if sid != msg.stream_id() {
            return ExamineAction::Ignore;
        }
        let Some(status) = msg.response_status() else {
            // Unknown tag: take it so processing can surface the protocol
            // error.
            return ExamineAction::TakeAndRemove;
        };
        use crate::protocol::ResponseStatus as S;
        if status == S::Attn {
            return ExamineAction::Ignore;
        }

        let body_pending = msg.response_dlen() > 0 && !msg.response_body_complete();
        if body_pending && !inner.raw_frame_done {
            if inner.raw.is_none() {
                let code = inner.request.as_ref().and_then(Message::request_code);
                inner.raw = Some(RawState::for_frame(code, status, msg));
            }
            inner.state = HandlerState::AwaitingRaw;
            return ExamineAction::Raw;
        }

        match status {
            S::Ok => ExamineAction::TakeAndRemove,
            S::Redirect if inner.redirect_as_answer => ExamineAction::TakeAndRemove,
            S::OkSoFar | S::Error | S::Redirect | S::Wait | S::WaitResp => ExamineAction::Take,
            S::AuthMore | S::Status => ExamineAction::TakeAndRemove,
            S::Attn => ExamineAction::Ignore,
        }
    }

    /// Consume a frame the transport classified as `Take` or
    /// `TakeAndRemove`.
    pub fn process(&self, msg: Message) {
        let effect = {
            let mut inner = self.lock();
            let ctx = self.ctx();
            inner.process_frame(msg, &ctx)
        };
        self.run_effect(effect);
    }

    /// Stream the pending frame body from `src`; re-entrant until `Done`.
    pub fn read_message_body(
        &self,
        msg: &mut Message,
        src: &mut dyn RawSource,
    ) -> Result<(RawProgress, u32)> {
        let mut inner = self.lock();
        inner.read_raw(msg, src)
    }

    /// React to a transport-level event on the handler's stream.
    pub fn on_stream_event(&self, event: StreamEvent, status: Error) -> StreamAction {
        let (action, effect) = {
            let mut inner = self.lock();
            if inner.state == HandlerState::Done {
                (StreamAction::Ignore, Effect::None)
            } else {
                let ctx = self.ctx();
                let effect = match event {
                    StreamEvent::Timeout => inner.finish(Err(Error::Timeout)),
                    StreamEvent::Broken | StreamEvent::FatalError => {
                        if unix_now() >= inner.expires {
                            inner.finish(Err(Error::Timeout))
                        } else {
                            inner.handle_error(status, &ctx)
                        }
                    }
                };
                (StreamAction::RemoveHandler, effect)
            }
        };
        self.run_effect(effect);
        action
    }

    /// Send-completion notification from the transport.
    pub fn on_status_ready(&self, msg: &Message, status: Result<()>) {
        let effect = {
            let mut inner = self.lock();
            if inner.state == HandlerState::Done {
                Effect::None
            } else {
                match status {
                    Ok(()) => {
                        debug!(
                            "request in flight: host={}, request={}",
                            inner.url.host_id(),
                            msg.description()
                        );
                        inner.state = HandlerState::Sent;
                        Effect::None
                    }
                    Err(err) => {
                        let ctx = self.ctx();
                        inner.handle_error(err, &ctx)
                    }
                }
            }
        };
        self.run_effect(effect);
    }

    /// Timer wake after a `kXR_wait` or `kXR_waitresp` sleep.
    pub fn wait_done(&self, now: u64) {
        let effect = {
            let mut inner = self.lock();
            if inner.state != HandlerState::Waiting || inner.callback.is_none() {
                Effect::None
            } else if now >= inner.expires {
                inner.finish(Err(Error::Timeout))
            } else {
                if inner.wait_rewrite {
                    inner.rewrite_for_wait();
                }
                let to = inner.url.clone();
                inner.note_transition(&to, None);
                inner.state = HandlerState::Sent;
                Effect::Resend
            }
        };
        self.run_effect(effect);
    }

    /// Whether the handler produces an outgoing raw body.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        let inner = self.lock();
        inner.request.as_ref().and_then(Message::request_code) == Some(RequestCode::Write)
            && inner.chunks.is_some()
    }

    /// Write the staged outgoing body to `sink`; re-entrant until `Done`.
    pub fn write_message_body(&self, sink: &mut dyn RawSink) -> Result<(RawProgress, u32)> {
        let mut inner = self.lock();
        let mut offset = u64::from(inner.async_offset);
        let mut bytes = 0u32;
        let outcome = {
            let Some(chunks) = inner.chunks.as_ref() else {
                return Ok((RawProgress::Done, 0));
            };
            let total: u64 = chunks.iter().map(|chunk| u64::from(chunk.len)).sum();
            let mut progress = RawProgress::Done;
            'outer: while offset < total {
                let (index, local) = locate_chunk(chunks, offset);
                let chunk = &chunks[index];
                match sink.write(&chunk.buf[local..]) {
                    Ok(0) => {
                        return Err(Error::Socket("connection closed during raw write".into()));
                    }
                    Ok(n) => {
                        offset += n as u64;
                        bytes += u32::try_from(n).unwrap_or(0);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        progress = RawProgress::Retry;
                        break 'outer;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            progress
        };
        inner.async_offset = u32::try_from(offset).unwrap_or(u32::MAX);
        Ok((outcome, bytes))
    }

    /// Snapshot of the staged outgoing body and the current write offset.
    #[must_use]
    pub fn message_body(&self) -> (Option<ChunkList>, u32) {
        let inner = self.lock();
        (inner.chunks.clone(), inner.async_offset)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandlerState { self.lock().state }

    /// Stream id currently bound to the request, if any.
    #[must_use]
    pub fn sid(&self) -> Option<u16> { self.lock().sid.as_ref().map(SidHolder::sid) }

    /// Seconds of server-requested wait accumulated across hops.
    #[must_use]
    pub fn aggregated_wait_time(&self) -> u64 { self.lock().aggregated_wait }

    /// Snapshot of the endpoints visited so far.
    #[must_use]
    pub fn hosts(&self) -> HostList { self.lock().hosts.clone() }

    /// Snapshot of the redirect trace-back.
    #[must_use]
    pub fn trace(&self) -> Vec<RedirectEntry> { self.lock().trace.clone() }

    /// Snapshot of the per-chunk completion records.
    #[must_use]
    pub fn chunk_statuses(&self) -> Vec<ChunkStatusEntry> { self.lock().chunk_status.clone() }

    /// Roll back a submission the transport refused; no user callback
    /// fires.
    pub(crate) fn abort_submission(&self) {
        let mut inner = self.lock();
        inner.state = HandlerState::Done;
        if let Some(sid) = inner.sid.as_mut() {
            sid.release();
        }
        inner.callback = None;
        self.href.invalidate();
    }

    fn ctx(&self) -> Ctx<'_> {
        Ctx {
            transport: &self.transport,
            registry: &self.registry,
            env: &self.env,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Complete(completion) => {
                if let Some(msg) = completion.adopt {
                    self.transport.adopt_request(msg);
                }
                if let Some(callback) = completion.callback {
                    callback(completion.outcome);
                }
                self.href.invalidate();
            }
            Effect::Resend => self.resend(),
            Effect::Sleep(secs) => self.spawn_wait_timer(secs),
            Effect::Local(url) => self.hand_off_local(url),
        }
    }

    fn resend(&self) {
        let (url, msg, stateful, expires) = {
            let inner = self.lock();
            (
                inner.url.clone(),
                inner.request.clone(),
                inner.stateful,
                inner.expires,
            )
        };
        let (Some(msg), Some(me)) = (msg, self.href.upgrade()) else {
            return;
        };
        debug!(
            "resubmitting request: host={}, request={}",
            url.host_id(),
            msg.description()
        );
        if let Err(err) = self.transport.send(&url, &msg, &me, stateful, expires) {
            let effect = {
                let mut inner = self.lock();
                let ctx = self.ctx();
                inner.handle_error(err, &ctx)
            };
            self.run_effect(effect);
        }
    }

    fn spawn_wait_timer(&self, secs: u64) {
        let href = self.href.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = href.cancelled() => {}
                () = tokio::time::sleep(Duration::from_secs(secs)) => {
                    if let Some(handler) = href.upgrade() {
                        handler.wait_done(unix_now());
                    }
                }
            }
        });
    }

    fn hand_off_local(&self, url: Url) {
        let (request, callback, hosts) = {
            let mut inner = self.lock();
            inner.state = HandlerState::Done;
            if let Some(sid) = inner.sid.as_mut() {
                sid.release();
            }
            (
                inner.request.take(),
                inner.callback.take(),
                inner.hosts.clone(),
            )
        };
        let Some(callback) = callback else { return };
        let result = match (&self.local, request) {
            (Some(local), Some(request)) => local.handle(&url, &request),
            _ => Err(Error::LocalRedirect(url.to_string())),
        };
        callback(ResponseOutcome { result, hosts });
        self.href.invalidate();
    }
}

impl Drop for MsgHandler {
    fn drop(&mut self) {
        self.href.invalidate();
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.trace.is_empty() {
            return;
        }
        debug!("redirect trace-back: host={}", inner.url.host_id());
        for (index, entry) in inner.trace.iter().enumerate() {
            debug!("  {index}. {entry}");
        }
    }
}

impl Inner {
    fn process_frame(&mut self, msg: Message, ctx: &Ctx<'_>) -> Effect {
        use crate::protocol::ResponseStatus as S;
        self.raw_frame_done = false;
        if self.callback.is_none() {
            return Effect::None;
        }
        if unix_now() >= self.expires {
            return self.finish(Err(Error::Timeout));
        }
        match msg.response_status() {
            None => self.finish(Err(Error::Protocol(format!(
                "unknown response tag {}",
                msg.response_status_raw()
            )))),
            Some(S::Attn) => Effect::None,
            Some(S::Ok) => self.on_ok(&msg),
            Some(S::OkSoFar) => {
                self.partials.push(msg);
                self.state = HandlerState::Assembling;
                Effect::None
            }
            Some(S::Error) => self.on_error_frame(&msg, ctx),
            Some(S::Redirect) => self.on_redirect(&msg, ctx),
            Some(S::Wait) => self.on_wait(&msg, ctx, true),
            Some(S::WaitResp) => self.on_wait(&msg, ctx, false),
            Some(S::AuthMore | S::Status) => self.finish(Err(Error::Protocol(format!(
                "unexpected response {}",
                msg.response_status().map_or("?", |s| s.name())
            )))),
        }
    }

    fn on_ok(&mut self, msg: &Message) -> Effect {
        match self.request.as_ref().and_then(Message::request_code) {
            Some(RequestCode::Read) => {
                let Some(chunk) = self
                    .chunks
                    .take()
                    .and_then(|chunks| chunks.into_iter().next())
                else {
                    return self.finish(Err(Error::Protocol(
                        "read completed without a bound chunk".into(),
                    )));
                };
                let len = self.read_fill;
                let mut data = chunk.buf;
                data.truncate(len as usize);
                self.finish(Ok(ResponseBody::Read(ReadInfo { len, data })))
            }
            Some(RequestCode::ReadV) => {
                if self.chunk_status.iter().any(|status| status.size_error) {
                    return self.finish(Err(Error::Protocol(
                        "readv response geometry mismatched the request".into(),
                    )));
                }
                if !self.chunk_status.iter().all(|status| status.done) {
                    return self.finish(Err(Error::Protocol(
                        "readv response left chunks unfilled".into(),
                    )));
                }
                let chunks = self.chunks.take().unwrap_or_default();
                let total = chunks.iter().map(|chunk| chunk.len).sum();
                self.finish(Ok(ResponseBody::VectorRead(VectorReadInfo {
                    total,
                    chunks,
                })))
            }
            _ => {
                let body = assemble_body(&self.partials, msg);
                let Some(request) = self.request.as_ref() else {
                    return self.finish(Err(Error::Uninitialized("request buffer")));
                };
                match parse_response(request, &body) {
                    Ok(parsed) => self.finish(Ok(parsed)),
                    Err(err) => self.finish(Err(err)),
                }
            }
        }
    }

    fn on_error_frame(&mut self, msg: &Message, ctx: &Ctx<'_>) -> Effect {
        let body = msg.response_body();
        let Some(code) = leading_u32(body) else {
            return self.finish(Err(Error::Protocol("error body lacks a code".into())));
        };
        let text = String::from_utf8_lossy(&body[4..])
            .trim_end_matches('\0')
            .to_owned();
        let err = Error::server(code, text);
        debug!("server error: host={}, error={err}", self.url.host_id());
        self.handle_error(err, ctx)
    }

    fn on_redirect(&mut self, msg: &Message, ctx: &Ctx<'_>) -> Effect {
        let target = match redirect::parse_redirect_body(msg.response_body()) {
            Ok(target) => target,
            Err(err) => return self.finish(Err(err)),
        };
        debug!(
            "redirect received: host={}, target={target}",
            self.url.host_id()
        );

        if self.redirect_as_answer {
            self.note_transition(&target, None);
            return self.finish(Ok(ResponseBody::Redirect(target)));
        }
        if target.is_local() {
            return Effect::Local(target);
        }
        if self.redirects_left == 0 {
            return self.finish(Err(Error::RedirectLimitReached));
        }
        self.redirects_left -= 1;

        let mut target = target;
        if target.is_metalink() {
            match ctx.registry.register(&target) {
                Ok(redirector) => {
                    let Some(first) = redirector.endpoint(0) else {
                        return self.finish(Err(Error::InvalidRedirectUrl(
                            "metalink resolves to no endpoints".into(),
                        )));
                    };
                    let mut endpoint = first.clone();
                    crate::cgi::merge_params(endpoint.params_mut(), target.params(), false);
                    self.metalink = Some(Arc::clone(&redirector));
                    self.metalink_cursor = 0;
                    target = endpoint;
                }
                Err(err) => return self.finish(Err(err)),
            }
        }

        self.note_transition(&target, None);
        match self.rewrite_for_redirect(&target, ctx, None) {
            Ok(()) => {
                self.state = HandlerState::Redirecting;
                Effect::Resend
            }
            Err(err) => self.finish(Err(err)),
        }
    }

    fn on_wait(&mut self, msg: &Message, ctx: &Ctx<'_>, rewrite_on_wake: bool) -> Effect {
        if self.raw.is_some() {
            return self.finish(Err(Error::Protocol(
                "kXR_wait during an active raw body read".into(),
            )));
        }
        let Some(secs) = leading_u32(msg.response_body()) else {
            return self.finish(Err(Error::Protocol("wait body lacks a duration".into())));
        };
        let mut secs = u64::from(secs);
        let now = unix_now();

        // A wait from a metalink member is pointless when another untried
        // member exists; move on immediately. With the retry budget or the
        // deadline exhausted the skip is off the table and the wait is
        // served normally.
        if rewrite_on_wake && self.omit_wait(now) {
            if let Some(target) = self.next_retry_target() {
                self.redirects_left -= 1;
                self.note_transition(&target, None);
                return match self.rewrite_for_redirect(&target, ctx, None) {
                    Ok(()) => {
                        self.state = HandlerState::Redirecting;
                        Effect::Resend
                    }
                    Err(err) => self.finish(Err(err)),
                };
            }
        }

        let ceiling = ctx.env.wait_ceiling();
        if self.aggregated_wait >= ceiling {
            return self.finish(Err(Error::Timeout));
        }
        if self.aggregated_wait + secs > ceiling {
            secs = ceiling - self.aggregated_wait;
        }
        self.aggregated_wait += secs;

        // Never sleep past the absolute deadline; the wake observes the
        // expiry and fails with a timeout.
        if now.saturating_add(secs) >= self.expires {
            secs = self.expires.saturating_sub(now);
        }
        debug!(
            "entering wait: host={}, seconds={secs}, aggregated={}",
            self.url.host_id(),
            self.aggregated_wait
        );
        self.wait_rewrite = rewrite_on_wake;
        self.state = HandlerState::Waiting;
        Effect::Sleep(secs)
    }

    /// Single entry point for failures; recoverable ones cycle through
    /// retry, everything else surfaces.
    fn handle_error(&mut self, err: Error, ctx: &Ctx<'_>) -> Effect {
        let now = unix_now();
        if !err.is_recoverable() || !self.can_retry(now) {
            return self.finish(Err(err));
        }
        let Some(target) = self.next_retry_target() else {
            return self.finish(Err(err));
        };
        self.redirects_left -= 1;
        debug!(
            "retrying after error: host={}, target={}, error={err}",
            self.url.host_id(),
            target.host_id()
        );
        let errno = err.server_code();
        self.note_transition(&target, Some(err));
        match self.rewrite_for_redirect(&target, ctx, errno) {
            Ok(()) => {
                self.state = HandlerState::Redirecting;
                Effect::Resend
            }
            Err(rewrite_err) => self.finish(Err(rewrite_err)),
        }
    }

    /// Build the terminal transition: exactly-once callback, stream-id
    /// release, stateful hand-off.
    fn finish(&mut self, result: Result<ResponseBody>) -> Effect {
        if self.callback.is_none() {
            warn!(
                "terminal transition after completion dropped: host={}",
                self.url.host_id()
            );
            return Effect::None;
        }
        self.state = HandlerState::Done;
        if let Some(sid) = self.sid.as_mut() {
            sid.release();
        }
        let adopt = if result.is_ok() && self.stateful {
            self.request.take()
        } else {
            None
        };
        let callback = self.callback.take();
        let hosts = self.hosts.clone();
        Effect::Complete(Completion {
            callback,
            outcome: ResponseOutcome { result, hosts },
            adopt,
        })
    }
}

fn locate_chunk(chunks: &[Chunk], offset: u64) -> (usize, usize) {
    let mut remaining = offset;
    for (index, chunk) in chunks.iter().enumerate() {
        let len = u64::from(chunk.len);
        if remaining < len {
            return (index, usize::try_from(remaining).unwrap_or(0));
        }
        remaining -= len;
    }
    (chunks.len().saturating_sub(1), 0)
}
