//! Submission helpers binding requests to handlers and the transport.
//!
//! [`send_message`] fills in configuration defaults, allocates a stream id,
//! stamps it into the marshalled request, constructs the message handler
//! and hands the pair to the transport. Its dual, [`redirect_message`],
//! dispatches through a virtual redirector: no stream id yet (one is
//! allocated when the handler resubmits towards a concrete endpoint) and
//! the initial URL becomes the load balancer.

use std::sync::Arc;

use log::{debug, error};

use crate::{
    clock::unix_now,
    config::Env,
    error::Result,
    handler::{HandlerParams, MsgHandler},
    message::Message,
    redirector::RedirectorRegistry,
    response::{ChunkList, HostInfo, ResponseCallback},
    sid::SidHolder,
    transport::{LocalFileHandler, Transport},
    url::Url,
};

/// Per-request send parameters; zero values defer to configuration.
pub struct SendParams {
    /// Request timeout in seconds; `0` selects the configured default.
    pub timeout: u64,
    /// Absolute deadline, Unix seconds; `0` derives it from `timeout`.
    pub expires: u64,
    /// Follow `kXR_redirect` responses; when false, the redirect URL is
    /// delivered as the final result.
    pub follow_redirects: bool,
    /// Bind the request to a session; the session adopts the request
    /// buffer on success.
    pub stateful: bool,
    /// Redirect budget; `0` selects the configured default.
    pub redirect_limit: u16,
    /// Destination buffers for read-family requests, or staged data for
    /// raw writes.
    pub chunk_list: Option<ChunkList>,
    /// Endpoint to return to on recoverable failures.
    pub load_balancer: Option<HostInfo>,
}

impl Default for SendParams {
    fn default() -> Self {
        Self {
            timeout: 0,
            expires: 0,
            follow_redirects: true,
            stateful: false,
            redirect_limit: 0,
            chunk_list: None,
            load_balancer: None,
        }
    }
}

/// Collaborators a submission needs, wired from configuration.
pub struct SendContext {
    /// Connection pool shipping requests and delivering frames.
    pub transport: Arc<dyn Transport>,
    /// Process-wide virtual redirector index.
    pub registry: Arc<RedirectorRegistry>,
    /// Optional local-path redirect collaborator.
    pub local: Option<Arc<dyn LocalFileHandler>>,
    /// Resolved configuration defaults.
    pub env: Env,
}

/// Fill zero-valued send parameters from configuration.
pub fn process_send_params(env: &Env, params: &mut SendParams) {
    if params.timeout == 0 {
        params.timeout = env.request_timeout();
    }
    if params.expires == 0 {
        params.expires = unix_now() + params.timeout;
    }
    if params.redirect_limit == 0 {
        params.redirect_limit = env.redirect_limit();
    }
}

/// Submit a request towards `url`.
///
/// On transport-accept failure the stream id is released, the handler is
/// torn down without a user callback, and the failure returns to the
/// caller.
///
/// # Errors
///
/// Returns the transport's failure when no stream id can be allocated or
/// the send is not accepted.
pub fn send_message(
    ctx: &SendContext,
    url: &Url,
    mut msg: Message,
    callback: ResponseCallback,
    mut params: SendParams,
) -> Result<()> {
    process_send_params(&ctx.env, &mut params);
    debug!(
        "sending request: host={}, request={}",
        url.host_id(),
        msg.description()
    );

    let manager = ctx.transport.sid_manager(url)?;
    let sid = manager.allocate()?;
    msg.set_stream_id(sid);
    let holder = SidHolder::new(&manager, sid);

    let wire = msg.clone();
    let handler = MsgHandler::new(
        HandlerParams {
            url: url.clone(),
            request: msg,
            callback,
            sid: Some(holder),
            expires: params.expires,
            redirect_as_answer: !params.follow_redirects,
            stateful: params.stateful,
            redirect_limit: params.redirect_limit,
            chunk_list: params.chunk_list.take(),
            load_balancer: params.load_balancer.clone(),
            metalink: None,
            hosts: vec![HostInfo {
                url: url.clone(),
                load_balancer: false,
            }],
        },
        Arc::clone(&ctx.transport),
        Arc::clone(&ctx.registry),
        ctx.local.clone(),
        ctx.env,
    );

    if let Err(err) = ctx
        .transport
        .send(url, &wire, &handler, params.stateful, params.expires)
    {
        error!(
            "unable to send request: host={}, error={err}",
            url.host_id()
        );
        handler.abort_submission();
        return Err(err);
    }
    Ok(())
}

/// Submit a request through the virtual redirector for a metalink `url`.
///
/// The redirector must already be resolved in the registry; the URL is
/// marked as the load balancer and stream-id allocation is deferred to the
/// first resubmission towards a concrete endpoint.
///
/// # Errors
///
/// Returns [`crate::error::Error::Uninitialized`] when no redirector is
/// resolved for `url`, or the transport's failure when the dispatch is not
/// accepted.
pub fn redirect_message(
    ctx: &SendContext,
    url: &Url,
    msg: Message,
    callback: ResponseCallback,
    params: &mut SendParams,
) -> Result<()> {
    let redirector = ctx.registry.register(url)?;
    process_send_params(&ctx.env, params);
    debug!(
        "redirecting request: host={}, request={}",
        url.host_id(),
        msg.description()
    );

    let balancer = HostInfo {
        url: url.clone(),
        load_balancer: true,
    };
    params.load_balancer = Some(balancer.clone());

    let wire = msg.clone();
    let handler = MsgHandler::new(
        HandlerParams {
            url: url.clone(),
            request: msg,
            callback,
            sid: None,
            expires: params.expires,
            redirect_as_answer: !params.follow_redirects,
            stateful: params.stateful,
            redirect_limit: params.redirect_limit,
            chunk_list: params.chunk_list.take(),
            load_balancer: Some(balancer.clone()),
            metalink: Some(redirector),
            hosts: vec![balancer],
        },
        Arc::clone(&ctx.transport),
        Arc::clone(&ctx.registry),
        ctx.local.clone(),
        ctx.env,
    );

    if let Err(err) = ctx.transport.redirect(url, &wire, &handler) {
        error!(
            "unable to dispatch request: host={}, error={err}",
            url.host_id()
        );
        handler.abort_submission();
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_REDIRECT_LIMIT, DEFAULT_REQUEST_TIMEOUT};

    #[test]
    fn zero_parameters_pick_up_configured_defaults() {
        let env = Env::default();
        let mut params = SendParams::default();
        process_send_params(&env, &mut params);
        assert_eq!(params.timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(params.redirect_limit, DEFAULT_REDIRECT_LIMIT);
        assert!(params.expires >= unix_now());
    }

    #[test]
    fn explicit_parameters_are_left_alone() {
        let env = Env::with_values(100, 5);
        let mut params = SendParams {
            timeout: 7,
            expires: 42,
            redirect_limit: 2,
            ..SendParams::default()
        };
        process_send_params(&env, &mut params);
        assert_eq!(params.timeout, 7);
        assert_eq!(params.expires, 42);
        assert_eq!(params.redirect_limit, 2);
    }
}
