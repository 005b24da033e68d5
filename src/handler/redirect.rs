//! Redirect, retry and wait policy.
//!
//! Redirect handling rewrites the in-flight request for its new target: a
//! fresh stream id on the new connection, the `tried=` bookkeeping, the
//! target's CGI merged in, and `dlen` recomputed. Metalink redirectors are
//! traversed entry by entry; recoverable failures fall back to the load
//! balancer. Every transition is recorded in the redirect trace-back.

use std::fmt;

use crate::{
    cgi,
    error::{Error, Result},
    message::Message,
    protocol::ServerErrorCode,
    request,
    response::{HostInfo, leading_u32},
    sid::SidHolder,
    url::{ParamsMap, Url},
};

use super::{Ctx, Inner};

/// One redirect or retry transition, kept for diagnostics.
#[derive(Clone, Debug)]
pub struct RedirectEntry {
    /// Endpoint the request was leaving.
    pub from: Url,
    /// Endpoint the request moved to; equal to `from` for wait retries.
    pub to: Url,
    /// Failure that triggered the transition, when there was one.
    pub status: Option<Error>,
}

impl fmt::Display for RedirectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Some(err) => write!(f, "failed at: {} ({err}), retrying at: {}", self.from, self.to),
            None if self.from == self.to => write!(f, "retrying: {}", self.to),
            None => write!(f, "redirected from: {} to: {}", self.from, self.to),
        }
    }
}

/// Decode a `kXR_redirect` body into the target URL.
///
/// The body carries a network-order port followed by `host[?cgi[?token]]`
/// text; a port of `-1` marks the host field as a complete URL, the form
/// metalink redirectors use.
pub(super) fn parse_redirect_body(body: &[u8]) -> Result<Url> {
    let port = leading_u32(body)
        .ok_or_else(|| Error::Protocol("redirect body lacks a port".into()))?;
    let text = std::str::from_utf8(&body[4..])
        .map_err(|_| Error::Protocol("redirect host is not valid UTF-8".into()))?
        .trim_end_matches('\0');

    let (host_part, cgi_part) = match text.split_once('?') {
        Some((host, cgi)) => (host, Some(cgi)),
        None => (text, None),
    };

    let mut target = if port == u32::MAX {
        Url::parse(host_part).map_err(|_| Error::InvalidRedirectUrl(host_part.to_owned()))?
    } else {
        Url::parse(&format!("root://{host_part}:{port}/"))
            .map_err(|_| Error::InvalidRedirectUrl(host_part.to_owned()))?
    };
    if let Some(cgi) = cgi_part {
        // A second separator introduces an opaque token; carry it verbatim.
        let cgi = cgi.split_once('?').map_or(cgi, |(head, _)| head);
        target.set_params(crate::url::decode_params(cgi));
    }
    Ok(target)
}

impl Inner {
    /// Whether this request still qualifies for a retry at another
    /// endpoint.
    ///
    /// Requires a remaining redirect budget, an unexpired deadline, and an
    /// operation that is either idempotent or has made no partial
    /// progress.
    pub(super) fn can_retry(&self, now: u64) -> bool {
        let untouched = self.partials.is_empty()
            && !self.chunk_status.iter().any(|status| status.done);
        let opcode_ok = self
            .request
            .as_ref()
            .and_then(Message::request_code)
            .is_some_and(|code| code.is_idempotent() || untouched);
        opcode_ok && self.redirects_left > 0 && now < self.expires
    }

    /// Whether a `kXR_wait` may be skipped in favour of the next metalink
    /// entry.
    ///
    /// Skipping is a resubmission like any other: it requires an untried
    /// entry, an idempotent operation, and the full retry eligibility of
    /// [`can_retry`](Self::can_retry), so the redirect budget and the
    /// deadline bound metalink traversal too.
    pub(super) fn omit_wait(&self, now: u64) -> bool {
        let idempotent = self
            .request
            .as_ref()
            .and_then(Message::request_code)
            .is_some_and(|code| code.is_idempotent());
        idempotent
            && self.can_retry(now)
            && self
                .metalink
                .as_ref()
                .is_some_and(|redirector| self.metalink_cursor + 1 < redirector.len())
    }

    /// Pick the next endpoint for a recoverable failure: an untried
    /// metalink entry first, the load balancer otherwise.
    pub(super) fn next_retry_target(&mut self) -> Option<Url> {
        if let Some(redirector) = &self.metalink {
            if self.metalink_cursor + 1 < redirector.len() {
                self.metalink_cursor += 1;
                return redirector.endpoint(self.metalink_cursor).cloned();
            }
        }
        self.load_balancer
            .as_ref()
            .map(|balancer| balancer.url.clone())
    }

    /// Rewrite the request for `target` and reset per-attempt state.
    ///
    /// Allocates a fresh stream id on the target's connection (the previous
    /// holder releases on replacement), records the `tried=` CGI, merges
    /// the target's parameters, and discards pending partials and chunk
    /// progress.
    pub(super) fn rewrite_for_redirect(
        &mut self,
        target: &Url,
        ctx: &Ctx<'_>,
        errno: Option<ServerErrorCode>,
    ) -> Result<()> {
        let request = self
            .request
            .as_mut()
            .ok_or(Error::Uninitialized("request buffer"))?;

        let manager = ctx.transport.sid_manager(target)?;
        let sid = manager.allocate()?;
        request.set_stream_id(sid);
        self.sid = Some(SidHolder::new(&manager, sid));

        let mut tried = ParamsMap::new();
        tried.insert("tried".to_owned(), self.url.host().to_owned());
        if let Some(code) = errno {
            tried.insert("triedrc".to_owned(), code.tried_class().to_owned());
        }
        cgi::rewrite_cgi_and_path(request, &tried, false, None)?;

        let new_path =
            (!target.path().is_empty() && target.path() != "/").then(|| target.path().to_owned());
        cgi::rewrite_cgi_and_path(request, target.params(), false, new_path.as_deref())?;

        // A new attempt starts clean: pending partials are discarded and
        // the chunk bookkeeping resets to all-false.
        self.partials.clear();
        for status in &mut self.chunk_status {
            *status = Default::default();
        }
        self.read_fill = 0;
        self.readv_index = 0;
        self.raw = None;
        self.raw_frame_done = false;

        self.url = target.clone();
        self.hosts.push(HostInfo {
            url: target.clone(),
            load_balancer: false,
        });
        Ok(())
    }

    /// Rewrite parts of the request before a wait resubmission.
    ///
    /// Reissued `open` and `locate` requests gain the refresh flag so the
    /// retry bypasses stale location caches.
    pub(super) fn rewrite_for_wait(&mut self) {
        if let Some(msg) = self.request.as_mut() {
            request::switch_on_refresh(msg);
        }
    }

    /// Record a transition in the redirect trace-back.
    pub(super) fn note_transition(&mut self, to: &Url, status: Option<Error>) {
        self.trace.push(RedirectEntry {
            from: self.url.clone(),
            to: to.clone(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn redirect_bodies_decode_host_port_and_cgi() {
        let mut body = vec![0, 0, 0x04, 0x46]; // port 1094
        body.extend_from_slice(b"disk.cern.ch?cms.tag=a");
        let url = parse_redirect_body(&body).expect("redirect body should decode");
        assert_eq!(url.host(), "disk.cern.ch");
        assert_eq!(url.port(), 1094);
        assert_eq!(url.params().get("cms.tag").map(String::as_str), Some("a"));
    }

    #[test]
    fn full_url_form_is_marked_by_port_minus_one() {
        let mut body = vec![0xFF, 0xFF, 0xFF, 0xFF];
        body.extend_from_slice(b"root://mirror.cern.ch:2094//data/set.meta4");
        let url = parse_redirect_body(&body).expect("redirect body should decode");
        assert_eq!(url.host(), "mirror.cern.ch");
        assert_eq!(url.port(), 2094);
        assert!(url.is_metalink());
    }

    #[test]
    fn opaque_tokens_are_dropped_from_the_cgi() {
        let mut body = vec![0, 0, 0x04, 0x46];
        body.extend_from_slice(b"disk.cern.ch?k=v?opaque-token");
        let url = parse_redirect_body(&body).expect("redirect body should decode");
        assert_eq!(url.params().get("k").map(String::as_str), Some("v"));
        assert_eq!(url.params().len(), 1);
    }

    #[rstest]
    #[case(&[0, 0][..])]
    fn short_redirect_bodies_fail(#[case] body: &[u8]) {
        assert!(parse_redirect_body(body).is_err());
    }

    #[test]
    fn trace_entries_render_by_transition_kind() {
        let e1 = Url::parse("root://e1:1094/").expect("url");
        let e2 = Url::parse("root://e2:1094/").expect("url");
        let redirect = RedirectEntry {
            from: e1.clone(),
            to: e2.clone(),
            status: None,
        };
        assert!(redirect.to_string().starts_with("redirected from:"));
        let retry = RedirectEntry {
            from: e1.clone(),
            to: e1.clone(),
            status: None,
        };
        assert!(retry.to_string().starts_with("retrying:"));
        let failed = RedirectEntry {
            from: e1,
            to: e2,
            status: Some(Error::Timeout),
        };
        assert!(failed.to_string().starts_with("failed at:"));
    }
}
