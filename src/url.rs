//! Endpoint URLs and their CGI parameter maps.
//!
//! XRootD endpoints are addressed as `root://host:port//path?key=value&…`.
//! The parameter map is ordered so rewritten CGI strings are deterministic,
//! which keeps the `tried=` bookkeeping and the redirect trace-back stable
//! across runs.

use std::{collections::BTreeMap, fmt};

use crate::error::{Error, Result};

/// Ordered CGI parameter map.
pub type ParamsMap = BTreeMap<String, String>;

/// Default port of the root protocol.
pub const DEFAULT_PORT: u16 = 1094;

/// A parsed endpoint URL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Url {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    params: ParamsMap,
}

impl Url {
    /// Parse an URL of the form `scheme://host[:port][/[/]path[?cgi]]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] when the scheme separator or host is
    /// missing, or the port is not numeric.
    pub fn parse(input: &str) -> Result<Self> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| Error::InvalidArgs(format!("missing scheme: {input}")))?;

        let (authority, tail) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() && scheme != "file" {
            return Err(Error::InvalidArgs(format!("missing host: {input}")));
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidArgs(format!("invalid port: {input}")))?;
                (host.to_owned(), port)
            }
            None => (authority.to_owned(), DEFAULT_PORT),
        };

        // The canonical form uses a double slash before an absolute path;
        // collapse it so `path` always starts with a single one.
        let tail = tail.strip_prefix('/').map_or(tail, |stripped| {
            if stripped.starts_with('/') { stripped } else { tail }
        });
        let (path, params) = split_path_and_params(tail);

        Ok(Self {
            scheme: scheme.to_owned(),
            host,
            port,
            path,
            params,
        })
    }

    /// Build an URL from a bare `path[?cgi]` string, as found in request
    /// bodies.
    #[must_use]
    pub fn from_path_with_params(input: &str) -> Self {
        let (path, params) = split_path_and_params(input);
        Self {
            scheme: String::new(),
            host: String::new(),
            port: 0,
            path,
            params,
        }
    }

    /// Scheme component.
    #[must_use]
    pub fn scheme(&self) -> &str { &self.scheme }

    /// Host component.
    #[must_use]
    pub fn host(&self) -> &str { &self.host }

    /// Port component.
    #[must_use]
    pub const fn port(&self) -> u16 { self.port }

    /// Path component.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// Replace the path component.
    pub fn set_path(&mut self, path: impl Into<String>) { self.path = path.into(); }

    /// CGI parameters.
    #[must_use]
    pub const fn params(&self) -> &ParamsMap { &self.params }

    /// Mutable access to the CGI parameters.
    pub const fn params_mut(&mut self) -> &mut ParamsMap { &mut self.params }

    /// Replace the CGI parameters.
    pub fn set_params(&mut self, params: ParamsMap) { self.params = params; }

    /// `host:port` identifier used in log lines and the `tried=` CGI.
    #[must_use]
    pub fn host_id(&self) -> String { format!("{}:{}", self.host, self.port) }

    /// Path plus encoded CGI, the request-body form.
    #[must_use]
    pub fn path_with_params(&self) -> String {
        let mut out = self.path.clone();
        if !self.params.is_empty() {
            out.push('?');
            out.push_str(&encode_params(&self.params));
        }
        out
    }

    /// Whether the URL names a metalink description rather than a server.
    #[must_use]
    pub fn is_metalink(&self) -> bool {
        self.path.ends_with(".meta4") || self.path.ends_with(".metalink")
    }

    /// Whether the URL denotes a local path served without a remote
    /// endpoint.
    #[must_use]
    pub fn is_local(&self) -> bool { self.scheme == "file" }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.scheme,
            self.host,
            self.port,
            self.path_with_params()
        )
    }
}

fn split_path_and_params(input: &str) -> (String, ParamsMap) {
    match input.split_once('?') {
        Some((path, cgi)) => (path.to_owned(), decode_params(cgi)),
        None => (input.to_owned(), ParamsMap::new()),
    }
}

/// Decode an `a=1&b=2` CGI string into a parameter map.
#[must_use]
pub fn decode_params(cgi: &str) -> ParamsMap {
    cgi.split('&')
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (item.to_owned(), String::new()),
        })
        .collect()
}

/// Encode a parameter map back into its `a=1&b=2` CGI form.
#[must_use]
pub fn encode_params(params: &ParamsMap) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_a_canonical_root_url() {
        let url = Url::parse("root://eos.cern.ch:1094//eos/user/file?xrd.wantprot=unix")
            .expect("canonical URL should parse");
        assert_eq!(url.scheme(), "root");
        assert_eq!(url.host(), "eos.cern.ch");
        assert_eq!(url.port(), 1094);
        assert_eq!(url.path(), "/eos/user/file");
        assert_eq!(
            url.params().get("xrd.wantprot").map(String::as_str),
            Some("unix")
        );
    }

    #[rstest]
    #[case("root://host", 1094)]
    #[case("root://host:2094", 2094)]
    fn default_port_applies_when_absent(#[case] input: &str, #[case] port: u16) {
        let url = Url::parse(input).expect("URL should parse");
        assert_eq!(url.port(), port);
    }

    #[rstest]
    #[case("no-scheme-here")]
    #[case("root://host:notaport//x")]
    fn malformed_urls_are_rejected(#[case] input: &str) {
        assert!(Url::parse(input).is_err());
    }

    #[test]
    fn single_slash_paths_are_preserved() {
        let url = Url::parse("root://host:1094/tmp/f").expect("URL should parse");
        assert_eq!(url.path(), "/tmp/f");
    }

    #[rstest]
    #[case("root://host//data/f.meta4", true)]
    #[case("root://host//data/f.metalink", true)]
    #[case("root://host//data/f", false)]
    fn metalink_detection_uses_the_suffix(#[case] input: &str, #[case] expected: bool) {
        let url = Url::parse(input).expect("URL should parse");
        assert_eq!(url.is_metalink(), expected);
    }

    #[test]
    fn path_with_params_round_trips() {
        let url = Url::from_path_with_params("/a/b?k=v&t=1,2");
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.path_with_params(), "/a/b?k=v&t=1,2");
    }

    #[test]
    fn cgi_items_without_values_decode_to_empty_strings() {
        let params = decode_params("flag&k=v");
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert_eq!(params.get("k").map(String::as_str), Some("v"));
    }
}
