//! Configuration provider for request defaults.
//!
//! Mirrors the environment-driven configuration of the original client:
//! compiled defaults overridable through process environment variables.
//! Collaborators receive an [`Env`] by value; nothing reads global state at
//! request time.

use std::env;

/// Default request timeout in seconds (`RequestTimeout`).
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 1800;

/// Default redirect limit per request (`RedirectLimit`).
pub const DEFAULT_REDIRECT_LIMIT: u16 = 16;

/// Environment variable overriding the request timeout.
pub const REQUEST_TIMEOUT_VAR: &str = "XRD_REQUESTTIMEOUT";

/// Environment variable overriding the redirect limit.
pub const REDIRECT_LIMIT_VAR: &str = "XRD_REDIRECTLIMIT";

/// Resolved configuration values used when send parameters leave a field at
/// its zero default.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Env {
    request_timeout: u64,
    redirect_limit: u16,
}

impl Env {
    /// Build a configuration from compiled defaults plus process
    /// environment overrides.
    ///
    /// Unparsable or zero override values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            request_timeout: read_var(REQUEST_TIMEOUT_VAR).unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            redirect_limit: read_var(REDIRECT_LIMIT_VAR).unwrap_or(DEFAULT_REDIRECT_LIMIT),
        }
    }

    /// Build a configuration with explicit values, for tests and embedders.
    #[must_use]
    pub const fn with_values(request_timeout: u64, redirect_limit: u16) -> Self {
        Self {
            request_timeout,
            redirect_limit,
        }
    }

    /// Request timeout in seconds.
    #[must_use]
    pub const fn request_timeout(&self) -> u64 { self.request_timeout }

    /// Redirect limit per request.
    #[must_use]
    pub const fn redirect_limit(&self) -> u16 { self.redirect_limit }

    /// Ceiling on the aggregated `kXR_wait` seconds a single request may
    /// accumulate across hops.
    #[must_use]
    pub const fn wait_ceiling(&self) -> u64 { self.request_timeout * 2 }
}

impl Default for Env {
    fn default() -> Self { Self::with_values(DEFAULT_REQUEST_TIMEOUT, DEFAULT_REDIRECT_LIMIT) }
}

fn read_var<T: std::str::FromStr + PartialEq + Default>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?.parse::<T>().ok()?;
    (value != T::default()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let env = Env::default();
        assert_eq!(env.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(env.redirect_limit(), DEFAULT_REDIRECT_LIMIT);
        assert_eq!(env.wait_ceiling(), DEFAULT_REQUEST_TIMEOUT * 2);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let env = Env::with_values(30, 4);
        assert_eq!(env.request_timeout(), 30);
        assert_eq!(env.redirect_limit(), 4);
    }
}
