#![doc(html_root_url = "https://docs.rs/xrootd-client/latest")]
//! Client-side request lifecycle core for the XRootD wire protocol.
//!
//! This crate drives a single application-level operation from submission
//! through transport, server interaction, and the final user callback: the
//! per-request message handler classifies inbound frames, streams raw
//! bodies without blocking, rewrites and resubmits on redirects and waits,
//! enforces absolute deadlines across retries, and assembles partial
//! responses into one result. Connection pooling, TLS, authentication and
//! the user-facing filesystem API are collaborators behind the traits in
//! [`transport`].

pub mod byte_order;
pub mod cgi;
pub mod clock;
pub mod config;
pub mod error;
pub use error::{Error, Result};
pub mod handler;
pub mod message;
pub mod messaging;
pub mod protocol;
pub mod redirector;
pub mod request;
pub mod response;
pub mod sid;
pub mod transport;
pub mod url;
pub mod xattr;

pub use handler::{HandlerState, MsgHandler, RedirectEntry};
pub use message::Message;
pub use messaging::{SendContext, SendParams, redirect_message, send_message};
pub use redirector::{RedirectorRegistry, VirtualRedirector};
pub use response::{
    Chunk,
    ChunkList,
    ChunkStatusEntry,
    HostInfo,
    HostList,
    ResponseBody,
    ResponseCallback,
    ResponseOutcome,
};
pub use transport::{
    ExamineAction,
    LocalFileHandler,
    RawProgress,
    RawSink,
    RawSource,
    StreamAction,
    StreamEvent,
    Transport,
};
pub use url::Url;
