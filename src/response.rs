//! Response assembly and the typed results delivered to user callbacks.
//!
//! Servers may deliver a logical result as several `kXR_oksofar` segments
//! closed by a terminal `kXR_ok`; the assembler concatenates the partial
//! bodies in order. The typed parsers decode the merged payload according
//! to the opcode of the original request.

use crate::{
    byte_order::read_network_u32,
    error::{Error, Result},
    message::Message,
    protocol::RequestCode,
    request,
    url::Url,
    xattr::{self, XAttr},
};

/// A single read destination: `(offset, length, buffer)`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Chunk {
    /// File offset the chunk covers.
    pub offset: u64,
    /// Requested length in bytes.
    pub len: u32,
    /// Destination buffer, sized to `len`.
    pub buf: Vec<u8>,
}

impl Chunk {
    /// Create a chunk with a zeroed destination buffer of `len` bytes.
    #[must_use]
    pub fn new(offset: u64, len: u32) -> Self {
        Self {
            offset,
            len,
            buf: vec![0; len as usize],
        }
    }
}

/// Ordered list of read destinations.
pub type ChunkList = Vec<Chunk>;

/// Per-chunk completion record, parallel to the bound chunk list.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkStatusEntry {
    /// The server announced a different geometry for this chunk.
    pub size_error: bool,
    /// The chunk's payload was fully received.
    pub done: bool,
}

/// One endpoint visited while driving a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostInfo {
    /// The endpoint URL.
    pub url: Url,
    /// Whether this endpoint acts as the load balancer for the request.
    pub load_balancer: bool,
}

/// Append-only log of endpoints visited, first entry being the initial
/// target.
pub type HostList = Vec<HostInfo>;

/// Decoded `stat` information, space-delimited on the wire as
/// `size mode mtime flags`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatInfo {
    /// File size in bytes.
    pub size: u64,
    /// POSIX-style mode word.
    pub mode: u32,
    /// Last modification time, Unix seconds.
    pub mtime: u64,
    /// Server-specific status flags.
    pub flags: u32,
}

impl StatInfo {
    /// Parse the space-delimited wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when a field is missing or not numeric.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| Error::Protocol("stat body is not valid UTF-8".into()))?;
        let mut fields = text.split_whitespace();
        let size = parse_field(next_field(&mut fields, "size")?, "size")?;
        let mode = parse_field(next_field(&mut fields, "mode")?, "mode")?;
        let mtime = parse_field(next_field(&mut fields, "mtime")?, "mtime")?;
        let flags = parse_field(next_field(&mut fields, "flags")?, "flags")?;
        Ok(Self {
            size,
            mode,
            mtime,
            flags,
        })
    }
}

fn next_field<'a>(fields: &mut std::str::SplitWhitespace<'a>, name: &str) -> Result<&'a str> {
    fields
        .next()
        .ok_or_else(|| Error::Protocol(format!("stat body lacks {name}")))
}

fn parse_field<T: std::str::FromStr>(field: &str, name: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| Error::Protocol(format!("stat field {name} is not numeric: {field}")))
}

/// Decoded `open` information: the file handle plus optional stat text.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OpenInfo {
    /// Opaque 4-byte file handle.
    pub handle: [u8; 4],
    /// Stat information, present when the request asked for it.
    pub stat: Option<StatInfo>,
}

impl OpenInfo {
    /// Parse the open response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the body is shorter than the
    /// 4-byte handle.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(Error::Protocol("open response lacks a file handle".into()));
        }
        let handle = [body[0], body[1], body[2], body[3]];
        let stat = StatInfo::parse(&body[4..]).ok();
        Ok(Self { handle, stat })
    }
}

/// Decoded directory listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DirectoryListing {
    /// Entry names in server order.
    pub entries: Vec<String>,
}

impl DirectoryListing {
    /// Parse a newline-separated listing body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the body is not valid UTF-8.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| Error::Protocol("dirlist body is not valid UTF-8".into()))?;
        let entries = text
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self { entries })
    }
}

/// Node flavour reported by a locate response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocationKind {
    /// A manager holding authoritative location data.
    Manager,
    /// A manager still resolving the query.
    ManagerPending,
    /// A data server.
    Server,
    /// A data server still staging the file.
    ServerPending,
}

/// Access mode reported by a locate response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocationAccess {
    /// Read-only access.
    Read,
    /// Read-write access.
    ReadWrite,
}

/// One location entry from a `kXR_locate` response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    /// Node flavour.
    pub kind: LocationKind,
    /// Granted access mode.
    pub access: LocationAccess,
    /// `host:port` address of the node.
    pub address: String,
}

/// Decoded locate response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LocationInfo {
    /// Known locations, in server preference order.
    pub locations: Vec<Location>,
}

impl LocationInfo {
    /// Parse the space-separated locate body; each token is two flavour
    /// characters followed by an address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on unknown flavour characters or
    /// malformed tokens.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| Error::Protocol("locate body is not valid UTF-8".into()))?;
        let mut locations = Vec::new();
        for token in text.split_whitespace() {
            let mut chars = token.chars();
            let kind = match chars.next() {
                Some('M') => LocationKind::Manager,
                Some('m') => LocationKind::ManagerPending,
                Some('S') => LocationKind::Server,
                Some('s') => LocationKind::ServerPending,
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown locate node flavour: {other:?}"
                    )));
                }
            };
            let access = match chars.next() {
                Some('r') => LocationAccess::Read,
                Some('w') => LocationAccess::ReadWrite,
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown locate access flavour: {other:?}"
                    )));
                }
            };
            let address: String = chars.collect();
            if address.is_empty() {
                return Err(Error::Protocol(format!("locate entry lacks address: {token}")));
            }
            locations.push(Location {
                kind,
                access,
                address,
            });
        }
        Ok(Self { locations })
    }
}

/// Result of a single `kXR_read`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadInfo {
    /// Bytes actually read.
    pub len: u32,
    /// The filled destination buffer, truncated to `len`.
    pub data: Vec<u8>,
}

/// Result of a `kXR_readv`, carrying the filled chunk buffers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VectorReadInfo {
    /// Total bytes placed into chunk buffers.
    pub total: u32,
    /// The chunks, each buffer filled to its requested length.
    pub chunks: ChunkList,
}

/// Typed result delivered to the user callback.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ResponseBody {
    /// Operation succeeded without a decodable payload.
    None,
    /// `kXR_stat` / `kXR_statx` result.
    Stat(StatInfo),
    /// `kXR_open` result.
    Open(OpenInfo),
    /// `kXR_dirlist` result.
    DirList(DirectoryListing),
    /// `kXR_locate` result.
    Locate(LocationInfo),
    /// `kXR_query` raw payload.
    Query(Vec<u8>),
    /// `kXR_read` result.
    Read(ReadInfo),
    /// `kXR_readv` result.
    VectorRead(VectorReadInfo),
    /// `kXR_fattr` result.
    XAttr(Vec<XAttr>),
    /// Redirect delivered as the final answer.
    Redirect(Url),
    /// Undecoded payload for opcodes without a typed parser.
    Raw(Vec<u8>),
}

/// Everything handed to the user callback on the terminal transition.
#[derive(Debug)]
pub struct ResponseOutcome {
    /// Final result or surfaced failure.
    pub result: Result<ResponseBody>,
    /// Endpoints visited, first entry being the initial target.
    pub hosts: HostList,
}

/// User completion callback; invoked exactly once per submitted request.
pub type ResponseCallback = Box<dyn FnOnce(ResponseOutcome) + Send + 'static>;

/// Concatenate `kXR_oksofar` partial bodies with the terminal body, order
/// preserved.
#[must_use]
pub fn assemble_body(partials: &[Message], terminal: &Message) -> Vec<u8> {
    let total: usize = partials
        .iter()
        .map(|msg| msg.response_body().len())
        .sum::<usize>()
        + terminal.response_body().len();
    let mut out = Vec::with_capacity(total);
    for partial in partials {
        out.extend_from_slice(partial.response_body());
    }
    out.extend_from_slice(terminal.response_body());
    out
}

/// Decode the merged payload according to the request opcode.
///
/// Read-family opcodes are handled by the raw readers and never reach this
/// parser.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the payload does not decode.
pub fn parse_response(request: &Message, body: &[u8]) -> Result<ResponseBody> {
    let Some(code) = request.request_code() else {
        return Ok(ResponseBody::Raw(body.to_vec()));
    };
    match code {
        RequestCode::Stat | RequestCode::Statx => StatInfo::parse(body).map(ResponseBody::Stat),
        RequestCode::Open => OpenInfo::parse(body).map(ResponseBody::Open),
        RequestCode::Dirlist => DirectoryListing::parse(body).map(ResponseBody::DirList),
        RequestCode::Locate => LocationInfo::parse(body).map(ResponseBody::Locate),
        RequestCode::Query => Ok(ResponseBody::Query(body.to_vec())),
        RequestCode::Fattr => {
            let count = usize::from(request::fattr_numattr(request));
            xattr::decode_attr_vec(body, count).map(ResponseBody::XAttr)
        }
        _ if body.is_empty() => Ok(ResponseBody::None),
        _ => Ok(ResponseBody::Raw(body.to_vec())),
    }
}

/// Read the leading network-order `u32` of a response body, used by the
/// wait, error and redirect payloads.
#[must_use]
pub fn leading_u32(body: &[u8]) -> Option<u32> {
    if body.len() < 4 {
        return None;
    }
    Some(read_network_u32([body[0], body[1], body[2], body[3]]))
}
