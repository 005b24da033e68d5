//! Wire-level constants and fixed layouts of the XRootD protocol.
//!
//! Only the parts of the protocol the request lifecycle core must inspect or
//! rewrite are modelled here: the request and response header layouts, the
//! request opcodes, response status tags, server error codes, and the
//! `readahead_list` chunk header used by vectored reads. All multi-byte
//! integers are carried in network byte order.

use crate::byte_order::{
    read_network_u16,
    read_network_u32,
    read_network_u64,
    write_network_u16,
    write_network_u32,
    write_network_u64,
};

/// Length of a client request header: `streamid[2] | requestid[2] |
/// params[16] | dlen[4]`.
pub const REQUEST_HEADER_LEN: usize = 24;

/// Length of a server response header: `streamid[2] | status[2] | dlen[4]`.
pub const RESPONSE_HEADER_LEN: usize = 8;

/// Offset of the opcode-specific parameter words within a request header.
pub const REQUEST_PARAMS_OFFSET: usize = 4;

/// Offset of the `dlen` field within a request header.
pub const REQUEST_DLEN_OFFSET: usize = 20;

/// Offset of the variable body (usually a path plus CGI) within a request.
pub const REQUEST_BODY_OFFSET: usize = REQUEST_HEADER_LEN;

/// Refresh bit shared by `open`, `locate` and `dirlist` option words; forces
/// the server to bypass cached location data when a request is reissued.
pub const OPTION_REFRESH: u16 = 128;

/// Request opcodes.
///
/// The numeric values are the on-wire `requestid` codes from the 3000 range.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum RequestCode {
    Auth = 3000,
    Query = 3001,
    Chmod = 3002,
    Close = 3003,
    Dirlist = 3004,
    GpFile = 3005,
    Protocol = 3006,
    Login = 3007,
    Mkdir = 3008,
    Mv = 3009,
    Open = 3010,
    Ping = 3011,
    Chkpoint = 3012,
    Read = 3013,
    Rm = 3014,
    Rmdir = 3015,
    Sync = 3016,
    Stat = 3017,
    Set = 3018,
    Write = 3019,
    Fattr = 3020,
    Prepare = 3021,
    Statx = 3022,
    EndSess = 3023,
    Bind = 3024,
    ReadV = 3025,
    PgWrite = 3026,
    Locate = 3027,
    Truncate = 3028,
    SigVer = 3029,
    PgRead = 3030,
    WriteV = 3031,
}

impl RequestCode {
    /// Decode an opcode from its wire value.
    #[must_use]
    pub const fn from_wire(value: u16) -> Option<Self> {
        match value {
            3000 => Some(Self::Auth),
            3001 => Some(Self::Query),
            3002 => Some(Self::Chmod),
            3003 => Some(Self::Close),
            3004 => Some(Self::Dirlist),
            3005 => Some(Self::GpFile),
            3006 => Some(Self::Protocol),
            3007 => Some(Self::Login),
            3008 => Some(Self::Mkdir),
            3009 => Some(Self::Mv),
            3010 => Some(Self::Open),
            3011 => Some(Self::Ping),
            3012 => Some(Self::Chkpoint),
            3013 => Some(Self::Read),
            3014 => Some(Self::Rm),
            3015 => Some(Self::Rmdir),
            3016 => Some(Self::Sync),
            3017 => Some(Self::Stat),
            3018 => Some(Self::Set),
            3019 => Some(Self::Write),
            3020 => Some(Self::Fattr),
            3021 => Some(Self::Prepare),
            3022 => Some(Self::Statx),
            3023 => Some(Self::EndSess),
            3024 => Some(Self::Bind),
            3025 => Some(Self::ReadV),
            3026 => Some(Self::PgWrite),
            3027 => Some(Self::Locate),
            3028 => Some(Self::Truncate),
            3029 => Some(Self::SigVer),
            3030 => Some(Self::PgRead),
            3031 => Some(Self::WriteV),
            _ => None,
        }
    }

    /// The on-wire `requestid` value.
    #[must_use]
    pub const fn wire(self) -> u16 { self as u16 }

    /// Whether the request body carries a path (plus CGI) that redirect
    /// handling must rewrite.
    #[must_use]
    pub const fn is_path_bearing(self) -> bool {
        matches!(
            self,
            Self::Chmod
                | Self::Mkdir
                | Self::Mv
                | Self::Open
                | Self::Rm
                | Self::Rmdir
                | Self::Stat
                | Self::Truncate
        )
    }

    /// Whether the operation can be reissued at another endpoint without
    /// observable side effects.
    #[must_use]
    pub const fn is_idempotent(self) -> bool {
        matches!(
            self,
            Self::Query
                | Self::Dirlist
                | Self::Protocol
                | Self::Ping
                | Self::Read
                | Self::Stat
                | Self::Statx
                | Self::ReadV
                | Self::PgRead
                | Self::Locate
                | Self::Open
                | Self::Prepare
        )
    }

    /// Protocol name for logs and request descriptions.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auth => "kXR_auth",
            Self::Query => "kXR_query",
            Self::Chmod => "kXR_chmod",
            Self::Close => "kXR_close",
            Self::Dirlist => "kXR_dirlist",
            Self::GpFile => "kXR_gpfile",
            Self::Protocol => "kXR_protocol",
            Self::Login => "kXR_login",
            Self::Mkdir => "kXR_mkdir",
            Self::Mv => "kXR_mv",
            Self::Open => "kXR_open",
            Self::Ping => "kXR_ping",
            Self::Chkpoint => "kXR_chkpoint",
            Self::Read => "kXR_read",
            Self::Rm => "kXR_rm",
            Self::Rmdir => "kXR_rmdir",
            Self::Sync => "kXR_sync",
            Self::Stat => "kXR_stat",
            Self::Set => "kXR_set",
            Self::Write => "kXR_write",
            Self::Fattr => "kXR_fattr",
            Self::Prepare => "kXR_prepare",
            Self::Statx => "kXR_statx",
            Self::EndSess => "kXR_endsess",
            Self::Bind => "kXR_bind",
            Self::ReadV => "kXR_readv",
            Self::PgWrite => "kXR_pgwrite",
            Self::Locate => "kXR_locate",
            Self::Truncate => "kXR_truncate",
            Self::SigVer => "kXR_sigver",
            Self::PgRead => "kXR_pgread",
            Self::WriteV => "kXR_writev",
        }
    }
}

/// Response status tags carried in the server response header.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum ResponseStatus {
    Ok = 0,
    OkSoFar = 4000,
    Attn = 4001,
    AuthMore = 4002,
    Error = 4003,
    Redirect = 4004,
    Wait = 4005,
    WaitResp = 4006,
    Status = 4007,
}

impl ResponseStatus {
    /// Decode a status tag from its wire value.
    #[must_use]
    pub const fn from_wire(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            4000 => Some(Self::OkSoFar),
            4001 => Some(Self::Attn),
            4002 => Some(Self::AuthMore),
            4003 => Some(Self::Error),
            4004 => Some(Self::Redirect),
            4005 => Some(Self::Wait),
            4006 => Some(Self::WaitResp),
            4007 => Some(Self::Status),
            _ => None,
        }
    }

    /// The on-wire status value.
    #[must_use]
    pub const fn wire(self) -> u16 { self as u16 }

    /// Protocol name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "kXR_ok",
            Self::OkSoFar => "kXR_oksofar",
            Self::Attn => "kXR_attn",
            Self::AuthMore => "kXR_authmore",
            Self::Error => "kXR_error",
            Self::Redirect => "kXR_redirect",
            Self::Wait => "kXR_wait",
            Self::WaitResp => "kXR_waitresp",
            Self::Status => "kXR_status",
        }
    }
}

/// Server-originated error codes carried in the body of a `kXR_error`
/// response.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u32)]
pub enum ServerErrorCode {
    ArgInvalid = 3000,
    ArgMissing = 3001,
    ArgTooLong = 3002,
    FileLocked = 3003,
    FileNotOpen = 3004,
    FsError = 3005,
    InvalidRequest = 3006,
    IoError = 3007,
    NoMemory = 3008,
    NoSpace = 3009,
    NotAuthorized = 3010,
    NotFound = 3011,
    ServerError = 3012,
    Unsupported = 3013,
    NoServer = 3014,
    NotFile = 3015,
    IsDirectory = 3016,
    Cancelled = 3017,
    ItExists = 3018,
    ChkSumErr = 3019,
    InProgress = 3020,
    OverQuota = 3021,
}

impl ServerErrorCode {
    /// Decode a server error code from its wire value.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            3000 => Some(Self::ArgInvalid),
            3001 => Some(Self::ArgMissing),
            3002 => Some(Self::ArgTooLong),
            3003 => Some(Self::FileLocked),
            3004 => Some(Self::FileNotOpen),
            3005 => Some(Self::FsError),
            3006 => Some(Self::InvalidRequest),
            3007 => Some(Self::IoError),
            3008 => Some(Self::NoMemory),
            3009 => Some(Self::NoSpace),
            3010 => Some(Self::NotAuthorized),
            3011 => Some(Self::NotFound),
            3012 => Some(Self::ServerError),
            3013 => Some(Self::Unsupported),
            3014 => Some(Self::NoServer),
            3015 => Some(Self::NotFile),
            3016 => Some(Self::IsDirectory),
            3017 => Some(Self::Cancelled),
            3018 => Some(Self::ItExists),
            3019 => Some(Self::ChkSumErr),
            3020 => Some(Self::InProgress),
            3021 => Some(Self::OverQuota),
            _ => None,
        }
    }

    /// Whether a request that failed with this code may be retried at
    /// another endpoint.
    ///
    /// Argument and authorisation failures travel with the request, so a
    /// different server will reject them the same way; resource and
    /// server-side failures are worth another attempt.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::FileLocked
                | Self::FsError
                | Self::IoError
                | Self::NoMemory
                | Self::NoSpace
                | Self::ServerError
                | Self::NoServer
                | Self::InProgress
                | Self::OverQuota
        )
    }

    /// Short class tag recorded in the `triedrc=` CGI parameter.
    #[must_use]
    pub const fn tried_class(self) -> &'static str {
        match self {
            Self::NotFound => "enoent",
            Self::IoError => "ioerr",
            Self::FsError => "fserr",
            _ => "srverr",
        }
    }
}

/// Per-chunk header of a `kXR_readv` response payload (`readahead_list`).
///
/// Sixteen bytes on the wire: `handle[4] | rlen[4] | offset[8]`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadAheadList {
    /// File handle the chunk belongs to.
    pub handle: [u8; 4],
    /// Chunk length in bytes.
    pub rlen: u32,
    /// Chunk offset within the file.
    pub offset: u64,
}

impl ReadAheadList {
    /// Encoded length of the chunk header.
    pub const LEN: usize = 16;

    /// Decode a chunk header from exactly [`Self::LEN`] bytes.
    #[must_use]
    pub fn decode(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            handle: [bytes[0], bytes[1], bytes[2], bytes[3]],
            rlen: read_network_u32([bytes[4], bytes[5], bytes[6], bytes[7]]),
            offset: read_network_u64([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ]),
        }
    }

    /// Encode the chunk header into its wire representation.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.handle);
        out[4..8].copy_from_slice(&write_network_u32(self.rlen));
        out[8..16].copy_from_slice(&write_network_u64(self.offset));
        out
    }
}

/// Read the `streamid` bytes of a request or response header as a `u16`.
#[must_use]
pub fn stream_id(header: &[u8]) -> u16 { read_network_u16([header[0], header[1]]) }

/// Write the `streamid` bytes of a request or response header.
pub fn set_stream_id(header: &mut [u8], sid: u16) {
    header[0..2].copy_from_slice(&write_network_u16(sid));
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(RequestCode::Stat, 3017)]
    #[case(RequestCode::Open, 3010)]
    #[case(RequestCode::ReadV, 3025)]
    #[case(RequestCode::Truncate, 3028)]
    fn request_codes_match_wire_values(#[case] code: RequestCode, #[case] wire: u16) {
        assert_eq!(code.wire(), wire);
        assert_eq!(RequestCode::from_wire(wire), Some(code));
    }

    #[rstest]
    #[case(ResponseStatus::Ok, 0)]
    #[case(ResponseStatus::OkSoFar, 4000)]
    #[case(ResponseStatus::Wait, 4005)]
    #[case(ResponseStatus::Redirect, 4004)]
    fn response_statuses_match_wire_values(#[case] status: ResponseStatus, #[case] wire: u16) {
        assert_eq!(status.wire(), wire);
        assert_eq!(ResponseStatus::from_wire(wire), Some(status));
    }

    #[test]
    fn unknown_wire_values_decode_to_none() {
        assert_eq!(RequestCode::from_wire(42), None);
        assert_eq!(ResponseStatus::from_wire(1), None);
        assert_eq!(ServerErrorCode::from_wire(1), None);
    }

    #[rstest]
    #[case(RequestCode::Mv, true)]
    #[case(RequestCode::Stat, true)]
    #[case(RequestCode::Read, false)]
    #[case(RequestCode::Close, false)]
    fn path_bearing_covers_rewrite_set(#[case] code: RequestCode, #[case] expected: bool) {
        assert_eq!(code.is_path_bearing(), expected);
    }

    #[test]
    fn readahead_list_round_trips() {
        let header = ReadAheadList {
            handle: [1, 2, 3, 4],
            rlen: 0x0001_0000,
            offset: 0x0000_0001_0000_0000,
        };
        let wire = header.encode();
        assert_eq!(ReadAheadList::decode(&wire), header);
    }

    #[test]
    fn argument_errors_are_not_recoverable() {
        assert!(!ServerErrorCode::ArgInvalid.is_recoverable());
        assert!(!ServerErrorCode::NotFound.is_recoverable());
        assert!(ServerErrorCode::NoServer.is_recoverable());
        assert!(ServerErrorCode::IoError.is_recoverable());
    }
}
