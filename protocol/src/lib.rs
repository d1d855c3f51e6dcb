//! # Remote Console Wire Format
//!
//! Frame layout shared by everything in the workspace that speaks RCON, the
//! binary remote-console protocol used by Source-engine style game servers.
//!
//! ```text
//! +-----------+-----------+-------------+----------------+------+
//! | size: i32 | id: i32   | type: i32   | body (N bytes) | 0x00 | 0x00
//! +-----------+-----------+-------------+----------------+------+
//! ```
//!
//! All integers are little-endian. `size` counts every byte after the size
//! field itself, so the smallest legal value is 10 (id + type + the two
//! terminators of an empty body).
//!
//! ## Packet Types
//!
//! The type field is direction dependent: the value 2 means "execute
//! command" when a client sends it and "auth response" when a server sends
//! it. [`PacketType`] keeps the two apart, and decoding is split into
//! [`decode_request`] and [`decode_response`] accordingly.
//!
//! ## Fragmentation
//!
//! A server splits a long response into several `RESPONSE_VALUE` packets
//! carrying the same id. This crate decodes one frame at a time and marks a
//! frame as a final fragment when the server did not fill it to
//! [`FRAGMENT_SIZE`]. Reassembly belongs to the session that owns the
//! socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the leading size field.
pub const SIZE_FIELD_LEN: usize = 4;
/// Bytes counted by the size field besides the body: id, type and both terminators.
pub const PACKET_OVERHEAD: usize = 10;
/// Smallest complete frame: size field plus an empty packet.
pub const MIN_FRAME_LEN: usize = SIZE_FIELD_LEN + PACKET_OVERHEAD;
/// Largest size value a client may send.
pub const MAX_REQUEST_SIZE: usize = 4096;
/// Longest command or password that fits in one request.
pub const MAX_COMMAND_LEN: usize = MAX_REQUEST_SIZE - PACKET_OVERHEAD;
/// Size of a full response fragment; a packet this large may be followed by more.
pub const FRAGMENT_SIZE: usize = 4096;
/// Longest body a single response fragment carries.
pub const MAX_FRAGMENT_BODY: usize = FRAGMENT_SIZE - PACKET_OVERHEAD;
/// Largest size value accepted from a peer before the stream is declared corrupt.
pub const MAX_PACKET_SIZE: usize = 1 << 20;
/// Id a server puts in its auth response when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Packet kinds, resolved with the direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Client → server login carrying the password.
    Auth,
    /// Server → client login verdict.
    AuthResponse,
    /// Client → server command.
    ExecCommand,
    /// Server → client command output (possibly one of several fragments).
    ResponseValue,
}

impl PacketType {
    /// Numeric value written to the type field.
    pub fn code(self) -> i32 {
        match self {
            PacketType::Auth => SERVERDATA_AUTH,
            PacketType::AuthResponse => SERVERDATA_AUTH_RESPONSE,
            PacketType::ExecCommand => SERVERDATA_EXECCOMMAND,
            PacketType::ResponseValue => SERVERDATA_RESPONSE_VALUE,
        }
    }

    /// Resolves a type code read from a client-sent frame.
    pub fn from_request_code(code: i32) -> Result<Self, DecodeError> {
        match code {
            SERVERDATA_AUTH => Ok(PacketType::Auth),
            SERVERDATA_EXECCOMMAND => Ok(PacketType::ExecCommand),
            other => Err(DecodeError::UnknownPacketType(other)),
        }
    }

    /// Resolves a type code read from a server-sent frame.
    pub fn from_response_code(code: i32) -> Result<Self, DecodeError> {
        match code {
            SERVERDATA_AUTH_RESPONSE => Ok(PacketType::AuthResponse),
            SERVERDATA_RESPONSE_VALUE => Ok(PacketType::ResponseValue),
            other => Err(DecodeError::UnknownPacketType(other)),
        }
    }
}

/// A frame could not be built from the given payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("payload contains a NUL byte at offset {offset}")]
    InteriorNul { offset: usize },
}

/// A byte buffer is not a well-formed frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {len} bytes is shorter than the {min} byte minimum")]
    Truncated { len: usize, min: usize },

    #[error("declared packet size {declared} does not match the {available} bytes available")]
    LengthMismatch { declared: usize, available: usize },

    #[error("declared packet size {declared} is outside the accepted range")]
    SizeOutOfRange { declared: i32 },

    #[error("packet body is not NUL terminated")]
    MissingTerminator,

    #[error("unknown packet type {0}")]
    UnknownPacketType(i32),
}

/// A decoded client-sent frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: i32,
    pub kind: PacketType,
    pub body: String,
}

/// A decoded server-sent frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: i32,
    pub kind: PacketType,
    /// Raw body bytes. A fragment may end part way through a UTF-8 character,
    /// so text is only recovered once every fragment has been joined.
    pub body: Bytes,
    /// False when the packet filled a whole fragment and more may follow.
    pub is_final_fragment: bool,
}

impl Response {
    /// True for the server's "wrong password" verdict.
    pub fn is_auth_failure(&self) -> bool {
        self.kind == PacketType::AuthResponse && self.id == AUTH_FAILED_ID
    }

    /// Body as text, with invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Builds a command frame.
pub fn encode_request(id: i32, command: &str) -> Result<Bytes, EncodeError> {
    encode_request_frame(id, SERVERDATA_EXECCOMMAND, command)
}

/// Builds a login frame.
pub fn encode_auth(id: i32, password: &str) -> Result<Bytes, EncodeError> {
    encode_request_frame(id, SERVERDATA_AUTH, password)
}

/// Builds a server-side frame. Bodies longer than one fragment must be split by the caller.
pub fn encode_response(id: i32, kind: PacketType, body: &str) -> Result<Bytes, EncodeError> {
    encode_response_bytes(id, kind, body.as_bytes())
}

/// Builds a server-side frame from raw bytes, which need not end on a character boundary.
pub fn encode_response_bytes(id: i32, kind: PacketType, body: &[u8]) -> Result<Bytes, EncodeError> {
    encode_frame(id, kind.code(), body, MAX_FRAGMENT_BODY)
}

fn encode_request_frame(id: i32, code: i32, body: &str) -> Result<Bytes, EncodeError> {
    encode_frame(id, code, body.as_bytes(), MAX_COMMAND_LEN)
}

fn encode_frame(id: i32, code: i32, payload: &[u8], max_body: usize) -> Result<Bytes, EncodeError> {
    if payload.len() > max_body {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: max_body,
        });
    }
    // The body is NUL terminated on the wire, so an embedded NUL would silently truncate it
    if let Some(offset) = payload.iter().position(|&b| b == 0) {
        return Err(EncodeError::InteriorNul { offset });
    }

    let size = PACKET_OVERHEAD + payload.len();
    let mut buf = BytesMut::with_capacity(SIZE_FIELD_LEN + size);
    buf.put_i32_le(size as i32);
    buf.put_i32_le(id);
    buf.put_i32_le(code);
    buf.put_slice(payload);
    buf.put_u8(0);
    buf.put_u8(0);

    Ok(buf.freeze())
}

struct RawPacket<'a> {
    size: usize,
    id: i32,
    code: i32,
    body: &'a [u8],
}

fn check_declared_size(declared: i32) -> Result<usize, DecodeError> {
    if declared < PACKET_OVERHEAD as i32 || declared as usize > MAX_PACKET_SIZE {
        return Err(DecodeError::SizeOutOfRange { declared });
    }
    Ok(declared as usize)
}

fn parse_frame(frame: &[u8]) -> Result<RawPacket<'_>, DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::Truncated {
            len: frame.len(),
            min: MIN_FRAME_LEN,
        });
    }

    let mut cursor = frame;
    let size = check_declared_size(cursor.get_i32_le())?;
    if cursor.len() != size {
        return Err(DecodeError::LengthMismatch {
            declared: size,
            available: cursor.len(),
        });
    }

    let id = cursor.get_i32_le();
    let code = cursor.get_i32_le();
    let (body, terminators) = cursor.split_at(cursor.len() - 2);
    if terminators != [0, 0] {
        return Err(DecodeError::MissingTerminator);
    }

    Ok(RawPacket {
        size,
        id,
        code,
        body,
    })
}

/// Decodes exactly one server-sent frame.
pub fn decode_response(frame: &[u8]) -> Result<Response, DecodeError> {
    let raw = parse_frame(frame)?;
    let kind = PacketType::from_response_code(raw.code)?;

    Ok(Response {
        id: raw.id,
        kind,
        body: Bytes::copy_from_slice(raw.body),
        is_final_fragment: kind != PacketType::ResponseValue || raw.size < FRAGMENT_SIZE,
    })
}

/// Decodes exactly one client-sent frame.
pub fn decode_request(frame: &[u8]) -> Result<Request, DecodeError> {
    let raw = parse_frame(frame)?;

    Ok(Request {
        id: raw.id,
        kind: PacketType::from_request_code(raw.code)?,
        body: String::from_utf8_lossy(raw.body).into_owned(),
    })
}

/// Splits the first complete frame off the front of a receive buffer.
///
/// Returns `Ok(None)` and leaves the buffer untouched while the frame is
/// still incomplete, which is how partial socket reads are absorbed.
pub fn take_frame(buf: &mut BytesMut) -> Result<Option<BytesMut>, DecodeError> {
    if buf.len() < SIZE_FIELD_LEN {
        return Ok(None);
    }

    let declared = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let size = check_declared_size(declared)?;
    if buf.len() < SIZE_FIELD_LEN + size {
        return Ok(None);
    }

    Ok(Some(buf.split_to(SIZE_FIELD_LEN + size)))
}

/// Pulls the next complete server frame out of a receive buffer.
pub fn next_response(buf: &mut BytesMut) -> Result<Option<Response>, DecodeError> {
    take_frame(buf)?
        .map(|frame| decode_response(&frame))
        .transpose()
}

/// Pulls the next complete client frame out of a receive buffer.
pub fn next_request(buf: &mut BytesMut) -> Result<Option<Request>, DecodeError> {
    take_frame(buf)?
        .map(|frame| decode_request(&frame))
        .transpose()
}
