//! Framing and messages between the in-process relay and the observer.
//!
//! A connection starts with [`PROTOCOL_MAGIC`] (4 bytes, big endian), then
//! carries length-prefixed JSON frames, one [`ClientMessage`] each.

use callscope_types::{CallRecord, Json};
use facet::Facet;
use std::fmt;

/// Upper bound on one relayed message. A call record above this is refused
/// by the relay instead of being sent.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// `CSC1`, written once by the relay before its first frame.
pub const PROTOCOL_MAGIC: u32 = 0x4353_4331;

/// Routing target the observer files call records under.
pub const PANEL_TARGET: &str = "panel";

/// Width of the big-endian length header in front of every frame.
const LEN_HEADER: usize = 4;

/// A relay frame that cannot be written or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The relay tried to send a message over the frame limit.
    Oversized { len: usize, max: usize },
    /// The observer saw fewer bytes than a length header needs.
    MissingHeader { len: usize },
    /// A length header announced more than the observer accepts.
    AnnouncedTooLarge { len: usize, max: usize },
    /// The bytes after the header do not match the announced length.
    LengthMismatch { announced: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oversized { len, max } => {
                write!(f, "relay message of {len} bytes exceeds the {max} byte limit")
            }
            Self::MissingHeader { len } => {
                write!(f, "frame of {len} bytes has no length header")
            }
            Self::AnnouncedTooLarge { len, max } => {
                write!(f, "frame announces {len} bytes, observer accepts {max}")
            }
            Self::LengthMismatch { announced, actual } => {
                write!(f, "frame announces {announced} bytes but carries {actual}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug)]
pub enum WireError {
    Frame(FrameError),
    Json(String),
    MagicMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::MagicMismatch { expected, actual } => {
                write!(
                    f,
                    "not a callscope relay: expected magic 0x{expected:08x}, got 0x{actual:08x}"
                )
            }
        }
    }
}

impl std::error::Error for WireError {}

impl From<FrameError> for WireError {
    fn from(value: FrameError) -> Self {
        Self::Frame(value)
    }
}

/// Prepends the length header the observer reads before each message.
pub fn encode_frame(payload: &[u8], max_payload_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let oversized = FrameError::Oversized {
        len: payload.len(),
        max: max_payload_bytes,
    };
    if payload.len() > max_payload_bytes {
        return Err(oversized);
    }
    let announced = u32::try_from(payload.len()).map_err(|_| oversized)?;

    let mut frame = Vec::with_capacity(LEN_HEADER + payload.len());
    frame.extend_from_slice(&announced.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Validates a length header read off the relay socket and returns the
/// number of payload bytes that follow it.
pub fn frame_payload_len(
    header: [u8; LEN_HEADER],
    max_payload_bytes: usize,
) -> Result<usize, FrameError> {
    let announced = u32::from_be_bytes(header) as usize;
    if announced > max_payload_bytes {
        return Err(FrameError::AnnouncedTooLarge {
            len: announced,
            max: max_payload_bytes,
        });
    }
    Ok(announced)
}

/// Splits one complete frame into its payload.
pub fn decode_frame(frame: &[u8], max_payload_bytes: usize) -> Result<&[u8], FrameError> {
    let Some((header, payload)) = frame.split_first_chunk::<LEN_HEADER>() else {
        return Err(FrameError::MissingHeader { len: frame.len() });
    };
    let announced = frame_payload_len(*header, max_payload_bytes)?;
    if payload.len() != announced {
        return Err(FrameError::LengthMismatch {
            announced,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

pub fn encode_protocol_magic() -> [u8; 4] {
    PROTOCOL_MAGIC.to_be_bytes()
}

/// Checks the first four bytes of a connection.
pub fn decode_protocol_magic(bytes: [u8; 4]) -> Result<(), WireError> {
    let actual = u32::from_be_bytes(bytes);
    if actual != PROTOCOL_MAGIC {
        return Err(WireError::MagicMismatch {
            expected: PROTOCOL_MAGIC,
            actual,
        });
    }
    Ok(())
}

/// First message on every relay connection.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct Init {
    pub process_name: String,
    pub pid: u32,
}

/// One call record on its way to the observer.
///
/// `data` is the record as a structured value, embedded as-is in the frame.
#[derive(Facet, Debug, Clone, PartialEq)]
pub struct NetworkCall {
    pub target: String,
    pub data: Json,
}

impl NetworkCall {
    pub fn for_panel(data: Json) -> Self {
        Self {
            target: String::from(PANEL_TARGET),
            data,
        }
    }

    pub fn record(record: &CallRecord) -> Result<Self, WireError> {
        Json::encode(record)
            .map(Self::for_panel)
            .map_err(WireError::Json)
    }

    pub fn decode_record(&self) -> Result<CallRecord, WireError> {
        self.data.decode().map_err(WireError::Json)
    }
}

#[derive(Facet, Debug, Clone, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ClientMessage {
    Init(Init),
    NetworkCall(NetworkCall),
}

pub fn encode_client_message(
    message: &ClientMessage,
    max_payload_bytes: usize,
) -> Result<Vec<u8>, WireError> {
    let payload = facet_json::to_vec(message).map_err(|e| WireError::Json(e.to_string()))?;
    Ok(encode_frame(&payload, max_payload_bytes)?)
}

pub fn encode_client_message_default(message: &ClientMessage) -> Result<Vec<u8>, WireError> {
    encode_client_message(message, DEFAULT_MAX_FRAME_BYTES)
}

/// Decodes a frame payload (prefix already stripped).
pub fn decode_client_payload(payload: &[u8]) -> Result<ClientMessage, WireError> {
    facet_json::from_slice(payload).map_err(|e| WireError::Json(e.to_string()))
}

pub fn decode_client_message(
    frame: &[u8],
    max_payload_bytes: usize,
) -> Result<ClientMessage, WireError> {
    let payload = decode_frame(frame, max_payload_bytes)?;
    decode_client_payload(payload)
}

pub fn decode_client_message_default(frame: &[u8]) -> Result<ClientMessage, WireError> {
    decode_client_message(frame, DEFAULT_MAX_FRAME_BYTES)
}
