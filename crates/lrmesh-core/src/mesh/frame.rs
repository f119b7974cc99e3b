//! Link and network frames and their text wire format
//!
//! Both layers use a human-readable record whose fields are joined by a
//! single reserved delimiter. The final `body` field is the unsplit
//! remainder of the record, so it may itself contain the delimiter (a link
//! CONTENT frame carries a whole encoded network frame as its body) as well
//! as newlines.
//!
//! ```text
//! Link frame:     SRC/SEQ/DST/TYPE/BODY
//! Network frame:  SRC/SEQ/DST/TYPE/HOPS/BODY
//! ```
//!
//! Addresses are `xx:xx:xx:xx:xx:xx`, SEQ and HOPS are plain unsigned
//! decimal. Anything else is rejected as malformed rather than defaulted.

use super::address::{AddressParseError, NicAddr};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Field delimiter shared by both wire formats
pub const DELIM: char = '/';

/// Per-node, per-layer frame sequence number
pub type SeqNo = u32;

/// Errors produced by the frame codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Record did not contain enough delimiter-bound fields
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    /// Record was not valid UTF-8 text
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    /// Source or destination field was not a hardware address
    #[error(transparent)]
    Address(#[from] AddressParseError),

    /// Type tag not known to this layer
    #[error("unknown frame type {0:?}")]
    UnknownType(String),

    /// Numeric field (sequence, hop limit, acknowledged sequence) failed to parse
    #[error("invalid {field}: {value:?}")]
    BadNumber { field: &'static str, value: String },

    /// Encoded frame exceeds the transport's maximum frame size
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    TooLarge { size: usize, max: usize },
}

/// Parse a plain unsigned decimal field
fn parse_decimal<T: FromStr>(field: &'static str, value: &str) -> Result<T, FrameError> {
    let bad = || FrameError::BadNumber {
        field,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    value.parse().map_err(|_| bad())
}

/// Parse the sequence number carried in the body of an ACK or NACK
pub fn parse_acked_seq(body: &str) -> Result<SeqNo, FrameError> {
    parse_decimal("acknowledged sequence", body)
}

fn check_size(size: usize, max: usize) -> Result<(), FrameError> {
    if size > max {
        Err(FrameError::TooLarge { size, max })
    } else {
        Ok(())
    }
}

/// Link-layer frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkFrameType {
    /// Carries an encoded network frame; acknowledged when unicast
    Content,
    /// Acknowledges a CONTENT frame; body is the acknowledged sequence
    Ack,
    /// Neighbour poll sent when no neighbours are known
    SoundOff,
    /// Reply to SOUND_OFF; exists only so the poller learns the replier
    OneTwo,
    /// Route-failure announcement; body is the affected destination
    FullReversal,
    /// Sent by the destination named in a FULL_REVERSAL
    Present,
    /// Optional periodic beacon
    Pulse,
}

impl LinkFrameType {
    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkFrameType::Content => "CONTENT",
            LinkFrameType::Ack => "ACK",
            LinkFrameType::SoundOff => "SOUND_OFF",
            LinkFrameType::OneTwo => "ONE_TWO",
            LinkFrameType::FullReversal => "FULL_REVERSAL",
            LinkFrameType::Present => "PRESENT",
            LinkFrameType::Pulse => "PULSE",
        }
    }
}

impl fmt::Display for LinkFrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkFrameType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONTENT" => LinkFrameType::Content,
            "ACK" => LinkFrameType::Ack,
            "SOUND_OFF" => LinkFrameType::SoundOff,
            "ONE_TWO" => LinkFrameType::OneTwo,
            "FULL_REVERSAL" => LinkFrameType::FullReversal,
            "PRESENT" => LinkFrameType::Present,
            "PULSE" => LinkFrameType::Pulse,
            other => return Err(FrameError::UnknownType(other.to_string())),
        })
    }
}

/// Network-layer frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFrameType {
    /// Application payload
    Content,
    /// End-to-end acknowledgement; body is the acknowledged sequence
    Ack,
    /// Hop limit ran out in transit; body is the failed sequence
    Nack,
}

impl NetworkFrameType {
    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkFrameType::Content => "CONTENT",
            NetworkFrameType::Ack => "ACK",
            NetworkFrameType::Nack => "NACK",
        }
    }
}

impl fmt::Display for NetworkFrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkFrameType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONTENT" => NetworkFrameType::Content,
            "ACK" => NetworkFrameType::Ack,
            "NACK" => NetworkFrameType::Nack,
            other => return Err(FrameError::UnknownType(other.to_string())),
        })
    }
}

/// One-hop frame exchanged between radio neighbours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Transmitting node
    pub source: NicAddr,
    /// Sender's link-layer sequence number
    pub seq: SeqNo,
    /// Intended one-hop receiver, or broadcast
    pub destination: NicAddr,
    /// Frame type
    pub frame_type: LinkFrameType,
    /// Unsplit remainder of the record
    pub body: String,
}

impl LinkFrame {
    /// Number of delimiter-bound fields before the body
    const HEADER_FIELDS: usize = 4;

    /// Create a new link frame
    pub fn new(
        source: NicAddr,
        seq: SeqNo,
        destination: NicAddr,
        frame_type: LinkFrameType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source,
            seq,
            destination,
            frame_type,
            body: body.into(),
        }
    }

    /// Check if this frame is addressed to `node` or to everyone
    pub fn is_for(&self, node: NicAddr) -> bool {
        self.destination.is_broadcast() || self.destination == node
    }

    /// Whether transmitting this frame arms a link-layer acknowledgement
    pub fn wants_ack(&self) -> bool {
        self.frame_type == LinkFrameType::Content && !self.destination.is_broadcast()
    }

    /// Render the wire text
    pub fn to_wire(&self) -> String {
        format!(
            "{src}{d}{seq}{d}{dst}{d}{ty}{d}{body}",
            src = self.source,
            seq = self.seq,
            dst = self.destination,
            ty = self.frame_type,
            body = self.body,
            d = DELIM
        )
    }

    /// Serialize without a size check
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire().into_bytes()
    }

    /// Serialize, failing if the result exceeds `max_size` bytes
    pub fn encode(&self, max_size: usize) -> Result<Vec<u8>, FrameError> {
        let bytes = self.to_bytes();
        check_size(bytes.len(), max_size)?;
        Ok(bytes)
    }

    /// Deserialize a received record
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        let fields: Vec<&str> = text.splitn(Self::HEADER_FIELDS + 1, DELIM).collect();
        if fields.len() != Self::HEADER_FIELDS + 1 {
            return Err(FrameError::FieldCount {
                expected: Self::HEADER_FIELDS + 1,
                found: fields.len(),
            });
        }

        Ok(Self {
            source: fields[0].parse()?,
            seq: parse_decimal("sequence", fields[1])?,
            destination: fields[2].parse()?,
            frame_type: fields[3].parse()?,
            body: fields[4].to_string(),
        })
    }

    /// Upper bound on the encoded size of a CONTENT frame with a body of
    /// `body_len` bytes, whatever its sequence number
    pub fn content_size_bound(body_len: usize) -> usize {
        const MAX_SEQ_DIGITS: usize = 10;
        2 * NicAddr::TEXT_LEN
            + MAX_SEQ_DIGITS
            + LinkFrameType::Content.as_str().len()
            + Self::HEADER_FIELDS
            + body_len
    }
}

/// Multi-hop frame routed end to end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFrame {
    /// Originating node
    pub source: NicAddr,
    /// Originator's network-layer sequence number
    pub seq: SeqNo,
    /// Final destination, or broadcast
    pub destination: NicAddr,
    /// Frame type
    pub frame_type: NetworkFrameType,
    /// Remaining relay budget
    pub hop_limit: u8,
    /// Unsplit remainder of the record
    pub body: String,
}

impl NetworkFrame {
    /// Number of delimiter-bound fields before the body
    const HEADER_FIELDS: usize = 5;

    /// Create a new network frame
    pub fn new(
        source: NicAddr,
        seq: SeqNo,
        destination: NicAddr,
        frame_type: NetworkFrameType,
        hop_limit: u8,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source,
            seq,
            destination,
            frame_type,
            hop_limit,
            body: body.into(),
        }
    }

    /// Check if this frame terminates at `node`
    pub fn is_for(&self, node: NicAddr) -> bool {
        self.destination.is_broadcast() || self.destination == node
    }

    /// Decrement hop limit, returns false if already zero
    pub fn decrement_hop_limit(&mut self) -> bool {
        if self.hop_limit > 0 {
            self.hop_limit -= 1;
            true
        } else {
            false
        }
    }

    /// Render the wire text
    pub fn to_wire(&self) -> String {
        format!(
            "{src}{d}{seq}{d}{dst}{d}{ty}{d}{hops}{d}{body}",
            src = self.source,
            seq = self.seq,
            dst = self.destination,
            ty = self.frame_type,
            hops = self.hop_limit,
            body = self.body,
            d = DELIM
        )
    }

    /// Serialize without a size check
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire().into_bytes()
    }

    /// Serialize, failing if the result exceeds `max_size` bytes
    pub fn encode(&self, max_size: usize) -> Result<Vec<u8>, FrameError> {
        let bytes = self.to_bytes();
        check_size(bytes.len(), max_size)?;
        Ok(bytes)
    }

    /// Deserialize a record
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        Self::decode_str(text)
    }

    /// Upper bound on the encoded size of a network frame with a body of
    /// `body_len` bytes, whatever its sequence, type or hop limit
    pub fn size_bound(body_len: usize) -> usize {
        const MAX_SEQ_DIGITS: usize = 10;
        const MAX_HOP_DIGITS: usize = 3;
        const MAX_TYPE_LEN: usize = 7;
        2 * NicAddr::TEXT_LEN
            + MAX_SEQ_DIGITS
            + MAX_TYPE_LEN
            + MAX_HOP_DIGITS
            + Self::HEADER_FIELDS
            + body_len
    }

    /// Deserialize a record already known to be text (a link frame body)
    pub fn decode_str(text: &str) -> Result<Self, FrameError> {
        let fields: Vec<&str> = text.splitn(Self::HEADER_FIELDS + 1, DELIM).collect();
        if fields.len() != Self::HEADER_FIELDS + 1 {
            return Err(FrameError::FieldCount {
                expected: Self::HEADER_FIELDS + 1,
                found: fields.len(),
            });
        }

        Ok(Self {
            source: fields[0].parse()?,
            seq: parse_decimal("sequence", fields[1])?,
            destination: fields[2].parse()?,
            frame_type: fields[3].parse()?,
            hop_limit: parse_decimal("hop limit", fields[4])?,
            body: fields[5].to_string(),
        })
    }
}
