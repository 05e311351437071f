//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The 8-byte AMQP protocol header.
//!
//! Every upgrade step starts with both peers exchanging a header of the form
//!
//! ```text
//! +---+---+---+---+-------------+-------+-------+----------+
//! | A | M | Q | P | protocol-id | major | minor | revision |
//! +---+---+---+---+-------------+-------+-------+----------+
//! ```
//!
//! where the protocol id selects the layer being negotiated (0 = AMQP,
//! 2 = TLS, 3 = SASL).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding a protocol header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer than [`ProtocolHeader::SIZE`] bytes were available.
    #[error("protocol header too short: {len} bytes, expected 8")]
    TooShort {
        /// Number of bytes received
        len: usize,
    },

    /// The first four bytes were not `"AMQP"`.
    #[error("invalid protocol header magic {magic:02x?}")]
    BadMagic {
        /// The bytes found in place of the magic
        magic: [u8; 4],
    },

    /// The protocol id byte names no known layer.
    #[error("unknown protocol id {0}")]
    UnknownProtocolId(u8),
}

/// Identifies the layer a protocol header negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolId {
    /// Plain AMQP framing; the terminal layer.
    Amqp = 0,
    /// TLS upgrade request.
    Tls = 2,
    /// SASL upgrade request.
    Sasl = 3,
}

impl ProtocolId {
    /// Returns the wire value of this id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ProtocolId {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolId::Amqp),
            2 => Ok(ProtocolId::Tls),
            3 => Ok(ProtocolId::Sasl),
            other => Err(DecodeError::UnknownProtocolId(other)),
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolId::Amqp => f.write_str("amqp"),
            ProtocolId::Tls => f.write_str("tls"),
            ProtocolId::Sasl => f.write_str("sasl"),
        }
    }
}

/// A `major.minor.revision` protocol version.
///
/// Versions order lexicographically by their components, which is what the
/// acceptor relies on to find the closest supported version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Revision
    pub revision: u8,
}

impl ProtocolVersion {
    /// AMQP 1.0.0, the only version any layer currently defines.
    pub const V1_0_0: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

    /// Creates a version.
    pub const fn new(major: u8, minor: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// An immutable, decoded protocol header.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::protocol::{ProtocolHeader, ProtocolId, ProtocolVersion};
///
/// let header = ProtocolHeader::new(ProtocolId::Sasl, ProtocolVersion::V1_0_0);
/// let bytes = header.encode();
/// assert_eq!(&bytes, b"AMQP\x03\x01\x00\x00");
/// assert_eq!(ProtocolHeader::decode(&bytes).unwrap(), header);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolHeader {
    protocol_id: ProtocolId,
    version: ProtocolVersion,
}

impl ProtocolHeader {
    /// Encoded size of a header in bytes.
    pub const SIZE: usize = 8;

    /// Leading magic bytes.
    pub const MAGIC: [u8; 4] = *b"AMQP";

    /// Creates a header.
    pub const fn new(protocol_id: ProtocolId, version: ProtocolVersion) -> Self {
        Self {
            protocol_id,
            version,
        }
    }

    /// The protocol id.
    pub fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    /// The requested version.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Encodes the header into its 8-byte wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let m = Self::MAGIC;
        [
            m[0],
            m[1],
            m[2],
            m[3],
            self.protocol_id.as_u8(),
            self.version.major,
            self.version.minor,
            self.version.revision,
        ]
    }

    /// Decodes a header from the first 8 bytes of `bytes`.
    ///
    /// Trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::SIZE {
            return Err(DecodeError::TooShort { len: bytes.len() });
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != Self::MAGIC {
            return Err(DecodeError::BadMagic { magic });
        }
        let protocol_id = ProtocolId::try_from(bytes[4])?;
        Ok(Self {
            protocol_id,
            version: ProtocolVersion::new(bytes[5], bytes[6], bytes[7]),
        })
    }
}

impl fmt::Display for ProtocolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AMQP({} {})", self.protocol_id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        for id in [ProtocolId::Amqp, ProtocolId::Tls, ProtocolId::Sasl] {
            for version in [
                ProtocolVersion::V1_0_0,
                ProtocolVersion::new(1, 1, 0),
                ProtocolVersion::new(255, 254, 253),
            ] {
                let header = ProtocolHeader::new(id, version);
                assert_eq!(ProtocolHeader::decode(&header.encode()), Ok(header));
            }
        }
    }

    #[test]
    fn test_wire_layout() {
        let header = ProtocolHeader::new(ProtocolId::Tls, ProtocolVersion::new(1, 2, 3));
        assert_eq!(header.encode(), [b'A', b'M', b'Q', b'P', 2, 1, 2, 3]);
    }

    #[test]
    fn test_short_input_fails() {
        for len in 0..ProtocolHeader::SIZE {
            let bytes = &b"AMQP\x00\x01\x00\x00"[..len];
            assert_eq!(
                ProtocolHeader::decode(bytes),
                Err(DecodeError::TooShort { len })
            );
        }
    }

    #[test]
    fn test_bad_magic_fails() {
        let result = ProtocolHeader::decode(b"AMQX\x00\x01\x00\x00");
        assert!(matches!(result, Err(DecodeError::BadMagic { .. })));

        let result = ProtocolHeader::decode(b"HTTP/1.1");
        assert!(matches!(result, Err(DecodeError::BadMagic { .. })));
    }

    #[test]
    fn test_unknown_protocol_id_fails() {
        let result = ProtocolHeader::decode(b"AMQP\x01\x01\x00\x00");
        assert_eq!(result, Err(DecodeError::UnknownProtocolId(1)));
    }

    #[test]
    fn test_version_ordering() {
        assert!(ProtocolVersion::new(1, 0, 0) < ProtocolVersion::new(1, 0, 1));
        assert!(ProtocolVersion::new(1, 0, 9) < ProtocolVersion::new(1, 1, 0));
        assert!(ProtocolVersion::new(0, 9, 1) < ProtocolVersion::V1_0_0);
    }

    #[test]
    fn test_version_serde() {
        let json = serde_json::to_string(&ProtocolVersion::V1_0_0).unwrap();
        let back: ProtocolVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProtocolVersion::V1_0_0);
    }
}
