//! Node interface addresses
//!
//! Every node is identified by the hardware address of its wireless
//! interface. Addresses are totally ordered by their bytes, which also
//! matches the ordering of their textual form since every octet is
//! rendered as exactly two lower-case hex digits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an address from text fails
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hardware address: {0:?}")]
pub struct AddressParseError(pub String);

/// 6-byte hardware address of a node's interface
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NicAddr([u8; 6]);

impl NicAddr {
    /// Broadcast address: "all neighbours" / "unknown destination"
    pub const BROADCAST: NicAddr = NicAddr([0xFF; 6]);

    /// Create an address from raw bytes
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        NicAddr(bytes)
    }

    /// Address of the `n`th simulated node: `01:00:00:00:00:nn`-style,
    /// with the node number in the low 32 bits.
    pub fn from_index(n: u32) -> Self {
        let low = n.to_be_bytes();
        NicAddr([0x01, 0x00, low[0], low[1], low[2], low[3]])
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Length of the textual form, in bytes
    pub const TEXT_LEN: usize = 17;
}

impl fmt::Debug for NicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NicAddr({})", self)
    }
}

impl fmt::Display for NicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for NicAddr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        if s.len() != Self::TEXT_LEN {
            return Err(err());
        }

        let mut bytes = [0u8; 6];
        let mut octets = s.split(':');
        for byte in bytes.iter_mut() {
            let octet = octets.next().ok_or_else(err)?;
            if octet.len() != 2 || !octet.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(err());
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| err())?;
        }
        if octets.next().is_some() {
            return Err(err());
        }
        Ok(NicAddr(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_text() {
        assert_eq!(NicAddr::BROADCAST.to_string(), "ff:ff:ff:ff:ff:ff");
        assert!(NicAddr::BROADCAST.is_broadcast());
        assert!(!NicAddr::from_index(1).is_broadcast());
    }

    #[test]
    fn test_parse() {
        let addr: NicAddr = "01:00:00:00:00:2a".parse().unwrap();
        assert_eq!(addr, NicAddr::from_index(42));
        assert_eq!(addr.to_string(), "01:00:00:00:00:2a");

        // Upper-case hex is accepted on input
        let upper: NicAddr = "01:00:00:00:00:2A".parse().unwrap();
        assert_eq!(upper, addr);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in [
            "",
            "01:00:00:00:00",
            "01:00:00:00:00:2a:",
            "01-00-00-00-00-2a",
            "0g:00:00:00:00:00",
            "+1:00:00:00:00:00",
        ] {
            assert!(bad.parse::<NicAddr>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_ordering_matches_text() {
        let a = NicAddr::from_index(9);
        let b = NicAddr::from_index(10);
        let c = NicAddr::from_index(300);
        assert!(a < b && b < c);
        assert!(a.to_string() < b.to_string() && b.to_string() < c.to_string());
    }
}
