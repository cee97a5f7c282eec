/// Hidden service address system
///
/// Addresses are derived from the service's public keys, similar to Tor's
/// .onion addresses. This ensures authenticity and prevents impersonation.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use veilnet_common::RouterId;

/// A hidden service address (e.g., "abc123...xyz.veil")
///
/// Format: [base32-encoded-hash].veil
/// The hash is derived from the service's signing and encryption keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address([u8; 32]);

impl Address {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Reinterpret the address as a DHT key for closest-path selection
    pub fn to_router(&self) -> RouterId {
        RouterId::from_bytes(self.0)
    }

    /// Convert to a .veil hostname
    pub fn to_hostname(&self) -> String {
        format!("{}.veil", self.to_base32())
    }

    /// Convert to a base32 string (without the .veil suffix)
    pub fn to_base32(&self) -> String {
        data_encoding::BASE32_NOPAD.encode(&self.0).to_lowercase()
    }

    /// Parse from hostname (with or without the .veil suffix)
    pub fn from_hostname(hostname: &str) -> Result<Self, AddressError> {
        let hostname = hostname.trim().to_lowercase();

        let base32_part = if let Some(stripped) = hostname.strip_suffix(".veil") {
            stripped
        } else {
            &hostname
        };

        let bytes = data_encoding::BASE32_NOPAD
            .decode(base32_part.to_uppercase().as_bytes())
            .map_err(|_| AddressError::InvalidEncoding)?;

        if bytes.len() != 32 {
            return Err(AddressError::InvalidLength(bytes.len()));
        }

        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hostname())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hostname(s)
    }
}

/// Address errors
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid base32 encoding")]
    InvalidEncoding,

    #[error("Invalid address length: {0} (expected 32)")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let address = Address::from_bytes([42u8; 32]);
        let hostname = address.to_hostname();
        assert!(hostname.ends_with(".veil"));

        let parsed = Address::from_hostname(&hostname).unwrap();
        assert_eq!(address, parsed);
    }

    #[test]
    fn test_parse_with_and_without_suffix() {
        let address = Address::from_bytes([7u8; 32]);
        let parsed1: Address = address.to_base32().parse().unwrap();
        let parsed2: Address = address.to_hostname().parse().unwrap();
        assert_eq!(address, parsed1);
        assert_eq!(address, parsed2);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Address::from_hostname("not base32 at all!").is_err());
        assert!(Address::from_hostname("mfrgg.veil").is_err());
    }
}
