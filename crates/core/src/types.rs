//! Core types for Civitas.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Benefit identifier (bytes32 on-chain).
///
/// Rendered as `0x`-prefixed lowercase hex, which is also the primary key
/// of the `benefits` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BenefitId(pub B256);

impl BenefitId {
    /// Create a new BenefitId from a 32-byte value.
    pub const fn new(bytes: B256) -> Self {
        BenefitId(bytes)
    }

    /// Get the inner B256.
    pub const fn inner(&self) -> &B256 {
        &self.0
    }

    /// Canonical string form (store key and JSON value).
    pub fn to_key(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<B256> for BenefitId {
    fn from(b: B256) -> Self {
        BenefitId(b)
    }
}

impl From<[u8; 32]> for BenefitId {
    fn from(bytes: [u8; 32]) -> Self {
        BenefitId(B256::from(bytes))
    }
}

impl fmt::Display for BenefitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

impl FromStr for BenefitId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some(digits) = trimmed.strip_prefix("0x") else {
            return Err(CoreError::InvalidBenefitId(s.to_string()));
        };
        if digits.len() != 64 {
            return Err(CoreError::InvalidBenefitId(s.to_string()));
        }
        let bytes = hex::decode(digits).map_err(|_| CoreError::InvalidBenefitId(s.to_string()))?;
        Ok(BenefitId(B256::from_slice(&bytes)))
    }
}

impl Serialize for BenefitId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_key())
    }
}

impl<'de> Deserialize<'de> for BenefitId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a benefit.
///
/// Transitions are monotonic: `Issued -> Redeemed` or `Issued -> Expired`.
/// Both `Redeemed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenefitStatus {
    /// Issued and spendable.
    Issued,
    /// Redeemed by a vendor.
    Redeemed,
    /// Expired before redemption.
    Expired,
}

impl BenefitStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BenefitStatus::Issued => "Issued",
            BenefitStatus::Redeemed => "Redeemed",
            BenefitStatus::Expired => "Expired",
        }
    }

    /// Map the contract's `uint8 status` field.
    pub fn from_chain_code(code: u8) -> Result<Self, CoreError> {
        match code {
            0 => Ok(BenefitStatus::Issued),
            1 => Ok(BenefitStatus::Redeemed),
            2 => Ok(BenefitStatus::Expired),
            other => Err(CoreError::InvalidStatusCode(other)),
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BenefitStatus::Issued)
    }

    /// Validate a transition from `self` to `next`.
    ///
    /// Staying in the same state is accepted so re-applied events are no-ops.
    pub fn transition_to(self, next: BenefitStatus) -> Result<BenefitStatus, CoreError> {
        if self == next || !self.is_terminal() {
            return Ok(next);
        }
        Err(CoreError::InvalidTransition {
            from: self,
            to: next,
        })
    }
}

impl fmt::Display for BenefitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BenefitStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Issued" => Ok(BenefitStatus::Issued),
            "Redeemed" => Ok(BenefitStatus::Redeemed),
            "Expired" => Ok(BenefitStatus::Expired),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// Canonical store key for an address: `0x` + lowercase hex.
pub fn address_key(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Normalize a caller-supplied address string for lookups.
///
/// Path parameters are not required to be valid addresses; they are only
/// trimmed and lowercased so `0xAbC...` and `0xabc...` hit the same rows.
pub fn normalize_address(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn test_benefit_id_round_trip() {
        let id = BenefitId::from([0xabu8; 32]);
        let key = id.to_key();
        assert_eq!(key.len(), 66);
        assert!(key.starts_with("0xabab"));
        assert_eq!(key.parse::<BenefitId>().unwrap(), id);
        assert_eq!(id.to_string(), key);
    }

    #[test]
    fn test_benefit_id_rejects_bad_input() {
        assert!("abab".parse::<BenefitId>().is_err());
        assert!("0x1234".parse::<BenefitId>().is_err());
        assert!(format!("0x{}", "zz".repeat(32)).parse::<BenefitId>().is_err());
    }

    #[test]
    fn test_benefit_id_serde() {
        let id = BenefitId::from([0x01u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_key()));
        let back: BenefitId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_status_str_conversion() {
        for status in [
            BenefitStatus::Issued,
            BenefitStatus::Redeemed,
            BenefitStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<BenefitStatus>().unwrap(), status);
        }
        assert!("issued".parse::<BenefitStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&BenefitStatus::Redeemed).unwrap(),
            "\"Redeemed\""
        );
    }

    #[test]
    fn test_status_from_chain_code() {
        assert_eq!(
            BenefitStatus::from_chain_code(0).unwrap(),
            BenefitStatus::Issued
        );
        assert_eq!(
            BenefitStatus::from_chain_code(1).unwrap(),
            BenefitStatus::Redeemed
        );
        assert_eq!(
            BenefitStatus::from_chain_code(2).unwrap(),
            BenefitStatus::Expired
        );
        assert_eq!(
            BenefitStatus::from_chain_code(3),
            Err(CoreError::InvalidStatusCode(3))
        );
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use BenefitStatus::*;

        assert_eq!(Issued.transition_to(Redeemed), Ok(Redeemed));
        assert_eq!(Issued.transition_to(Expired), Ok(Expired));
        assert_eq!(Redeemed.transition_to(Redeemed), Ok(Redeemed));

        assert!(Redeemed.transition_to(Issued).is_err());
        assert!(Redeemed.transition_to(Expired).is_err());
        assert!(Expired.transition_to(Issued).is_err());
        assert!(Expired.transition_to(Redeemed).is_err());

        assert!(!Issued.is_terminal());
        assert!(Redeemed.is_terminal());
        assert!(Expired.is_terminal());
    }

    #[test]
    fn test_address_key_is_lowercase() {
        let addr = Address::from(hex!("AbCdEf0000000000000000000000000000000001"));
        assert_eq!(
            address_key(&addr),
            "0xabcdef0000000000000000000000000000000001"
        );
        assert_eq!(normalize_address(" 0xAbC "), "0xabc");
    }
}
