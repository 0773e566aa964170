//! Account identifiers.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of an account in bytes
pub const ACCOUNT_SIZE: usize = 32;

/// A 32-byte account public key.
///
/// Every account owns one chain of blocks in the lattice. The zero
/// account is the burn account; open blocks for it are rejected.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Account([u8; ACCOUNT_SIZE]);

impl Account {
    /// The zero (burn) account
    pub const ZERO: Self = Self([0u8; ACCOUNT_SIZE]);

    /// Creates an account from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; ACCOUNT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates an account from a slice.
    ///
    /// Returns an error if the slice length is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != ACCOUNT_SIZE {
            return Err(Error::InvalidLength {
                expected: ACCOUNT_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; ACCOUNT_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Returns the account as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the account as a fixed-size byte array.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; ACCOUNT_SIZE] {
        &self.0
    }

    /// Checks if this is the zero (burn) account.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Creates an account from its hex representation.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Returns the hex representation with 0x prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; ACCOUNT_SIZE]> for Account {
    fn from(bytes: [u8; ACCOUNT_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Account> for [u8; ACCOUNT_SIZE] {
    fn from(account: Account) -> Self {
        account.0
    }
}

impl AsRef<[u8]> for Account {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Account {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_account() {
        assert!(Account::ZERO.is_zero());
        assert!(!Account::from([1u8; 32]).is_zero());
    }

    #[test]
    fn test_account_hex_roundtrip() {
        let account = Account::from([0xabu8; 32]);
        let parsed = Account::from_hex(&account.to_hex()).unwrap();
        assert_eq!(account, parsed);
    }

    #[test]
    fn test_account_from_slice_length() {
        assert!(Account::from_slice(&[0u8; 31]).is_err());
        assert!(Account::from_slice(&[0u8; 32]).is_ok());
    }
}
