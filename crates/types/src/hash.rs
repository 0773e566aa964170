//! 32-byte identifier types.
//!
//! This module provides [`BlockHash`], [`Root`] and [`Link`], the 32-byte
//! values that identify blocks and positions in the block lattice, plus
//! [`QualifiedRoot`], the fork-detection key.

use crate::{Account, Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Size of a hash in bytes
pub const HASH_SIZE: usize = 32;

/// A 32-byte block hash.
///
/// Computed with Keccak256 over the block contents. The zero hash marks
/// "no previous block" in open blocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockHash([u8; HASH_SIZE]);

/// The root of a block: either its `previous` hash, or, for the first
/// block of an account chain, the account itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Root([u8; HASH_SIZE]);

/// The link field of a block: the destination account for sends, the
/// source block hash for receives, zero otherwise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Link([u8; HASH_SIZE]);

/// Identifier for an election: the `(root, previous)` pair.
///
/// Two blocks conflict (fork) iff they share a qualified root but have
/// different hashes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct QualifiedRoot {
    /// The block root
    pub root: Root,
    /// The previous block hash (zero for open blocks)
    pub previous: BlockHash,
}

impl BlockHash {
    /// The zero hash
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// Creates a hash from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a hash from a slice.
    ///
    /// Returns an error if the slice length is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != HASH_SIZE {
            return Err(Error::InvalidLength {
                expected: HASH_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Computes the Keccak256 digest of multiple data slices.
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Keccak256::new();
        for part in parts {
            hasher.update(part);
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    /// Returns the hash as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a fixed-size byte array.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Checks if this is the zero hash.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Creates a hash from its hex representation, with or without a
    /// `0x` prefix.
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

impl Root {
    /// The zero root
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// Creates a root from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the root as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the root as a fixed-size byte array.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Checks if this is the zero root.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }
}

impl Link {
    /// The zero link
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// Creates a link from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the link as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks if this is the zero link.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Interprets the link as a destination account (send blocks).
    #[inline]
    pub fn as_account(&self) -> Account {
        Account::from(self.0)
    }

    /// Interprets the link as a source block hash (receive blocks).
    #[inline]
    pub fn as_block_hash(&self) -> BlockHash {
        BlockHash::new(self.0)
    }
}

impl QualifiedRoot {
    /// Creates a qualified root from its two components.
    pub const fn new(root: Root, previous: BlockHash) -> Self {
        Self { root, previous }
    }
}

/// A 32-byte value that is either a block hash or an account, used as
/// the dependency key of parked (unchecked) blocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashOrAccount([u8; HASH_SIZE]);

impl HashOrAccount {
    /// Creates a dependency key from raw bytes.
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<BlockHash> for HashOrAccount {
    fn from(hash: BlockHash) -> Self {
        Self(hash.0)
    }
}

impl From<Root> for HashOrAccount {
    fn from(root: Root) -> Self {
        Self(root.0)
    }
}

impl From<Account> for HashOrAccount {
    fn from(account: Account) -> Self {
        Self(*account.as_fixed_bytes())
    }
}

impl From<Link> for HashOrAccount {
    fn from(link: Link) -> Self {
        Self(link.0)
    }
}

impl fmt::Debug for HashOrAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashOrAccount(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for HashOrAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; HASH_SIZE]> for BlockHash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<BlockHash> for [u8; HASH_SIZE] {
    fn from(hash: BlockHash) -> Self {
        hash.0
    }
}

impl From<[u8; HASH_SIZE]> for Root {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<BlockHash> for Root {
    fn from(hash: BlockHash) -> Self {
        Self(hash.0)
    }
}

impl From<Account> for Root {
    fn from(account: Account) -> Self {
        Self(*account.as_fixed_bytes())
    }
}

impl From<[u8; HASH_SIZE]> for Link {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Account> for Link {
    fn from(account: Account) -> Self {
        Self(*account.as_fixed_bytes())
    }
}

impl From<BlockHash> for Link {
    fn from(hash: BlockHash) -> Self {
        Self(hash.0)
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link(0x{})", hex::encode(self.0))
    }
}

impl fmt::Debug for QualifiedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QualifiedRoot(0x{}, 0x{})",
            hex::encode(self.root.0),
            hex::encode(self.previous.0)
        )
    }
}

impl fmt::Display for QualifiedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}:0x{}",
            hex::encode(self.root.0),
            hex::encode(self.previous.0)
        )
    }
}

impl FromStr for BlockHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for BlockHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
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
    fn test_zero_hash() {
        let zero = BlockHash::ZERO;
        assert!(zero.is_zero());
        assert_eq!(
            zero.to_hex(),
            "0x0000000000000000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_hash_from_hex() {
        let hex_str = "0x47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad";
        let hash = BlockHash::from_hex(hex_str).unwrap();
        assert_eq!(hash.to_hex(), hex_str);

        // Without 0x prefix
        let hash2 = BlockHash::from_hex(&hex_str[2..]).unwrap();
        assert_eq!(hash, hash2);
    }

    #[test]
    fn test_invalid_hash() {
        assert!(BlockHash::from_hex("0x1234").is_err());
        assert!(BlockHash::from_hex(&format!("0x{}", "aa".repeat(33))).is_err());
        assert!(BlockHash::from_hex(&format!("0x{}", "gg".repeat(32))).is_err());
    }

    #[test]
    fn test_digest_is_stable() {
        let a = BlockHash::digest(&[b"hello", b" ", b"world"]);
        let b = BlockHash::digest(&[b"hello world"]);
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_qualified_root_equality() {
        let root = Root::from([1u8; 32]);
        let previous = BlockHash::from([2u8; 32]);
        let a = QualifiedRoot::new(root, previous);
        let b = QualifiedRoot::new(root, previous);
        let c = QualifiedRoot::new(root, BlockHash::ZERO);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_link_conversions() {
        let link = Link::from([9u8; 32]);
        assert_eq!(link.as_account().as_fixed_bytes(), &[9u8; 32]);
        assert_eq!(link.as_block_hash().as_fixed_bytes(), &[9u8; 32]);
    }

    #[test]
    fn test_hash_serde_roundtrip() {
        let hash = BlockHash::digest(&[b"test"]);
        let json = serde_json::to_string(&hash).unwrap();
        let decoded: BlockHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }
}
