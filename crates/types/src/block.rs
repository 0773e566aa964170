//! Block structures for the account lattice.
//!
//! A [`Block`] is immutable once created; components share it through
//! `Arc<Block>`. The ledger attaches a [`BlockSideband`] (height,
//! balance, epoch, send flag) when the block is accepted, and downstream
//! consumers (elections, schedulers, observers) read it from the shared
//! reference.

use crate::{Account, Amount, BlockHash, Link, QualifiedRoot, Root, WorkNonce, WorkThresholds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Block type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Legacy send block
    Send,
    /// Legacy receive block
    Receive,
    /// First block of an account chain
    Open,
    /// Representative change block
    Change,
    /// Universal state block
    State,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Send => "send",
            BlockType::Receive => "receive",
            BlockType::Open => "open",
            BlockType::Change => "change",
            BlockType::State => "state",
        };
        write!(f, "{name}")
    }
}

/// Account upgrade epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Epoch {
    /// Original accounts
    Epoch0,
    /// First upgrade
    Epoch1,
    /// Second upgrade
    Epoch2,
}

impl Epoch {
    /// The most recent epoch.
    pub const MAX: Self = Epoch::Epoch2;

    /// The epoch following this one, if any.
    pub fn successor(&self) -> Option<Epoch> {
        match self {
            Epoch::Epoch0 => Some(Epoch::Epoch1),
            Epoch::Epoch1 => Some(Epoch::Epoch2),
            Epoch::Epoch2 => None,
        }
    }
}

/// The well-known link marking a state block as an epoch upgrade.
pub fn epoch_link(epoch: Epoch) -> Link {
    let mut bytes = [0u8; 32];
    bytes[..14].copy_from_slice(b"epoch upgrade ");
    bytes[31] = match epoch {
        Epoch::Epoch0 => 0,
        Epoch::Epoch1 => 1,
        Epoch::Epoch2 => 2,
    };
    Link::new(bytes)
}

/// Recovers the epoch from an epoch-upgrade link, if it is one.
pub fn epoch_from_link(link: &Link) -> Option<Epoch> {
    let bytes = link.as_bytes();
    if &bytes[..14] != b"epoch upgrade " || bytes[14..31].iter().any(|b| *b != 0) {
        return None;
    }
    match bytes[31] {
        0 => Some(Epoch::Epoch0),
        1 => Some(Epoch::Epoch1),
        2 => Some(Epoch::Epoch2),
        _ => None,
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch::Epoch0
    }
}

/// Classification flags attached by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockDetails {
    /// Epoch of the account chain at this block
    pub epoch: Epoch,
    /// Whether the block lowers the account balance
    pub is_send: bool,
    /// Whether the block receives pending funds
    pub is_receive: bool,
    /// Whether the block is an epoch upgrade
    pub is_epoch: bool,
}

/// Ledger metadata attached to a block once it has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSideband {
    /// Height of the block within its account chain (open = 1)
    pub height: u64,
    /// Ledger-observed timestamp, seconds since the unix epoch
    pub timestamp: u64,
    /// Owning account
    pub account: Account,
    /// Account balance after this block
    pub balance: Amount,
    /// Classification flags
    pub details: BlockDetails,
}

/// A 64-byte block signature.
///
/// Signature verification happens upstream of this crate; the type is
/// carried opaquely and only checked for presence.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// The absent signature.
    pub const ZERO: Self = Self([0u8; 64]);

    /// Creates a signature from raw bytes.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// A stand-in signature for locally created blocks and fixtures.
    pub const fn present() -> Self {
        Self([0x5a; 64])
    }

    /// Returns the signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks if the signature is absent.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..8]))
    }
}

/// An immutable block in the account lattice.
///
/// The hash is computed lazily over the content fields (work and
/// signature excluded) and cached. The sideband slot is written once by
/// the ledger when the block is accepted.
pub struct Block {
    block_type: BlockType,
    account: Account,
    previous: BlockHash,
    representative: Account,
    balance: Amount,
    link: Link,
    signature: Signature,
    work: WorkNonce,
    hash: OnceLock<BlockHash>,
    sideband: OnceLock<BlockSideband>,
}

impl Block {
    /// Creates a block from all content fields.
    pub fn new(
        block_type: BlockType,
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
        signature: Signature,
        work: WorkNonce,
    ) -> Self {
        Self {
            block_type,
            account,
            previous,
            representative,
            balance,
            link,
            signature,
            work,
            hash: OnceLock::new(),
            sideband: OnceLock::new(),
        }
    }

    /// Creates an open block: the first block of an account chain,
    /// receiving `source`.
    pub fn open(account: Account, representative: Account, balance: Amount, source: BlockHash) -> Self {
        Self::new(
            BlockType::Open,
            account,
            BlockHash::ZERO,
            representative,
            balance,
            Link::from(source),
            Signature::present(),
            WorkNonce::ZERO,
        )
    }

    /// Creates a state block.
    pub fn state(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
    ) -> Self {
        Self::new(
            BlockType::State,
            account,
            previous,
            representative,
            balance,
            link,
            Signature::present(),
            WorkNonce::ZERO,
        )
    }

    /// Creates a legacy send block.
    pub fn send(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        destination: Account,
    ) -> Self {
        Self::new(
            BlockType::Send,
            account,
            previous,
            representative,
            balance,
            Link::from(destination),
            Signature::present(),
            WorkNonce::ZERO,
        )
    }

    /// Creates a legacy receive block.
    pub fn receive(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        source: BlockHash,
    ) -> Self {
        Self::new(
            BlockType::Receive,
            account,
            previous,
            representative,
            balance,
            Link::from(source),
            Signature::present(),
            WorkNonce::ZERO,
        )
    }

    /// Creates a representative change block.
    pub fn change(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
    ) -> Self {
        Self::new(
            BlockType::Change,
            account,
            previous,
            representative,
            balance,
            Link::ZERO,
            Signature::present(),
            WorkNonce::ZERO,
        )
    }

    /// Returns a copy of this block with the given work nonce.
    ///
    /// The sideband is not carried over; only unprocessed blocks are
    /// expected to have their work replaced.
    pub fn with_work(&self, work: WorkNonce) -> Self {
        Self::new(
            self.block_type,
            self.account,
            self.previous,
            self.representative,
            self.balance,
            self.link,
            self.signature,
            work,
        )
    }

    /// Returns a copy of this block with the given signature.
    pub fn with_signature(&self, signature: Signature) -> Self {
        Self::new(
            self.block_type,
            self.account,
            self.previous,
            self.representative,
            self.balance,
            self.link,
            signature,
            self.work,
        )
    }

    /// Generates and attaches work valid for this block's root.
    pub fn work_for(&self, thresholds: &WorkThresholds) -> Self {
        self.with_work(thresholds.generate(&self.root()))
    }

    /// The block type.
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// The owning account.
    pub fn account(&self) -> Account {
        self.account
    }

    /// The previous block hash; zero for open blocks.
    pub fn previous(&self) -> BlockHash {
        self.previous
    }

    /// The representative named by this block.
    pub fn representative(&self) -> Account {
        self.representative
    }

    /// The balance after this block.
    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// The link field.
    pub fn link(&self) -> Link {
        self.link
    }

    /// The signature.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// The work nonce.
    pub fn work(&self) -> WorkNonce {
        self.work
    }

    /// The cached Keccak256 hash of the content fields.
    pub fn hash(&self) -> BlockHash {
        *self.hash.get_or_init(|| {
            BlockHash::digest(&[
                &[self.block_type as u8],
                self.account.as_bytes(),
                self.previous.as_bytes(),
                self.representative.as_bytes(),
                &self.balance.to_be_bytes(),
                self.link.as_bytes(),
            ])
        })
    }

    /// The root: `previous` for non-open blocks, the account otherwise.
    pub fn root(&self) -> Root {
        if self.previous.is_zero() {
            Root::from(self.account)
        } else {
            Root::from(self.previous)
        }
    }

    /// The `(root, previous)` pair identifying this block's position.
    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous)
    }

    /// The destination account for send blocks.
    pub fn destination(&self) -> Option<Account> {
        match self.block_type {
            BlockType::Send => Some(self.link.as_account()),
            BlockType::State if self.is_send() => Some(self.link.as_account()),
            _ => None,
        }
    }

    /// The source block hash for receiving blocks.
    pub fn source(&self) -> Option<BlockHash> {
        match self.block_type {
            BlockType::Receive | BlockType::Open => Some(self.link.as_block_hash()),
            BlockType::State if !self.link.is_zero() && !self.is_send() => {
                Some(self.link.as_block_hash())
            }
            _ => None,
        }
    }

    /// Whether this block lowers its account balance.
    ///
    /// For state blocks this is known only after the ledger attaches the
    /// sideband; unprocessed state blocks report `false`.
    pub fn is_send(&self) -> bool {
        match self.block_type {
            BlockType::Send => true,
            BlockType::State => self
                .sideband()
                .map(|sideband| sideband.details.is_send)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// The ledger-attached sideband, if this block has been processed.
    pub fn sideband(&self) -> Option<&BlockSideband> {
        self.sideband.get()
    }

    /// Attaches the sideband. Later writes are ignored; the first
    /// processing wins.
    pub fn set_sideband(&self, sideband: BlockSideband) {
        let _ = self.sideband.set(sideband);
    }

    /// Convenience wrapper returning `Arc<Block>`.
    pub fn into_shared(self) -> Arc<Block> {
        Arc::new(self)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("type", &self.block_type)
            .field("hash", &self.hash())
            .field("account", &self.account)
            .field("previous", &self.previous)
            .field("balance", &self.balance)
            .finish()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Block {}
