//! The ledger state machine.
//!
//! `process` applies one block against the account graph and reports a
//! [`BlockStatus`]; `rollback` undoes an unconfirmed branch; `confirm`
//! advances the confirmation frontier and returns every block it
//! implicitly cemented, dependencies first.

use crate::store::{
    AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, Store, Transaction,
    WriteTransaction,
};
use lattix_types::{
    epoch_from_link, Account, Amount, Block, BlockDetails, BlockHash, BlockSideband, BlockType,
    Epoch, QualifiedRoot, WorkThresholds,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Result of applying a block to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Block was accepted and appended
    Progress,
    /// The previous block is not in the ledger yet
    GapPrevious,
    /// The source block being received is not in the ledger yet
    GapSource,
    /// Epoch open block for an account with no known pending entries
    GapEpochOpenPending,
    /// The block is already in the ledger
    Old,
    /// Signature missing or invalid
    BadSignature,
    /// Send spends more than the available balance
    NegativeSpend,
    /// No matching receivable entry
    Unreceivable,
    /// The position at this qualified root is already taken
    Fork,
    /// Open block for the burn account
    OpenedBurnAccount,
    /// Declared balance does not match the computed balance
    BalanceMismatch,
    /// Representative changed where it must not
    RepresentativeMismatch,
    /// Malformed position in the chain (wrong type or epoch order)
    BlockPosition,
    /// Proof of work below the network threshold
    InsufficientWork,
}

impl BlockStatus {
    /// True for an accepted block.
    pub fn is_progress(&self) -> bool {
        matches!(self, BlockStatus::Progress)
    }

    /// True for gap statuses that park the block rather than reject it.
    pub fn is_gap(&self) -> bool {
        matches!(
            self,
            BlockStatus::GapPrevious | BlockStatus::GapSource | BlockStatus::GapEpochOpenPending
        )
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Progress => "progress",
            BlockStatus::GapPrevious => "gap_previous",
            BlockStatus::GapSource => "gap_source",
            BlockStatus::GapEpochOpenPending => "gap_epoch_open_pending",
            BlockStatus::Old => "old",
            BlockStatus::BadSignature => "bad_signature",
            BlockStatus::NegativeSpend => "negative_spend",
            BlockStatus::Unreceivable => "unreceivable",
            BlockStatus::Fork => "fork",
            BlockStatus::OpenedBurnAccount => "opened_burn_account",
            BlockStatus::BalanceMismatch => "balance_mismatch",
            BlockStatus::RepresentativeMismatch => "representative_mismatch",
            BlockStatus::BlockPosition => "block_position",
            BlockStatus::InsufficientWork => "insufficient_work",
        }
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from ledger operations that cannot be expressed as a
/// [`BlockStatus`].
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Rollback would undo a block at or below the confirmation height
    #[error("rollback of {hash} would undo a confirmed block")]
    RollbackConfirmed {
        /// The confirmed block that blocked the rollback
        hash: BlockHash,
    },

    /// The referenced block is not in the ledger
    #[error("block {hash} not found")]
    BlockNotFound {
        /// The missing hash
        hash: BlockHash,
    },
}

/// The account-graph ledger.
pub struct Ledger {
    store: Arc<Store>,
    thresholds: WorkThresholds,
    rep_weights: RwLock<HashMap<Account, Amount>>,
    cemented: AtomicU64,
}

impl Ledger {
    /// Creates a ledger over an empty store.
    pub fn new(store: Arc<Store>, thresholds: WorkThresholds) -> Self {
        Self {
            store,
            thresholds,
            rep_weights: RwLock::new(HashMap::new()),
            cemented: AtomicU64::new(0),
        }
    }

    /// Creates a ledger seeded with a genesis account owning `amount`.
    ///
    /// The genesis open block is inserted pre-confirmed; it is the only
    /// block that skips validation.
    pub fn with_genesis(
        store: Arc<Store>,
        thresholds: WorkThresholds,
        genesis_account: Account,
        amount: Amount,
    ) -> (Self, Arc<Block>) {
        let ledger = Self::new(store.clone(), thresholds);

        let genesis = Arc::new(Block::open(
            genesis_account,
            genesis_account,
            amount,
            BlockHash::new(*genesis_account.as_fixed_bytes()),
        ));
        genesis.set_sideband(BlockSideband {
            height: 1,
            timestamp: unix_seconds(),
            account: genesis_account,
            balance: amount,
            details: BlockDetails {
                epoch: Epoch::Epoch0,
                is_send: false,
                is_receive: true,
                is_epoch: false,
            },
        });

        let tx = store.tx_begin_write(&[
            crate::Table::Accounts,
            crate::Table::Blocks,
            crate::Table::Frontiers,
            crate::Table::Pending,
            crate::Table::ConfirmationHeight,
        ]);
        let hash = genesis.hash();
        tx.block_put(genesis.clone());
        tx.frontier_put(hash, genesis_account);
        tx.account_put(
            genesis_account,
            AccountInfo {
                head: hash,
                open_block: hash,
                representative: genesis_account,
                balance: amount,
                block_count: 1,
                epoch: Epoch::Epoch0,
            },
        );
        tx.confirmation_height_put(
            genesis_account,
            ConfirmationHeightInfo {
                height: 1,
                frontier: hash,
            },
        );
        drop(tx);

        ledger.add_weight(genesis_account, amount);
        ledger.cemented.store(1, Ordering::SeqCst);
        (ledger, genesis)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The network work thresholds this ledger validates against.
    pub fn thresholds(&self) -> &WorkThresholds {
        &self.thresholds
    }

    /// Applies one block. On `Progress` the block's sideband is
    /// attached and all tables are updated; every other status leaves
    /// the ledger untouched.
    pub fn process(&self, tx: &WriteTransaction, block: &Arc<Block>) -> BlockStatus {
        let hash = block.hash();
        if self.store.block_exists(&hash) {
            return BlockStatus::Old;
        }
        if !self.thresholds.validate(&block.root(), block.work()) {
            return BlockStatus::InsufficientWork;
        }
        if block.signature().is_zero() {
            return BlockStatus::BadSignature;
        }

        let status = if block.previous().is_zero() {
            self.process_open_position(tx, block)
        } else {
            self.process_chained(tx, block)
        };
        if status.is_progress() {
            debug!(hash = %hash, account = %block.account(), "processed block");
        }
        status
    }

    fn process_open_position(&self, tx: &WriteTransaction, block: &Arc<Block>) -> BlockStatus {
        let account = block.account();
        if account.is_zero() {
            return BlockStatus::OpenedBurnAccount;
        }
        if self.store.account_get(&account).is_some() {
            return BlockStatus::Fork;
        }
        if !matches!(block.block_type(), BlockType::Open | BlockType::State) {
            return BlockStatus::BlockPosition;
        }

        // Epoch open: upgrades an account that only has pending funds
        if block.block_type() == BlockType::State {
            if let Some(epoch) = epoch_from_link(&block.link()) {
                if !block.balance().is_zero() {
                    return BlockStatus::BalanceMismatch;
                }
                if block.representative() != Account::ZERO {
                    return BlockStatus::RepresentativeMismatch;
                }
                if !self.store.pending_any(&account) {
                    return BlockStatus::GapEpochOpenPending;
                }
                self.append(
                    tx,
                    block,
                    None,
                    BlockDetails {
                        epoch,
                        is_send: false,
                        is_receive: false,
                        is_epoch: true,
                    },
                );
                return BlockStatus::Progress;
            }
        }

        // Ordinary open: receives a pending send
        let source = block.link().as_block_hash();
        if source.is_zero() || !self.store.block_exists(&source) {
            return BlockStatus::GapSource;
        }
        let key = PendingKey {
            account,
            send_hash: source,
        };
        let Some(pending) = self.store.pending_get(&key) else {
            return BlockStatus::Unreceivable;
        };
        if block.balance() != pending.amount {
            return BlockStatus::BalanceMismatch;
        }

        tx.pending_del(&key);
        tx.reception_put(source, block.hash());
        self.append(
            tx,
            block,
            None,
            BlockDetails {
                epoch: pending.epoch,
                is_send: false,
                is_receive: true,
                is_epoch: false,
            },
        );
        BlockStatus::Progress
    }

    fn process_chained(&self, tx: &WriteTransaction, block: &Arc<Block>) -> BlockStatus {
        let account = block.account();
        let previous = block.previous();
        let Some(previous_block) = self.store.block_get(&previous) else {
            return BlockStatus::GapPrevious;
        };
        let prev_sideband = *previous_block
            .sideband()
            .expect("stored blocks carry sidebands");
        if prev_sideband.account != account {
            return BlockStatus::BlockPosition;
        }
        if self.store.successor_get(&previous).is_some() {
            return BlockStatus::Fork;
        }
        let info = self
            .store
            .account_get(&account)
            .expect("chained previous implies an open account");
        debug_assert_eq!(info.head, previous);
        let prev_balance = prev_sideband.balance;

        match block.block_type() {
            BlockType::Open => BlockStatus::BlockPosition,
            BlockType::Send => {
                if block.representative() != info.representative {
                    return BlockStatus::RepresentativeMismatch;
                }
                self.apply_send(tx, block, &info, prev_balance)
            }
            BlockType::Receive => {
                if block.representative() != info.representative {
                    return BlockStatus::RepresentativeMismatch;
                }
                self.apply_receive(tx, block, &info, prev_balance, block.link().as_block_hash())
            }
            BlockType::Change => {
                if block.balance() != prev_balance {
                    return BlockStatus::BalanceMismatch;
                }
                self.append(
                    tx,
                    block,
                    Some(&info),
                    BlockDetails {
                        epoch: info.epoch,
                        is_send: false,
                        is_receive: false,
                        is_epoch: false,
                    },
                );
                BlockStatus::Progress
            }
            BlockType::State => {
                if let Some(epoch) = epoch_from_link(&block.link()) {
                    if block.balance() != prev_balance {
                        return BlockStatus::BalanceMismatch;
                    }
                    if block.representative() != info.representative {
                        return BlockStatus::RepresentativeMismatch;
                    }
                    if info.epoch.successor() != Some(epoch) {
                        return BlockStatus::BlockPosition;
                    }
                    self.append(
                        tx,
                        block,
                        Some(&info),
                        BlockDetails {
                            epoch,
                            is_send: false,
                            is_receive: false,
                            is_epoch: true,
                        },
                    );
                    return BlockStatus::Progress;
                }
                if block.balance() < prev_balance {
                    self.apply_send(tx, block, &info, prev_balance)
                } else if block.balance() > prev_balance {
                    self.apply_receive(tx, block, &info, prev_balance, block.link().as_block_hash())
                } else if block.link().is_zero() {
                    // Representative change
                    self.append(
                        tx,
                        block,
                        Some(&info),
                        BlockDetails {
                            epoch: info.epoch,
                            is_send: false,
                            is_receive: false,
                            is_epoch: false,
                        },
                    );
                    BlockStatus::Progress
                } else {
                    BlockStatus::Unreceivable
                }
            }
        }
    }

    fn apply_send(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        info: &AccountInfo,
        prev_balance: Amount,
    ) -> BlockStatus {
        let Some(amount) = prev_balance.checked_sub(block.balance()) else {
            return BlockStatus::NegativeSpend;
        };
        let destination = block.link().as_account();
        tx.pending_put(
            PendingKey {
                account: destination,
                send_hash: block.hash(),
            },
            PendingInfo {
                source: block.account(),
                amount,
                epoch: info.epoch,
            },
        );
        self.append(
            tx,
            block,
            Some(info),
            BlockDetails {
                epoch: info.epoch,
                is_send: true,
                is_receive: false,
                is_epoch: false,
            },
        );
        BlockStatus::Progress
    }

    fn apply_receive(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        info: &AccountInfo,
        prev_balance: Amount,
        source: BlockHash,
    ) -> BlockStatus {
        if source.is_zero() || !self.store.block_exists(&source) {
            return BlockStatus::GapSource;
        }
        let key = PendingKey {
            account: block.account(),
            send_hash: source,
        };
        let Some(pending) = self.store.pending_get(&key) else {
            return BlockStatus::Unreceivable;
        };
        if block.balance() != prev_balance + pending.amount {
            return BlockStatus::BalanceMismatch;
        }
        tx.pending_del(&key);
        tx.reception_put(source, block.hash());
        self.append(
            tx,
            block,
            Some(info),
            BlockDetails {
                epoch: info.epoch.max(pending.epoch),
                is_send: false,
                is_receive: true,
                is_epoch: false,
            },
        );
        BlockStatus::Progress
    }

    /// Appends an accepted block: attaches the sideband and updates the
    /// account, frontier and weight tables. `info` is `None` for the
    /// first block of a chain.
    fn append(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        info: Option<&AccountInfo>,
        details: BlockDetails,
    ) -> BlockSideband {
        let account = block.account();
        let hash = block.hash();
        let height = info.map_or(1, |info| info.block_count + 1);
        let sideband = BlockSideband {
            height,
            timestamp: unix_seconds(),
            account,
            balance: block.balance(),
            details,
        };
        block.set_sideband(sideband);
        tx.block_put(block.clone());

        // Representative changes only through block types that carry one
        let representative = match block.block_type() {
            BlockType::Send | BlockType::Receive => {
                info.map_or_else(|| block.representative(), |info| info.representative)
            }
            _ => block.representative(),
        };

        if let Some(info) = info {
            tx.frontier_del(&info.head);
            self.sub_weight(info.representative, info.balance);
        }
        tx.frontier_put(hash, account);
        self.add_weight(representative, block.balance());

        tx.account_put(
            account,
            AccountInfo {
                head: hash,
                open_block: info.map_or(hash, |info| info.open_block),
                representative,
                balance: block.balance(),
                block_count: height,
                epoch: details.epoch,
            },
        );
        sideband
    }

    /// Rolls back the block and everything that depends on it,
    /// returning the removed blocks in removal order (frontier first).
    ///
    /// Fails without changing anything further when a dependent block
    /// is already confirmed.
    pub fn rollback(
        &self,
        tx: &WriteTransaction,
        hash: BlockHash,
    ) -> Result<Vec<Arc<Block>>, LedgerError> {
        if !self.store.block_exists(&hash) {
            return Err(LedgerError::BlockNotFound { hash });
        }
        let mut rolled_back = Vec::new();
        self.rollback_inner(tx, hash, &mut rolled_back)?;
        Ok(rolled_back)
    }

    fn rollback_inner(
        &self,
        tx: &WriteTransaction,
        hash: BlockHash,
        rolled_back: &mut Vec<Arc<Block>>,
    ) -> Result<(), LedgerError> {
        while self.store.block_exists(&hash) {
            let block = self.store.block_get(&hash).expect("checked above");
            let account = block.sideband().expect("stored sideband").account;
            let info = self.store.account_get(&account).expect("open account");
            let head = self
                .store
                .block_get(&info.head)
                .expect("head block present");
            let head_sideband = *head.sideband().expect("stored sideband");

            if self.store.confirmation_height_get(&account).height >= head_sideband.height {
                return Err(LedgerError::RollbackConfirmed {
                    hash: head.hash(),
                });
            }

            // A send whose funds were already received forces the
            // receiving branch out first
            if head.is_send() {
                if let Some(receive_hash) = self.store.reception_get(&head.hash()) {
                    self.rollback_inner(tx, receive_hash, rolled_back)?;
                }
            }

            self.undo_head(tx, &head, &info, head_sideband);
            rolled_back.push(head.clone());
        }
        Ok(())
    }

    fn undo_head(
        &self,
        tx: &WriteTransaction,
        head: &Arc<Block>,
        info: &AccountInfo,
        sideband: BlockSideband,
    ) {
        let account = sideband.account;
        let hash = head.hash();

        if head.is_send() {
            if let Some(destination) = head.destination() {
                tx.pending_del(&PendingKey {
                    account: destination,
                    send_hash: hash,
                });
            }
        }
        if sideband.details.is_receive {
            let source = head
                .source()
                .expect("receive blocks reference their source");
            let source_block = self.store.block_get(&source).expect("source present");
            let source_sideband = source_block.sideband().expect("stored sideband");
            let previous_balance = self.balance_before(head);
            tx.pending_put(
                PendingKey {
                    account,
                    send_hash: source,
                },
                PendingInfo {
                    source: source_sideband.account,
                    amount: sideband.balance - previous_balance,
                    epoch: source_sideband.details.epoch,
                },
            );
            tx.reception_del(&source);
        }

        tx.block_del(&hash);
        tx.frontier_del(&hash);
        self.sub_weight(info.representative, sideband.balance);

        if head.previous().is_zero() {
            tx.account_del(&account);
        } else {
            let previous = self
                .store
                .block_get(&head.previous())
                .expect("previous present");
            let previous_sideband = previous.sideband().expect("stored sideband");
            tx.frontier_put(previous.hash(), account);
            self.add_weight(previous_rep(&previous, info), previous_sideband.balance);
            tx.account_put(
                account,
                AccountInfo {
                    head: previous.hash(),
                    open_block: info.open_block,
                    representative: previous_rep(&previous, info),
                    balance: previous_sideband.balance,
                    block_count: previous_sideband.height,
                    epoch: previous_sideband.details.epoch,
                },
            );
        }
    }

    fn balance_before(&self, block: &Arc<Block>) -> Amount {
        if block.previous().is_zero() {
            Amount::ZERO
        } else {
            self.store
                .block_get(&block.previous())
                .and_then(|previous| previous.sideband().map(|sideband| sideband.balance))
                .unwrap_or(Amount::ZERO)
        }
    }

    /// Advances the confirmation height to cover `hash`, returning the
    /// newly cemented blocks, dependencies first. An already confirmed
    /// hash returns an empty list.
    pub fn confirm(&self, tx: &WriteTransaction, hash: BlockHash) -> Vec<Arc<Block>> {
        let mut cemented = Vec::new();
        self.confirm_inner(tx, hash, &mut cemented);
        self.cemented
            .fetch_add(cemented.len() as u64, Ordering::SeqCst);
        cemented
    }

    fn confirm_inner(&self, tx: &WriteTransaction, hash: BlockHash, cemented: &mut Vec<Arc<Block>>) {
        let Some(block) = self.store.block_get(&hash) else {
            return;
        };
        let sideband = *block.sideband().expect("stored sideband");
        let account = sideband.account;
        let current = self.store.confirmation_height_get(&account);
        if current.height >= sideband.height {
            return;
        }

        // Collect the unconfirmed span of this chain, oldest first
        let mut span = Vec::new();
        let mut cursor = block;
        loop {
            let cursor_sideband = *cursor.sideband().expect("stored sideband");
            if cursor_sideband.height <= current.height {
                break;
            }
            let previous = cursor.previous();
            span.push(cursor);
            if previous.is_zero() {
                break;
            }
            cursor = self.store.block_get(&previous).expect("chain intact");
        }

        for block in span.into_iter().rev() {
            // Received funds are only final once their source is
            if block
                .sideband()
                .expect("stored sideband")
                .details
                .is_receive
            {
                if let Some(source) = block.source() {
                    self.confirm_inner(tx, source, cemented);
                }
            }
            let block_sideband = *block.sideband().expect("stored sideband");
            tx.confirmation_height_put(
                account,
                ConfirmationHeightInfo {
                    height: block_sideband.height,
                    frontier: block.hash(),
                },
            );
            cemented.push(block);
        }
    }

    /// The block currently occupying a qualified root, if any.
    pub fn successor(&self, _tx: &dyn Transaction, root: &QualifiedRoot) -> Option<Arc<Block>> {
        if root.previous.is_zero() {
            let account = Account::new(*root.root.as_fixed_bytes());
            let info = self.store.account_get(&account)?;
            self.store.block_get(&info.open_block)
        } else {
            let successor = self.store.successor_get(&root.previous)?;
            self.store.block_get(&successor)
        }
    }

    /// The dependency key a receiving block is parked under when its
    /// source is missing.
    pub fn block_source(&self, block: &Arc<Block>) -> BlockHash {
        block
            .source()
            .unwrap_or_else(|| block.link().as_block_hash())
    }

    /// Whether a block's position dependencies (previous and source)
    /// are all confirmed.
    pub fn dependents_confirmed(&self, tx: &dyn Transaction, block: &Arc<Block>) -> bool {
        if !block.previous().is_zero() && !self.block_confirmed(tx, &block.previous()) {
            return false;
        }
        if let Some(sideband) = block.sideband() {
            if sideband.details.is_receive {
                if let Some(source) = block.source() {
                    return self.block_confirmed(tx, &source);
                }
            }
        }
        true
    }

    /// Whether a block is at or below its account's confirmation height.
    pub fn block_confirmed(&self, _tx: &dyn Transaction, hash: &BlockHash) -> bool {
        let Some(block) = self.store.block_get(hash) else {
            return false;
        };
        let sideband = block.sideband().expect("stored sideband");
        self.store.confirmation_height_get(&sideband.account).height >= sideband.height
    }

    /// A block by hash.
    pub fn block_get(&self, _tx: &dyn Transaction, hash: &BlockHash) -> Option<Arc<Block>> {
        self.store.block_get(hash)
    }

    /// Account metadata.
    pub fn account_info(&self, _tx: &dyn Transaction, account: &Account) -> Option<AccountInfo> {
        self.store.account_get(account)
    }

    /// Confirmation frontier of an account.
    pub fn confirmation_height(
        &self,
        _tx: &dyn Transaction,
        account: &Account,
    ) -> ConfirmationHeightInfo {
        self.store.confirmation_height_get(account)
    }

    /// The first unconfirmed block of an account, if any.
    pub fn next_unconfirmed(&self, tx: &dyn Transaction, account: &Account) -> Option<Arc<Block>> {
        let info = self.store.account_get(account)?;
        let confirmed = self.store.confirmation_height_get(account);
        if confirmed.height >= info.block_count {
            return None;
        }
        if confirmed.height == 0 {
            return self.store.block_get(&info.open_block);
        }
        let successor = self.store.successor_get(&confirmed.frontier)?;
        self.block_get(tx, &successor)
    }

    /// The amount a block transferred: the balance delta against its
    /// previous block.
    pub fn block_amount(&self, _tx: &dyn Transaction, hash: &BlockHash) -> Option<Amount> {
        let block = self.store.block_get(hash)?;
        let sideband = block.sideband()?;
        let before = self.balance_before(&block);
        Some(if sideband.balance >= before {
            sideband.balance - before
        } else {
            before - sideband.balance
        })
    }

    /// Voting weight delegated to a representative.
    pub fn weight(&self, representative: &Account) -> Amount {
        self.rep_weights
            .read()
            .get(representative)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    /// Total number of cemented blocks.
    pub fn cemented_count(&self) -> u64 {
        self.cemented.load(Ordering::SeqCst)
    }

    /// Total number of blocks in the ledger.
    pub fn block_count(&self) -> u64 {
        self.store.block_count() as u64
    }

    /// Number of open accounts.
    pub fn account_count(&self) -> u64 {
        self.store.account_count() as u64
    }

    fn add_weight(&self, representative: Account, amount: Amount) {
        let mut weights = self.rep_weights.write();
        *weights.entry(representative).or_insert(Amount::ZERO) += amount;
    }

    fn sub_weight(&self, representative: Account, amount: Amount) {
        let mut weights = self.rep_weights.write();
        if let Some(weight) = weights.get_mut(&representative) {
            *weight = weight.saturating_sub(amount);
        }
    }
}

fn previous_rep(previous: &Arc<Block>, info: &AccountInfo) -> Account {
    match previous.block_type() {
        BlockType::Send | BlockType::Receive => info.representative,
        _ => previous.representative(),
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
