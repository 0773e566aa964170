//! Multi-table store with logical transactions.
//!
//! The store keeps the ledger tables in memory behind one lock and
//! exposes the transaction contract the rest of the node is written
//! against: `tx_begin_read()` for consistent point reads and
//! `tx_begin_write(tables)` for mutation scopes. Write exclusivity
//! across subsystems is provided by the [`crate::WriteQueue`]; the
//! store additionally enforces that at most one write transaction is
//! open at a time.

use lattix_core::ContainerInfo;
use lattix_types::{Account, Amount, Block, BlockHash, Epoch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ledger tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Account frontier and metadata
    Accounts,
    /// Blocks by hash
    Blocks,
    /// Frontier hash back to owning account
    Frontiers,
    /// Receivable entries awaiting a receive block
    Pending,
    /// Confirmation height per account
    ConfirmationHeight,
}

/// Per-account metadata: the head of its chain and derived values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Current frontier block hash
    pub head: BlockHash,
    /// Hash of the open block
    pub open_block: BlockHash,
    /// Representative currently named by the chain
    pub representative: Account,
    /// Balance at the frontier
    pub balance: Amount,
    /// Number of blocks in the chain (frontier height)
    pub block_count: u64,
    /// Account upgrade epoch
    pub epoch: Epoch,
}

/// Confirmation frontier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfirmationHeightInfo {
    /// Highest confirmed height; 0 when nothing is confirmed
    pub height: u64,
    /// Hash of the highest confirmed block
    pub frontier: BlockHash,
}

/// Key of a receivable entry: destination account and sending block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingKey {
    /// Destination account
    pub account: Account,
    /// Hash of the sending block
    pub send_hash: BlockHash,
}

/// A receivable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInfo {
    /// Account that sent the funds
    pub source: Account,
    /// Amount being transferred
    pub amount: Amount,
    /// Epoch of the sending block
    pub epoch: Epoch,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Account, AccountInfo>,
    blocks: HashMap<BlockHash, Arc<Block>>,
    /// successor[h] = hash of the block whose previous is h
    successors: HashMap<BlockHash, BlockHash>,
    frontiers: HashMap<BlockHash, Account>,
    pending: BTreeMap<PendingKey, PendingInfo>,
    /// receptions[send_hash] = hash of the receive that consumed it
    receptions: HashMap<BlockHash, BlockHash>,
    confirmation_height: HashMap<Account, ConfirmationHeightInfo>,
}

/// In-memory multi-table store.
pub struct Store {
    tables: RwLock<Tables>,
    writer_open: AtomicBool,
    /// Largest number of blocks one write transaction should process
    max_write_batch: usize,
}

/// Logical read transaction: a capability token for read access.
pub struct ReadTransaction {
    _store: Arc<Store>,
}

/// Logical write transaction: a capability token for mutation, scoped
/// to the tables declared at creation.
pub struct WriteTransaction {
    store: Arc<Store>,
    tables: Vec<Table>,
}

/// Read access shared by both transaction kinds.
pub trait Transaction {
    /// The store this transaction reads from.
    fn store(&self) -> &Store;
}

impl Transaction for ReadTransaction {
    fn store(&self) -> &Store {
        &self._store
    }
}

impl Transaction for WriteTransaction {
    fn store(&self) -> &Store {
        &self.store
    }
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: RwLock::new(Tables::default()),
            writer_open: AtomicBool::new(false),
            max_write_batch: 4096,
        })
    }

    /// Begins a read transaction.
    pub fn tx_begin_read(self: &Arc<Self>) -> ReadTransaction {
        ReadTransaction {
            _store: self.clone(),
        }
    }

    /// Begins a write transaction over the given tables.
    ///
    /// Panics if another write transaction is open; writers are
    /// serialised by the write queue before they get here.
    pub fn tx_begin_write(self: &Arc<Self>, tables: &[Table]) -> WriteTransaction {
        let was_open = self.writer_open.swap(true, Ordering::SeqCst);
        assert!(!was_open, "concurrent write transactions are not allowed");
        WriteTransaction {
            store: self.clone(),
            tables: tables.to_vec(),
        }
    }

    /// Largest number of blocks one write transaction should process.
    pub fn max_write_batch(&self) -> usize {
        self.max_write_batch
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let tables = self.tables.read();
        ContainerInfo::default()
            .leaf("accounts", tables.accounts.len(), std::mem::size_of::<AccountInfo>())
            .leaf("blocks", tables.blocks.len(), std::mem::size_of::<Arc<Block>>())
            .leaf("pending", tables.pending.len(), std::mem::size_of::<PendingInfo>())
            .leaf(
                "confirmation_height",
                tables.confirmation_height.len(),
                std::mem::size_of::<ConfirmationHeightInfo>(),
            )
    }

    // Reads, available to both transaction kinds through `Ledger`

    pub(crate) fn account_get(&self, account: &Account) -> Option<AccountInfo> {
        self.tables.read().accounts.get(account).cloned()
    }

    pub(crate) fn block_get(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.tables.read().blocks.get(hash).cloned()
    }

    pub(crate) fn block_exists(&self, hash: &BlockHash) -> bool {
        self.tables.read().blocks.contains_key(hash)
    }

    pub(crate) fn successor_get(&self, hash: &BlockHash) -> Option<BlockHash> {
        self.tables.read().successors.get(hash).copied()
    }

    pub(crate) fn pending_get(&self, key: &PendingKey) -> Option<PendingInfo> {
        self.tables.read().pending.get(key).copied()
    }

    pub(crate) fn pending_any(&self, account: &Account) -> bool {
        let from = PendingKey {
            account: *account,
            send_hash: BlockHash::ZERO,
        };
        self.tables
            .read()
            .pending
            .range(from..)
            .next()
            .is_some_and(|(key, _)| key.account == *account)
    }

    pub(crate) fn reception_get(&self, send_hash: &BlockHash) -> Option<BlockHash> {
        self.tables.read().receptions.get(send_hash).copied()
    }

    pub(crate) fn confirmation_height_get(&self, account: &Account) -> ConfirmationHeightInfo {
        self.tables
            .read()
            .confirmation_height
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn account_count(&self) -> usize {
        self.tables.read().accounts.len()
    }

    pub(crate) fn block_count(&self) -> usize {
        self.tables.read().blocks.len()
    }
}

impl WriteTransaction {
    fn assert_table(&self, table: Table) {
        debug_assert!(
            self.tables.contains(&table),
            "write transaction was not opened for {table:?}"
        );
    }

    pub(crate) fn account_put(&self, account: Account, info: AccountInfo) {
        self.assert_table(Table::Accounts);
        self.store.tables.write().accounts.insert(account, info);
    }

    pub(crate) fn account_del(&self, account: &Account) {
        self.assert_table(Table::Accounts);
        self.store.tables.write().accounts.remove(account);
    }

    pub(crate) fn block_put(&self, block: Arc<Block>) {
        self.assert_table(Table::Blocks);
        let mut tables = self.store.tables.write();
        let hash = block.hash();
        if !block.previous().is_zero() {
            tables.successors.insert(block.previous(), hash);
        }
        tables.blocks.insert(hash, block);
    }

    pub(crate) fn block_del(&self, hash: &BlockHash) {
        self.assert_table(Table::Blocks);
        let mut tables = self.store.tables.write();
        if let Some(block) = tables.blocks.remove(hash) {
            if !block.previous().is_zero() {
                tables.successors.remove(&block.previous());
            }
        }
    }

    pub(crate) fn frontier_put(&self, hash: BlockHash, account: Account) {
        self.assert_table(Table::Frontiers);
        self.store.tables.write().frontiers.insert(hash, account);
    }

    pub(crate) fn frontier_del(&self, hash: &BlockHash) {
        self.assert_table(Table::Frontiers);
        self.store.tables.write().frontiers.remove(hash);
    }

    pub(crate) fn pending_put(&self, key: PendingKey, info: PendingInfo) {
        self.assert_table(Table::Pending);
        self.store.tables.write().pending.insert(key, info);
    }

    pub(crate) fn pending_del(&self, key: &PendingKey) {
        self.assert_table(Table::Pending);
        self.store.tables.write().pending.remove(key);
    }

    pub(crate) fn reception_put(&self, send_hash: BlockHash, receive_hash: BlockHash) {
        self.assert_table(Table::Pending);
        self.store
            .tables
            .write()
            .receptions
            .insert(send_hash, receive_hash);
    }

    pub(crate) fn reception_del(&self, send_hash: &BlockHash) {
        self.assert_table(Table::Pending);
        self.store.tables.write().receptions.remove(send_hash);
    }

    pub(crate) fn confirmation_height_put(&self, account: Account, info: ConfirmationHeightInfo) {
        self.assert_table(Table::ConfirmationHeight);
        self.store
            .tables
            .write()
            .confirmation_height
            .insert(account, info);
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        self.store.writer_open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_types::Amount;

    #[test]
    fn test_block_put_tracks_successor() {
        let store = Store::new();
        let tx = store.tx_begin_write(&[Table::Blocks]);
        let account = Account::from([1u8; 32]);
        let open = Arc::new(Block::open(
            account,
            account,
            Amount::raw(5),
            BlockHash::from([9u8; 32]),
        ));
        let send = Arc::new(Block::send(
            account,
            open.hash(),
            account,
            Amount::raw(4),
            Account::from([2u8; 32]),
        ));
        tx.block_put(open.clone());
        tx.block_put(send.clone());
        drop(tx);

        assert_eq!(store.successor_get(&open.hash()), Some(send.hash()));
        assert!(store.block_exists(&send.hash()));
    }

    #[test]
    #[should_panic]
    fn test_second_write_transaction_panics() {
        let store = Store::new();
        let _tx1 = store.tx_begin_write(&[Table::Blocks]);
        let _tx2 = store.tx_begin_write(&[Table::Blocks]);
    }

    #[test]
    fn test_pending_any_scans_account_prefix() {
        let store = Store::new();
        let tx = store.tx_begin_write(&[Table::Pending]);
        let account = Account::from([5u8; 32]);
        tx.pending_put(
            PendingKey {
                account,
                send_hash: BlockHash::from([1u8; 32]),
            },
            PendingInfo {
                source: Account::from([6u8; 32]),
                amount: Amount::raw(1),
                epoch: Epoch::Epoch0,
            },
        );
        drop(tx);

        assert!(store.pending_any(&account));
        assert!(!store.pending_any(&Account::from([7u8; 32])));
    }
}
