//! Ledger state machine tests: block processing statuses, rollback and
//! confirmation cascades.

use lattix_ledger::{BlockStatus, Ledger, LedgerError, Store, Table, WriteTransaction};
use lattix_types::{Account, Amount, Block, BlockHash, Signature, WorkThresholds};
use std::sync::Arc;

const GENESIS_AMOUNT: u128 = 1_000_000;

fn genesis_account() -> Account {
    Account::from([0x11u8; 32])
}

fn setup() -> (Ledger, Arc<Block>) {
    let store = Store::new();
    Ledger::with_genesis(
        store,
        WorkThresholds::dev(),
        genesis_account(),
        Amount::raw(GENESIS_AMOUNT),
    )
}

fn write_tx(ledger: &Ledger) -> WriteTransaction {
    ledger.store().tx_begin_write(&[
        Table::Accounts,
        Table::Blocks,
        Table::Frontiers,
        Table::Pending,
        Table::ConfirmationHeight,
    ])
}

fn worked(block: Block, ledger: &Ledger) -> Arc<Block> {
    Arc::new(block.work_for(ledger.thresholds()))
}

/// Sends `amount` from genesis to `destination`, returning the send.
fn send_from_genesis(ledger: &Ledger, previous: BlockHash, destination: Account, remaining: u128) -> Arc<Block> {
    worked(
        Block::send(
            genesis_account(),
            previous,
            genesis_account(),
            Amount::raw(remaining),
            destination,
        ),
        ledger,
    )
}

#[test]
fn test_send_and_open() {
    let (ledger, genesis) = setup();
    let destination = Account::from([0x22u8; 32]);
    let send = send_from_genesis(&ledger, genesis.hash(), destination, GENESIS_AMOUNT - 100);

    let tx = write_tx(&ledger);
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);

    let open = worked(
        Block::open(destination, destination, Amount::raw(100), send.hash()),
        &ledger,
    );
    assert_eq!(ledger.process(&tx, &open), BlockStatus::Progress);
    drop(tx);

    let read = ledger.store().tx_begin_read();
    let info = ledger.account_info(&read, &destination).unwrap();
    assert_eq!(info.balance, Amount::raw(100));
    assert_eq!(info.block_count, 1);
    assert_eq!(ledger.weight(&destination), Amount::raw(100));
    assert_eq!(
        ledger.weight(&genesis_account()),
        Amount::raw(GENESIS_AMOUNT - 100)
    );
}

#[test]
fn test_old_is_idempotent() {
    let (ledger, genesis) = setup();
    let send = send_from_genesis(
        &ledger,
        genesis.hash(),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 1,
    );

    let tx = write_tx(&ledger);
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);
    let head_after_first = ledger
        .account_info(&tx, &genesis_account())
        .unwrap();
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Old);
    let head_after_second = ledger
        .account_info(&tx, &genesis_account())
        .unwrap();
    assert_eq!(head_after_first, head_after_second);
    assert_eq!(ledger.block_count(), 2);
}

#[test]
fn test_gap_previous() {
    let (ledger, _genesis) = setup();
    let send = send_from_genesis(
        &ledger,
        BlockHash::from([0xffu8; 32]),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 1,
    );
    let tx = write_tx(&ledger);
    assert_eq!(ledger.process(&tx, &send), BlockStatus::GapPrevious);
}

#[test]
fn test_gap_source_and_unreceivable() {
    let (ledger, genesis) = setup();
    let destination = Account::from([0x22u8; 32]);

    let tx = write_tx(&ledger);
    // Open referencing a send that does not exist yet
    let open = worked(
        Block::open(
            destination,
            destination,
            Amount::raw(100),
            BlockHash::from([0xabu8; 32]),
        ),
        &ledger,
    );
    assert_eq!(ledger.process(&tx, &open), BlockStatus::GapSource);

    // Open referencing an existing block that is not pending for us
    let open_wrong = worked(
        Block::open(destination, destination, Amount::raw(100), genesis.hash()),
        &ledger,
    );
    assert_eq!(ledger.process(&tx, &open_wrong), BlockStatus::Unreceivable);
}

#[test]
fn test_fork_detected() {
    let (ledger, genesis) = setup();
    let tx = write_tx(&ledger);

    let send_a = send_from_genesis(
        &ledger,
        genesis.hash(),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 10,
    );
    let send_b = send_from_genesis(
        &ledger,
        genesis.hash(),
        Account::from([0x33u8; 32]),
        GENESIS_AMOUNT - 20,
    );
    assert_eq!(ledger.process(&tx, &send_a), BlockStatus::Progress);
    assert_eq!(ledger.process(&tx, &send_b), BlockStatus::Fork);
    assert_eq!(send_a.qualified_root(), send_b.qualified_root());

    // The successor at the contested root is the first-processed block
    let successor = ledger.successor(&tx, &send_b.qualified_root()).unwrap();
    assert_eq!(successor.hash(), send_a.hash());
}

#[test]
fn test_negative_spend_and_balance_mismatch() {
    let (ledger, genesis) = setup();
    let destination = Account::from([0x22u8; 32]);
    let tx = write_tx(&ledger);

    let overdraw = worked(
        Block::send(
            genesis_account(),
            genesis.hash(),
            genesis_account(),
            Amount::raw(GENESIS_AMOUNT + 1),
            destination,
        ),
        &ledger,
    );
    assert_eq!(ledger.process(&tx, &overdraw), BlockStatus::NegativeSpend);

    let send = send_from_genesis(&ledger, genesis.hash(), destination, GENESIS_AMOUNT - 100);
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);

    let open_wrong_amount = worked(
        Block::open(destination, destination, Amount::raw(999), send.hash()),
        &ledger,
    );
    assert_eq!(
        ledger.process(&tx, &open_wrong_amount),
        BlockStatus::BalanceMismatch
    );
}

#[test]
fn test_bad_signature_and_work() {
    let (ledger, genesis) = setup();
    let tx = write_tx(&ledger);

    let unsigned = Arc::new(
        Block::send(
            genesis_account(),
            genesis.hash(),
            genesis_account(),
            Amount::raw(GENESIS_AMOUNT - 1),
            Account::from([0x22u8; 32]),
        )
        .work_for(ledger.thresholds())
        .with_signature(Signature::ZERO),
    );
    assert_eq!(ledger.process(&tx, &unsigned), BlockStatus::BadSignature);

    let strict = Ledger::new(Store::new(), WorkThresholds::production());
    let strict_tx = strict.store().tx_begin_write(&[
        Table::Accounts,
        Table::Blocks,
        Table::Frontiers,
        Table::Pending,
        Table::ConfirmationHeight,
    ]);
    let workless = Arc::new(Block::send(
        genesis_account(),
        genesis.hash(),
        genesis_account(),
        Amount::raw(GENESIS_AMOUNT - 1),
        Account::from([0x22u8; 32]),
    ));
    assert_eq!(
        strict.process(&strict_tx, &workless),
        BlockStatus::InsufficientWork
    );
}

#[test]
fn test_open_burn_account_rejected() {
    let (ledger, genesis) = setup();
    let tx = write_tx(&ledger);
    let send = send_from_genesis(&ledger, genesis.hash(), Account::ZERO, GENESIS_AMOUNT - 5);
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);

    let open = worked(
        Block::open(Account::ZERO, Account::ZERO, Amount::raw(5), send.hash()),
        &ledger,
    );
    assert_eq!(ledger.process(&tx, &open), BlockStatus::OpenedBurnAccount);
}

#[test]
fn test_rollback_restores_pending_and_weights() {
    let (ledger, genesis) = setup();
    let destination = Account::from([0x22u8; 32]);
    let tx = write_tx(&ledger);

    let send = send_from_genesis(&ledger, genesis.hash(), destination, GENESIS_AMOUNT - 100);
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);
    let open = worked(
        Block::open(destination, destination, Amount::raw(100), send.hash()),
        &ledger,
    );
    assert_eq!(ledger.process(&tx, &open), BlockStatus::Progress);

    // Rolling back the send must first roll back the dependent receive
    let rolled_back = ledger.rollback(&tx, send.hash()).unwrap();
    let hashes: Vec<BlockHash> = rolled_back.iter().map(|block| block.hash()).collect();
    assert_eq!(hashes, vec![open.hash(), send.hash()]);

    assert!(ledger.account_info(&tx, &destination).is_none());
    let info = ledger.account_info(&tx, &genesis_account()).unwrap();
    assert_eq!(info.head, genesis.hash());
    assert_eq!(info.balance, Amount::raw(GENESIS_AMOUNT));
    assert_eq!(ledger.weight(&genesis_account()), Amount::raw(GENESIS_AMOUNT));
    assert_eq!(ledger.weight(&destination), Amount::ZERO);

    // The same send processes cleanly again
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);
}

#[test]
fn test_rollback_refuses_confirmed() {
    let (ledger, genesis) = setup();
    let tx = write_tx(&ledger);
    let send = send_from_genesis(
        &ledger,
        genesis.hash(),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 1,
    );
    assert_eq!(ledger.process(&tx, &send), BlockStatus::Progress);
    assert_eq!(ledger.confirm(&tx, send.hash()).len(), 1);

    match ledger.rollback(&tx, send.hash()) {
        Err(LedgerError::RollbackConfirmed { hash }) => assert_eq!(hash, send.hash()),
        other => panic!("expected RollbackConfirmed, got {other:?}"),
    }
}

#[test]
fn test_confirm_cascades_through_sources() {
    let (ledger, genesis) = setup();
    let destination = Account::from([0x22u8; 32]);
    let tx = write_tx(&ledger);

    let send = send_from_genesis(&ledger, genesis.hash(), destination, GENESIS_AMOUNT - 100);
    ledger.process(&tx, &send);
    let open = worked(
        Block::open(destination, destination, Amount::raw(100), send.hash()),
        &ledger,
    );
    ledger.process(&tx, &open);

    // Confirming the receive cements its source send first
    let cemented = ledger.confirm(&tx, open.hash());
    let hashes: Vec<BlockHash> = cemented.iter().map(|block| block.hash()).collect();
    assert_eq!(hashes, vec![send.hash(), open.hash()]);
    assert!(ledger.block_confirmed(&tx, &send.hash()));
    assert!(ledger.block_confirmed(&tx, &open.hash()));
    assert_eq!(ledger.cemented_count(), 3);

    // A second confirm is a no-op
    assert!(ledger.confirm(&tx, open.hash()).is_empty());
}

#[test]
fn test_next_unconfirmed_walks_frontier() {
    let (ledger, genesis) = setup();
    let tx = write_tx(&ledger);
    let send = send_from_genesis(
        &ledger,
        genesis.hash(),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 1,
    );
    ledger.process(&tx, &send);

    let next = ledger.next_unconfirmed(&tx, &genesis_account()).unwrap();
    assert_eq!(next.hash(), send.hash());

    ledger.confirm(&tx, send.hash());
    assert!(ledger.next_unconfirmed(&tx, &genesis_account()).is_none());
}

#[test]
fn test_dependents_confirmed() {
    let (ledger, genesis) = setup();
    let destination = Account::from([0x22u8; 32]);
    let tx = write_tx(&ledger);

    let send = send_from_genesis(&ledger, genesis.hash(), destination, GENESIS_AMOUNT - 100);
    ledger.process(&tx, &send);
    let open = worked(
        Block::open(destination, destination, Amount::raw(100), send.hash()),
        &ledger,
    );
    ledger.process(&tx, &open);

    // The open's source send is unconfirmed
    assert!(!ledger.dependents_confirmed(&tx, &open));
    ledger.confirm(&tx, send.hash());
    assert!(ledger.dependents_confirmed(&tx, &open));
}
