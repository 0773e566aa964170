//! Active elections container tests: insertion semantics, vote-driven
//! confirmation and cementing callbacks.

mod common;

use common::{genesis_account, wait_until, TestPipeline, GENESIS_AMOUNT};
use lattix_consensus::{BlockSource, ElectionBehavior, FINAL_TIMESTAMP};
use lattix_ledger::BlockStatus;
use lattix_types::Account;
use std::sync::Arc;

fn account(fill: u8) -> Account {
    Account::from([fill; 32])
}

/// Processes a block and returns it once an election exists for it.
fn process_and_elect(
    pipeline: &TestPipeline,
    block: &Arc<lattix_types::Block>,
) -> Arc<lattix_consensus::Election> {
    assert_eq!(
        pipeline
            .processor
            .add_blocking(block.clone(), BlockSource::Local),
        Some(BlockStatus::Progress)
    );
    wait_until(|| pipeline.active.active(&block.qualified_root()));
    pipeline.active.election(&block.qualified_root()).unwrap()
}

#[test]
fn test_insert_is_idempotent_per_root() {
    let mut pipeline = TestPipeline::new();
    pipeline.start();

    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        account(0x22),
        GENESIS_AMOUNT - 10,
    );
    assert_eq!(
        pipeline
            .processor
            .add_blocking(send.clone(), BlockSource::Local),
        Some(BlockStatus::Progress)
    );

    let first = pipeline
        .active
        .insert(&send, ElectionBehavior::Manual, 0, 0, None);
    let second = pipeline
        .active
        .insert(&send, ElectionBehavior::Manual, 0, 0, None);

    let first_election = first.election.unwrap();
    let second_election = second.election.unwrap();
    assert!(Arc::ptr_eq(&first_election, &second_election));
    // Only the first insert may report creation; the scheduler may have
    // won the race before either
    assert!(!(first.inserted && second.inserted));
    assert!(!second.inserted);
}

#[test]
fn test_quorum_confirms_and_cements() {
    let mut pipeline = TestPipeline::new();
    pipeline.start();

    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        account(0x22),
        GENESIS_AMOUNT - 10,
    );
    let election = process_and_elect(&pipeline, &send);

    // Genesis holds every unit of weight; its final vote is quorum
    pipeline
        .vote_router
        .vote(genesis_account(), FINAL_TIMESTAMP, &[send.hash()]);

    wait_until(|| election.confirmed());
    assert_eq!(election.winner().unwrap().hash(), send.hash());

    // The confirming set cements the winner durably
    wait_until(|| {
        let tx = pipeline.ledger.store().tx_begin_read();
        pipeline.ledger.block_confirmed(&tx, &send.hash())
    });

    // The request loop retires the finished election
    wait_until(|| pipeline.active.is_empty());

    // The completed election shows up in the cemented history
    wait_until(|| pipeline.active.recently_cemented.contains_winner(&send.hash()));
    assert!(pipeline
        .active
        .recently_confirmed
        .contains_root(&send.qualified_root()));
}

#[test]
fn test_recently_confirmed_suppresses_reelection() {
    let mut pipeline = TestPipeline::new();
    pipeline.start();

    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        account(0x22),
        GENESIS_AMOUNT - 10,
    );
    let election = process_and_elect(&pipeline, &send);
    pipeline
        .vote_router
        .vote(genesis_account(), FINAL_TIMESTAMP, &[send.hash()]);
    wait_until(|| election.confirmed());
    wait_until(|| pipeline.active.is_empty());

    // The decided root cannot restart
    let result = pipeline
        .active
        .insert(&send, ElectionBehavior::Priority, 0, 0, None);
    assert!(result.election.is_none());
    assert!(!result.inserted);
}

#[test]
fn test_fork_vote_swaps_ledger_winner() {
    let mut pipeline = TestPipeline::new();
    pipeline.start();

    let send_a = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        account(0x22),
        GENESIS_AMOUNT - 10,
    );
    let send_b = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        account(0x33),
        GENESIS_AMOUNT - 20,
    );
    let election = process_and_elect(&pipeline, &send_a);
    assert_eq!(
        pipeline
            .processor
            .add_blocking(send_b.clone(), BlockSource::Live),
        Some(BlockStatus::Fork)
    );
    wait_until(|| election.contains(&send_b.hash()));

    // Quorum lands on the fork, not the block in the ledger
    pipeline
        .vote_router
        .vote(genesis_account(), FINAL_TIMESTAMP, &[send_b.hash()]);

    wait_until(|| election.confirmed());
    assert_eq!(election.winner().unwrap().hash(), send_b.hash());

    // The forced rollback replaces the ledger occupant and the fork is
    // cemented
    wait_until(|| {
        let tx = pipeline.ledger.store().tx_begin_read();
        pipeline.ledger.block_confirmed(&tx, &send_b.hash())
    });
    let tx = pipeline.ledger.store().tx_begin_read();
    assert!(pipeline.ledger.block_get(&tx, &send_a.hash()).is_none());
}

#[test]
fn test_confirmed_observer_fires_with_amount() {
    let mut pipeline = TestPipeline::new();
    pipeline.start();

    let observed = Arc::new(parking_lot::Mutex::new(None));
    let observed_clone = observed.clone();
    pipeline
        .active
        .confirmed
        .add(move |(status, account, amount, is_send)| {
            *observed_clone.lock() = Some((
                status.winner.as_ref().map(|winner| winner.hash()),
                *account,
                *amount,
                *is_send,
            ));
        });

    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        account(0x22),
        GENESIS_AMOUNT - 10,
    );
    let election = process_and_elect(&pipeline, &send);
    pipeline
        .vote_router
        .vote(genesis_account(), FINAL_TIMESTAMP, &[send.hash()]);
    wait_until(|| election.confirmed());

    wait_until(|| observed.lock().is_some());
    let (winner, confirmed_account, amount, is_send) = observed.lock().clone().unwrap();
    assert_eq!(winner, Some(send.hash()));
    assert_eq!(confirmed_account, genesis_account());
    assert_eq!(amount.number(), 10);
    assert!(is_send);
}

#[test]
fn test_vacancy_limits_by_behavior() {
    let pipeline = TestPipeline::new();

    assert_eq!(pipeline.active.limit(ElectionBehavior::Priority), 5000);
    assert_eq!(pipeline.active.limit(ElectionBehavior::Hinted), 1000);
    assert_eq!(pipeline.active.limit(ElectionBehavior::Optimistic), 500);
    assert_eq!(pipeline.active.limit(ElectionBehavior::Manual), i64::MAX);
    assert!(pipeline.active.vacancy(ElectionBehavior::Priority) > 0);
}
