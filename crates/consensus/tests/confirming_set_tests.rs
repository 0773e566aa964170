//! Confirming set tests: idempotent adds, observer ordering and
//! already-cemented handling.

mod common;

use common::{wait_until, TestPipeline, GENESIS_AMOUNT};
use lattix_consensus::BlockSource;
use lattix_ledger::BlockStatus;
use lattix_types::{Account, BlockHash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_cemented_fires_once_per_block() {
    let mut pipeline = TestPipeline::new();

    let cemented = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let cemented_clone = cemented.clone();
    pipeline.confirming_set.cemented.add(move |block| {
        cemented_clone.lock().push(block.hash());
    });

    pipeline.start();

    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 1,
    );
    assert_eq!(
        pipeline
            .processor
            .add_blocking(send.clone(), BlockSource::Local),
        Some(BlockStatus::Progress)
    );

    pipeline.confirming_set.add(send.hash());
    wait_until(|| cemented.lock().len() == 1);
    assert_eq!(cemented.lock()[0], send.hash());
}

#[test]
fn test_duplicate_adds_notify_at_most_once_each() {
    let mut pipeline = TestPipeline::new();

    let cemented = Arc::new(AtomicUsize::new(0));
    let already = Arc::new(AtomicUsize::new(0));
    let cemented_clone = cemented.clone();
    pipeline.confirming_set.cemented.add(move |_| {
        cemented_clone.fetch_add(1, Ordering::SeqCst);
    });
    let already_clone = already.clone();
    pipeline.confirming_set.already_cemented.add(move |_| {
        already_clone.fetch_add(1, Ordering::SeqCst);
    });

    pipeline.start();

    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        Account::from([0x22u8; 32]),
        GENESIS_AMOUNT - 1,
    );
    assert_eq!(
        pipeline
            .processor
            .add_blocking(send.clone(), BlockSource::Local),
        Some(BlockStatus::Progress)
    );

    // Concurrent duplicate submissions of the same hash
    let submissions = 6;
    let handles: Vec<_> = (0..submissions)
        .map(|_| {
            let confirming_set = pipeline.confirming_set.clone();
            let hash = send.hash();
            std::thread::spawn(move || confirming_set.add(hash))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    wait_until(|| {
        cemented.load(Ordering::SeqCst) + already.load(Ordering::SeqCst) >= 1
            && pipeline.confirming_set.is_empty()
    });
    // Give any extra notifications time to surface, then settle
    std::thread::sleep(std::time::Duration::from_millis(200));

    let cemented_count = cemented.load(Ordering::SeqCst);
    let already_count = already.load(Ordering::SeqCst);
    assert!(cemented_count <= 1, "cemented fired {cemented_count} times");
    assert!(cemented_count + already_count <= submissions);
    assert!(cemented_count + already_count >= 1);
}

#[test]
fn test_exists_tracks_pending() {
    let pipeline = TestPipeline::new();
    // Worker not started: the hash stays pending
    let hash = BlockHash::from([0xabu8; 32]);
    assert!(!pipeline.confirming_set.exists(&hash));
    pipeline.confirming_set.add(hash);
    assert!(pipeline.confirming_set.exists(&hash));
    assert_eq!(pipeline.confirming_set.len(), 1);

    // A duplicate add is absorbed
    pipeline.confirming_set.add(hash);
    assert_eq!(pipeline.confirming_set.len(), 1);
}

#[test]
fn test_cementing_cascades_dependencies_in_order() {
    let mut pipeline = TestPipeline::new();

    let cemented = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let cemented_clone = cemented.clone();
    pipeline.confirming_set.cemented.add(move |block| {
        cemented_clone.lock().push(block.hash());
    });

    pipeline.start();

    let destination = Account::from([0x22u8; 32]);
    let send = pipeline.send_from_genesis(
        pipeline.genesis.hash(),
        destination,
        GENESIS_AMOUNT - 100,
    );
    assert_eq!(
        pipeline
            .processor
            .add_blocking(send.clone(), BlockSource::Local),
        Some(BlockStatus::Progress)
    );
    let open = pipeline.open_block(destination, 100, send.hash());
    assert_eq!(
        pipeline
            .processor
            .add_blocking(open.clone(), BlockSource::Local),
        Some(BlockStatus::Progress)
    );

    // Cementing the receive cements its source first
    pipeline.confirming_set.add(open.hash());
    wait_until(|| cemented.lock().len() == 2);
    assert_eq!(*cemented.lock(), vec![send.hash(), open.hash()]);
}
