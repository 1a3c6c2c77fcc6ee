// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Concurrency and deadlock tests for the engine over the in-memory store.
//!
//! Row locks are async mutexes, so a stuck row shows up as a hang; every
//! scenario runs under `tokio::time::timeout`. The committed-value cells
//! and the row map use parking_lot, whose deadlock detector runs alongside.

use futures::future::join_all;
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use wallet_ledger::{
    BalanceStore, Engine, MemoryStore, Operation, StoreTransaction, WalletError, WalletId,
};

const SCENARIO_TIMEOUT: Duration = Duration::from_secs(10);

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for parking_lot deadlocks.
/// Returns a handle that stops the detector when dropped.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();

    thread::spawn(move || {
        while flag.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

fn make_engine() -> (Arc<MemoryStore>, Engine<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(Arc::clone(&store));
    (store, engine)
}

// === Tests ===

/// N concurrent first deposits to one new wallet create it exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_deposits_create_one_wallet() {
    let detector = start_deadlock_detector();
    let (store, engine) = make_engine();
    let id = WalletId::new_v4();
    let n = 200;

    let tasks = (0..n).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.apply(Operation::deposit(id, dec!(1.25))).await })
    });
    let results = tokio::time::timeout(SCENARIO_TIMEOUT, join_all(tasks))
        .await
        .expect("deposits must not deadlock");

    for result in results {
        result.unwrap().unwrap();
    }
    assert_eq!(store.len(), 1);
    assert_eq!(
        engine.balance(id).await.unwrap().balance,
        Decimal::from(n) * dec!(1.25)
    );

    stop_deadlock_detector(detector);
}

/// Concurrent withdrawals never overdraw: exactly balance/amount succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_withdrawals_never_overdraw() {
    let detector = start_deadlock_detector();
    let (_store, engine) = make_engine();
    let id = WalletId::new_v4();
    engine.apply(Operation::deposit(id, dec!(100))).await.unwrap();

    let tasks = (0..250).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.apply(Operation::withdraw(id, dec!(1))).await })
    });
    let results = tokio::time::timeout(SCENARIO_TIMEOUT, join_all(tasks))
        .await
        .expect("withdrawals must not deadlock");

    let mut ok = 0;
    let mut insufficient = 0;
    for result in results {
        match result.unwrap() {
            Ok(wallet) => {
                assert!(wallet.balance >= Decimal::ZERO);
                ok += 1;
            }
            Err(WalletError::InsufficientFunds { .. }) => insufficient += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 100);
    assert_eq!(insufficient, 150);
    assert_eq!(engine.balance(id).await.unwrap().balance, Decimal::ZERO);

    stop_deadlock_detector(detector);
}

/// Mixed deposits and withdrawals across many wallets end at the sum of
/// the accepted operations.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn mixed_operations_across_wallets() {
    let detector = start_deadlock_detector();
    let (store, engine) = make_engine();
    let wallets: Vec<WalletId> = (0..10).map(|_| WalletId::new_v4()).collect();

    for &id in &wallets {
        engine.apply(Operation::deposit(id, dec!(1000))).await.unwrap();
    }

    let tasks = (0..1000).map(|i| {
        let engine = engine.clone();
        let id = wallets[i % wallets.len()];
        tokio::spawn(async move {
            let op = if i % 2 == 0 {
                Operation::deposit(id, dec!(3))
            } else {
                Operation::withdraw(id, dec!(2))
            };
            engine.apply(op).await
        })
    });
    let results = tokio::time::timeout(SCENARIO_TIMEOUT, join_all(tasks))
        .await
        .expect("mixed operations must not deadlock");

    for result in results {
        result.unwrap().unwrap();
    }

    // Each wallet: 50 deposits of 3 and 50 withdrawals of 2
    assert_eq!(store.len(), wallets.len());
    for &id in &wallets {
        assert_eq!(engine.balance(id).await.unwrap().balance, dec!(1050));
    }

    stop_deadlock_detector(detector);
}

/// Balance reads proceed while a writer holds the row lock and see the
/// last committed value.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_do_not_wait_for_writers() {
    let (store, engine) = make_engine();
    let id = WalletId::new_v4();
    engine.apply(Operation::deposit(id, dec!(10))).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.locked_read(id).await.unwrap();
    tx.update(id, dec!(99)).await.unwrap();

    let wallet = tokio::time::timeout(Duration::from_secs(1), engine.balance(id))
        .await
        .expect("read must not block on the row lock")
        .unwrap();
    assert_eq!(wallet.balance, dec!(10));

    tx.commit().await.unwrap();
    assert_eq!(engine.balance(id).await.unwrap().balance, dec!(99));
}

/// An operation cancelled while waiting for a lock leaves no trace, and
/// the lock holder's rollback leaves the balance unchanged.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_operation_changes_nothing() {
    let (store, engine) = make_engine();
    let id = WalletId::new_v4();
    engine.apply(Operation::deposit(id, dec!(40))).await.unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.locked_read(id).await.unwrap();

    let waiting = engine.apply(Operation::withdraw(id, dec!(15)));
    let result = tokio::time::timeout(Duration::from_millis(100), waiting).await;
    assert!(result.is_err(), "withdrawal should still be waiting on the lock");

    drop(holder);

    assert_eq!(engine.balance(id).await.unwrap().balance, dec!(40));
    // The lock is free again
    let wallet = tokio::time::timeout(
        Duration::from_secs(1),
        engine.apply(Operation::withdraw(id, dec!(15))),
    )
    .await
    .expect("lock must be released after cancellation")
    .unwrap();
    assert_eq!(wallet.balance, dec!(25));
}

/// Aborting a spawned operation mid-flight behaves like a rollback.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aborted_task_releases_its_lock() {
    let (store, engine) = make_engine();
    let id = WalletId::new_v4();
    engine.apply(Operation::deposit(id, dec!(5))).await.unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.locked_read(id).await.unwrap();

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.apply(Operation::deposit(id, dec!(1))).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    holder.rollback().await.unwrap();

    let wallet = tokio::time::timeout(
        Duration::from_secs(1),
        engine.apply(Operation::deposit(id, dec!(2))),
    )
    .await
    .expect("no lock may be leaked")
    .unwrap();
    assert_eq!(wallet.balance, dec!(7));
}
