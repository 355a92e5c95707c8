//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: Σ(balances) unchanged by any transfer sequence
//! - Non-negativity: no balance ever drops below zero
//! - Log fidelity: one record per committed transfer, in commit order

use ledger_sim::{
    audit::verify_ledger, AccountId, LedgerStore, MemoryStore, TransferExecutor,
};
use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

/// Strategy for generating seed balances (some accounts start empty)
fn balances_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(prop_oneof![Just(0i64), 1i64..5_000], 1..8)
}

fn seeded_store(balances: &[i64]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (i, balance) in balances.iter().enumerate() {
        store
            .seed_accounts(&[AccountId::new(format!("A{}", i + 1))], *balance)
            .unwrap();
    }
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Any sequence of executions conserves the total
    #[test]
    fn prop_sequential_transfers_conserve_total(
        balances in balances_strategy(),
        seed in any::<u64>(),
        steps in 1usize..60,
    ) {
        let store = seeded_store(&balances);
        let expected: i128 = balances.iter().map(|b| *b as i128).sum();
        let executor = TransferExecutor::new(store.clone());
        let mut rng = StdRng::seed_from_u64(seed);

        let mut committed = 0;
        for _ in 0..steps {
            if executor.execute(&mut rng).is_ok() {
                committed += 1;
            }
            let snapshot = store.snapshot_accounts().unwrap();
            prop_assert_eq!(snapshot.total(), expected);
            prop_assert!(snapshot.accounts().iter().all(|a| a.balance >= 0));
        }

        let audit = verify_ledger(store.as_ref(), expected).unwrap();
        prop_assert_eq!(audit.transfers, committed);
    }

    /// Property: Each record matches the balance deltas it caused
    #[test]
    fn prop_record_matches_deltas(
        balances in prop::collection::vec(1i64..10_000, 2..6),
        seed in any::<u64>(),
    ) {
        let store = seeded_store(&balances);
        let executor = TransferExecutor::new(store.clone());
        let mut rng = StdRng::seed_from_u64(seed);

        let before = store.snapshot_accounts().unwrap();
        let record = executor.execute(&mut rng).unwrap();
        let after = store.snapshot_accounts().unwrap();

        prop_assert_eq!(
            after.balance_of(&record.from).unwrap(),
            before.balance_of(&record.from).unwrap() - record.amount
        );
        prop_assert_eq!(
            after.balance_of(&record.to).unwrap(),
            before.balance_of(&record.to).unwrap() + record.amount
        );
        for account in after.accounts() {
            if account.id != record.from && account.id != record.to {
                prop_assert_eq!(Some(account.balance), before.balance_of(&account.id));
            }
        }
    }

    /// Property: Sequence numbers are dense and increasing
    #[test]
    fn prop_sequences_dense(seed in any::<u64>(), steps in 1usize..40) {
        let store = seeded_store(&[1000, 1000, 1000]);
        let executor = TransferExecutor::new(store.clone());
        let mut rng = StdRng::seed_from_u64(seed);

        for _ in 0..steps {
            let _ = executor.execute(&mut rng);
        }

        let records = store.list_transfers().unwrap();
        for (i, record) in records.iter().enumerate() {
            prop_assert_eq!(record.sequence, i as u64 + 1);
        }
    }
}
