//! Integration test: calculator algebra
//!
//! Randomized (seeded) checks that the stages compose the way the ledger
//! relies on: reserve + cancel is a no-op, reserve + commit equals an
//! immediate settlement, and `available` stays `actual - pending`.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng, rngs::StdRng};
use rust_decimal::Decimal;
use tally_calc::{BalanceDelta, Parties, calculate};
use tally_types::*;

const ROUNDS: usize = 500;

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

fn book(balances: Vec<Balance>) -> BTreeMap<AccountNumber, Balance> {
    balances
        .into_iter()
        .map(|b| (b.account.clone(), b))
        .collect()
}

fn step(
    flow: Flow,
    stage: Stage,
    from: &AccountNumber,
    to: &AccountNumber,
    amount: Decimal,
    balances: &mut BTreeMap<AccountNumber, Balance>,
) -> BalanceDelta {
    let parties = Parties {
        from: flow.debits_source().then_some(from),
        to: flow.credits_destination().then_some(to),
        amount,
    };
    let delta = calculate(flow, stage, parties, balances).unwrap();
    delta.apply_to(balances);
    delta
}

fn random_book(rng: &mut StdRng) -> BTreeMap<AccountNumber, Balance> {
    let mut a = Balance::funded("A", rng.gen_range(1_000..100_000));
    a.pending = dec(rng.gen_range(0..500));
    let b = Balance::funded("B", rng.gen_range(0..100_000));
    book(vec![a, b])
}

#[test]
fn reserve_then_cancel_is_identity() {
    let mut rng = StdRng::seed_from_u64(0x7a11);
    let (a, b) = (AccountNumber::new("A"), AccountNumber::new("B"));
    for _ in 0..ROUNDS {
        let mut balances = random_book(&mut rng);
        let original = balances.clone();
        let amount = dec(rng.gen_range(1..=500));
        for flow in [Flow::CashOut, Flow::Transfer, Flow::Refund, Flow::Generic] {
            step(flow, Stage::Reserve, &a, &b, amount, &mut balances);
            step(flow, Stage::Cancel, &a, &b, amount, &mut balances);
            assert_eq!(balances, original, "flow {flow}");
        }
    }
}

#[test]
fn reserve_then_commit_equals_immediate() {
    let mut rng = StdRng::seed_from_u64(0xc0ff_ee);
    let (a, b) = (AccountNumber::new("A"), AccountNumber::new("B"));
    for _ in 0..ROUNDS {
        let start = random_book(&mut rng);
        let amount = dec(rng.gen_range(1..=500));
        for flow in [Flow::CashOut, Flow::Transfer, Flow::Refund, Flow::Generic] {
            let mut two_phase = start.clone();
            step(flow, Stage::Reserve, &a, &b, amount, &mut two_phase);
            step(flow, Stage::Commit, &a, &b, amount, &mut two_phase);

            let mut immediate = start.clone();
            step(flow, Stage::Immediate, &a, &b, amount, &mut immediate);

            assert_eq!(two_phase, immediate, "flow {flow}");
        }
    }
}

#[test]
fn every_step_preserves_available_identity() {
    let mut rng = StdRng::seed_from_u64(42);
    let (a, b) = (AccountNumber::new("A"), AccountNumber::new("B"));
    for _ in 0..ROUNDS {
        let mut balances = random_book(&mut rng);
        let amount = dec(rng.gen_range(1..=500));
        let delta = step(Flow::Transfer, Stage::Reserve, &a, &b, amount, &mut balances);
        for touched in delta.iter() {
            let after = &touched.balance_after;
            assert_eq!(after.available(), after.actual - after.pending);
            assert_eq!(touched.available_change(), -amount);
        }
    }
}

#[test]
fn conservation_across_two_party_flows() {
    let mut rng = StdRng::seed_from_u64(7);
    let (a, b) = (AccountNumber::new("A"), AccountNumber::new("B"));
    for _ in 0..ROUNDS {
        let mut balances = random_book(&mut rng);
        let total = |bk: &BTreeMap<AccountNumber, Balance>| -> Decimal {
            bk.values().map(|x| x.actual).sum()
        };
        let before = total(&balances);
        let amount = dec(rng.gen_range(1..=500));
        step(Flow::Transfer, Stage::Immediate, &a, &b, amount, &mut balances);
        assert_eq!(total(&balances), before);
    }
}

#[test]
fn insufficient_funds_leaves_balances_unchanged() {
    let (a, b) = (AccountNumber::new("A"), AccountNumber::new("B"));
    let balances = book(vec![Balance::funded("A", 100), Balance::funded("B", 0)]);
    let snapshot = balances.clone();

    for stage in [Stage::Immediate, Stage::Reserve] {
        let err = calculate(
            Flow::Transfer,
            stage,
            Parties {
                from: Some(&a),
                to: Some(&b),
                amount: dec(150),
            },
            &balances,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TallyError::InsufficientFunds { needed, available, .. }
                if needed == dec(150) && available == dec(100)
        ));
    }
    assert_eq!(balances, snapshot);
}

#[test]
fn commit_is_not_gated_by_sufficiency() {
    // The hold already lowered `available`; commit must not re-check it.
    let (a, b) = (AccountNumber::new("A"), AccountNumber::new("B"));
    let mut held = Balance::funded("A", 100);
    held.pending = dec(100);
    let mut balances = book(vec![held, Balance::funded("B", 0)]);
    step(Flow::Transfer, Stage::Commit, &a, &b, dec(100), &mut balances);
    assert_eq!(balances[&a].actual, dec(0));
    assert_eq!(balances[&a].pending, dec(0));
    assert_eq!(balances[&b].actual, dec(100));
}
