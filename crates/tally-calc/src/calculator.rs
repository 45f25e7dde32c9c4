//! Transition calculators.
//!
//! Each `(flow, stage)` pair maps onto exactly one [`Calculator`]:
//!
//! | flow \ stage          | Immediate     | Reserve | Commit            | Cancel      |
//! |-----------------------|---------------|---------|-------------------|-------------|
//! | cash-in               | `Credit`      | -       | -                 | -           |
//! | cash-out              | `Debit`       | `Hold`  | `ConsumeHold`     | `ReleaseHold` |
//! | transfer/refund/generic | `DebitCredit` | `Hold`  | `ConsumeHoldCredit` | `ReleaseHold` |
//!
//! Per-account effects:
//! - immediate debit: `actual -= amount` (gated by sufficiency)
//! - credit: `actual += amount`
//! - hold: `pending += amount` (gated by sufficiency)
//! - consume hold: `pending -= amount`, `actual -= amount`
//! - release hold: `pending -= amount`

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tally_types::{AccountNumber, Balance, Flow, Result, Stage, TallyError};

use crate::{BalanceDelta, sufficiency::check_debit};

/// The two parties of a movement and its amount.
#[derive(Debug, Clone, Copy)]
pub struct Parties<'a> {
    pub from: Option<&'a AccountNumber>,
    pub to: Option<&'a AccountNumber>,
    pub amount: Decimal,
}

/// A selected balance transition. Resolved once per request from
/// `(flow, stage)`; applying it has no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Calculator {
    /// Credit `to.actual`.
    Credit,
    /// Debit `from.actual`.
    Debit,
    /// Debit `from.actual`, credit `to.actual`.
    DebitCredit,
    /// Raise `from.pending`.
    Hold,
    /// Lower `from.pending` and `from.actual`.
    ConsumeHold,
    /// Lower `from.pending` and `from.actual`, credit `to.actual`.
    ConsumeHoldCredit,
    /// Lower `from.pending`.
    ReleaseHold,
}

impl Calculator {
    /// Look up the calculator for a `(flow, stage)` pair.
    ///
    /// # Errors
    /// Returns [`TallyError::UnsupportedStage`] for pairs with no
    /// calculator (any lifecycle stage of cash-in).
    pub fn select(flow: Flow, stage: Stage) -> Result<Self> {
        let two_party = flow.debits_source() && flow.credits_destination();
        match (flow, stage) {
            (Flow::CashIn, Stage::Immediate) => Ok(Self::Credit),
            (Flow::CashOut, Stage::Immediate) => Ok(Self::Debit),
            (_, Stage::Immediate) if two_party => Ok(Self::DebitCredit),
            (Flow::CashOut, Stage::Commit) => Ok(Self::ConsumeHold),
            (_, Stage::Commit) if two_party => Ok(Self::ConsumeHoldCredit),
            (_, Stage::Reserve) if flow.supports_hold() => Ok(Self::Hold),
            (_, Stage::Cancel) if flow.supports_hold() => Ok(Self::ReleaseHold),
            _ => Err(TallyError::UnsupportedStage { flow, stage }),
        }
    }

    /// Whether this calculator touches the `from` account.
    #[must_use]
    pub fn uses_source(self) -> bool {
        !matches!(self, Self::Credit)
    }

    /// Whether this calculator touches the `to` account.
    #[must_use]
    pub fn uses_destination(self) -> bool {
        matches!(self, Self::Credit | Self::DebitCredit | Self::ConsumeHoldCredit)
    }

    /// Compute the new balances. `balances` must hold every touched account.
    ///
    /// # Errors
    /// - `InvalidAmount` for a non-positive amount
    /// - `MissingAccount` / `AccountNotFound` when a touched account is
    ///   absent from the request / from `balances`
    /// - `InsufficientFunds` when a debit or hold breaches the floor
    /// - `PendingUnderflow` when consuming / releasing more than is held
    pub fn apply(
        self,
        parties: Parties<'_>,
        balances: &BTreeMap<AccountNumber, Balance>,
    ) -> Result<BalanceDelta> {
        let amount = parties.amount;
        if amount <= Decimal::ZERO {
            return Err(TallyError::InvalidAmount {
                reason: format!("amount must be positive, got {amount}"),
            });
        }

        let mut delta = BalanceDelta::new();

        if self.uses_source() {
            let source = lookup(parties.from, "source", balances)?;
            let after = match self {
                Self::Debit | Self::DebitCredit => debit(source, amount)?,
                Self::Hold => hold(source, amount)?,
                Self::ConsumeHold | Self::ConsumeHoldCredit => consume_hold(source, amount)?,
                Self::ReleaseHold => release_hold(source, amount)?,
                Self::Credit => source.clone(),
            };
            delta.record(source, after);
        }

        if self.uses_destination() {
            let destination = lookup(parties.to, "destination", balances)?;
            delta.record(destination, credit(destination, amount)?);
        }

        Ok(delta)
    }
}

/// Select and run the calculator for `(flow, stage)` in one call.
///
/// # Errors
/// See [`Calculator::select`] and [`Calculator::apply`].
pub fn calculate(
    flow: Flow,
    stage: Stage,
    parties: Parties<'_>,
    balances: &BTreeMap<AccountNumber, Balance>,
) -> Result<BalanceDelta> {
    Calculator::select(flow, stage)?.apply(parties, balances)
}

fn lookup<'a>(
    account: Option<&AccountNumber>,
    role: &str,
    balances: &'a BTreeMap<AccountNumber, Balance>,
) -> Result<&'a Balance> {
    let account = account.ok_or_else(|| TallyError::MissingAccount {
        role: role.to_string(),
    })?;
    balances
        .get(account)
        .ok_or_else(|| TallyError::AccountNotFound(account.clone()))
}

fn debit(balance: &Balance, amount: Decimal) -> Result<Balance> {
    let mut after = balance.clone();
    after.actual = sub(balance, balance.actual, amount)?;
    let after = representable(after, amount)?;
    check_debit(balance, &after, amount)?;
    Ok(after)
}

fn credit(balance: &Balance, amount: Decimal) -> Result<Balance> {
    let mut after = balance.clone();
    after.actual = add(balance, balance.actual, amount)?;
    representable(after, amount)
}

fn hold(balance: &Balance, amount: Decimal) -> Result<Balance> {
    let mut after = balance.clone();
    after.pending = add(balance, balance.pending, amount)?;
    let after = representable(after, amount)?;
    check_debit(balance, &after, amount)?;
    Ok(after)
}

fn consume_hold(balance: &Balance, amount: Decimal) -> Result<Balance> {
    let mut after = release_hold(balance, amount)?;
    after.actual = sub(balance, after.actual, amount)?;
    representable(after, amount)
}

fn release_hold(balance: &Balance, amount: Decimal) -> Result<Balance> {
    if balance.pending < amount {
        return Err(TallyError::PendingUnderflow {
            account: balance.account.clone(),
            pending: balance.pending,
            amount,
        });
    }
    let mut after = balance.clone();
    after.pending = sub(balance, balance.pending, amount)?;
    Ok(after)
}

fn add(balance: &Balance, lhs: Decimal, amount: Decimal) -> Result<Decimal> {
    lhs.checked_add(amount).ok_or_else(|| overflow(balance, amount))
}

fn sub(balance: &Balance, lhs: Decimal, amount: Decimal) -> Result<Decimal> {
    lhs.checked_sub(amount).ok_or_else(|| overflow(balance, amount))
}

/// `available` must stay computable after the step.
fn representable(after: Balance, amount: Decimal) -> Result<Balance> {
    match after.actual.checked_sub(after.pending) {
        Some(_) => Ok(after),
        None => Err(overflow(&after, amount)),
    }
}

fn overflow(balance: &Balance, amount: Decimal) -> TallyError {
    TallyError::InvalidAmount {
        reason: format!("{amount} overflows the balance of {}", balance.account),
    }
}
