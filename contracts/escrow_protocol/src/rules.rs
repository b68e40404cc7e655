//! # Transition rules
//!
//! Every operation maps the current [`EscrowSnapshot`] to its successor, or
//! fails with [`ProtocolError::PreconditionFailed`] when the escrow contract
//! would refuse the spend.  Nothing here builds transactions; the service
//! crate turns the returned snapshots into outputs.
//!
//! | Operation         | Counters          | Holdings                                         |
//! |-------------------|-------------------|--------------------------------------------------|
//! | contribute(n)     | `sold += n`       | identity −n, base +n·price                       |
//! | refund(n)         | `refunded += n`   | identity +n, base −n·price                       |
//! | exchange(n)       | `exchanged += n`  | identity +n, reward −n                           |
//! | withdraw_funds(a) | unchanged         | base −a, split owner / dev; may terminate        |
//! | rebalance(±d)     | unchanged         | reward ±d                                        |
//! | withdraw_unsold(a)| unchanged         | reward −a                                        |

use crate::error::{ProtocolError, Result};
use crate::params::{BPS_DENOMINATOR, MIN_BOX_VALUE};
use crate::types::{ChainTime, Counters, EscrowSnapshot, EscrowState};

fn precondition<T>(reason: impl Into<String>) -> Result<T> {
    Err(ProtocolError::precondition(reason))
}

fn require_positive(amount: u64, what: &str) -> Result<()> {
    if amount == 0 {
        return precondition(format!("{what} must be positive"));
    }
    Ok(())
}

fn base_cost(snapshot: &EscrowSnapshot, receipts: u64) -> Result<u64> {
    receipts
        .checked_mul(snapshot.state.unit_price)
        .ok_or_else(|| ProtocolError::precondition("base-asset amount overflows"))
}

fn with_base_delta(mut snapshot: EscrowSnapshot, increase: bool, amount: u64) -> Result<EscrowSnapshot> {
    let slot = if snapshot.state.is_native_base() {
        &mut snapshot.value
    } else {
        &mut snapshot.base_amount
    };
    *slot = if increase {
        slot.checked_add(amount)
            .ok_or_else(|| ProtocolError::precondition("base-asset balance overflows"))?
    } else {
        slot.checked_sub(amount)
            .ok_or_else(|| ProtocolError::precondition("insufficient base-asset balance"))?
    };
    Ok(snapshot)
}

// ── Create ───────────────────────────────────────────────────────────

/// The escrow box a new project starts from: fresh counters, the identity
/// token minted as `total_reward_supply + 1`, and `reward_deposit` reward
/// tokens.
pub fn initial_snapshot(
    state: EscrowState,
    total_reward_supply: u64,
    reward_deposit: u64,
) -> Result<EscrowSnapshot> {
    state.constants.validate()?;
    if state.counters != Counters::default() {
        return precondition("a new project starts with zero counters");
    }
    require_positive(total_reward_supply, "total reward supply")?;
    require_positive(state.unit_price, "unit price")?;
    if state.minimum_threshold > total_reward_supply {
        return precondition(format!(
            "minimum of {} exceeds the total supply of {total_reward_supply}",
            state.minimum_threshold
        ));
    }
    let identity_amount = total_reward_supply
        .checked_add(1)
        .ok_or_else(|| ProtocolError::precondition("total reward supply overflows"))?;

    Ok(EscrowSnapshot {
        state,
        value: MIN_BOX_VALUE,
        identity_amount,
        reward_amount: reward_deposit,
        base_amount: 0,
    })
}

// ── Contributor operations ───────────────────────────────────────────

/// Sell `n` receipts.  After the deadline this is only possible once the
/// minimum is reached and receipts remain.
pub fn contribute(snapshot: &EscrowSnapshot, n: u64, now: &ChainTime) -> Result<EscrowSnapshot> {
    require_positive(n, "contribution")?;
    let state = &snapshot.state;
    if state.is_ended(now) && !state.minimum_reached() {
        return precondition("campaign ended without reaching its minimum");
    }
    let available = snapshot.receipts_available();
    if n > available {
        return precondition(format!("only {available} receipts left, {n} requested"));
    }
    let outstanding = state
        .counters
        .outstanding()
        .checked_add(n)
        .ok_or_else(|| ProtocolError::precondition("outstanding receipts overflow"))?;
    if snapshot.reward_amount < outstanding {
        return precondition(format!(
            "{} reward tokens cannot back {outstanding} outstanding receipts",
            snapshot.reward_amount
        ));
    }

    let cost = base_cost(snapshot, n)?;
    let mut next = with_base_delta(snapshot.clone(), true, cost)?;
    next.state.counters.sold = state
        .counters
        .sold
        .checked_add(n)
        .ok_or_else(|| ProtocolError::precondition("sold counter overflows"))?;
    next.identity_amount -= n;
    Ok(next)
}

/// Return `n` receipts for their base-asset price.  Only after a deadline
/// that passed below the minimum.
pub fn refund(snapshot: &EscrowSnapshot, n: u64, now: &ChainTime) -> Result<EscrowSnapshot> {
    require_positive(n, "refund")?;
    let state = &snapshot.state;
    if !state.is_ended(now) {
        return precondition("refunds open after the deadline");
    }
    if state.minimum_reached() {
        return precondition("the campaign reached its minimum; refunds are closed");
    }
    let outstanding = state.counters.outstanding();
    if n > outstanding {
        return precondition(format!("only {outstanding} receipts outstanding, {n} requested"));
    }

    let cost = base_cost(snapshot, n)?;
    if cost > snapshot.raised_balance() {
        return precondition("insufficient base-asset balance");
    }
    let mut next = with_base_delta(snapshot.clone(), false, cost)?;
    next.state.counters.refunded += n;
    next.identity_amount += n;
    Ok(next)
}

/// Convert `n` receipts into reward tokens.
pub fn exchange(snapshot: &EscrowSnapshot, n: u64) -> Result<EscrowSnapshot> {
    require_positive(n, "exchange")?;
    let outstanding = snapshot.state.counters.outstanding();
    if n > outstanding {
        return precondition(format!("only {outstanding} receipts outstanding, {n} requested"));
    }
    if n > snapshot.reward_amount {
        return precondition(format!(
            "only {} reward tokens held, {n} requested",
            snapshot.reward_amount
        ));
    }
    let mut next = snapshot.clone();
    next.state.counters.exchanged += n;
    next.identity_amount += n;
    next.reward_amount -= n;
    Ok(next)
}

// ── Owner operations ─────────────────────────────────────────────────

/// `(dev_share, owner_share)` of `amount`; the developer share is floored
/// and the owner receives the remainder.
pub fn split_dev_fee(amount: u64, dev_fee_bps: u32) -> (u64, u64) {
    let dev = (u128::from(amount) * u128::from(dev_fee_bps) / u128::from(BPS_DENOMINATOR)) as u64;
    let dev = dev.min(amount);
    (dev, amount - dev)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    /// The escrow box continues with a reduced balance.
    Replicated(EscrowSnapshot),
    /// The escrow box is spent without successor; its leftover holdings go
    /// to the owner.
    Terminated {
        identity_amount: u64,
        reward_amount: u64,
        residual_value: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub outcome: WithdrawalOutcome,
    pub owner_share: u64,
    pub dev_share: u64,
}

impl Withdrawal {
    pub fn successor(&self) -> Option<&EscrowSnapshot> {
        match &self.outcome {
            WithdrawalOutcome::Replicated(next) => Some(next),
            WithdrawalOutcome::Terminated { .. } => None,
        }
    }
}

/// Take `amount` of the raised base asset out of a successful campaign.
///
/// Withdrawing everything while no receipts circulate terminates the box.
pub fn withdraw_funds(snapshot: &EscrowSnapshot, amount: u64) -> Result<Withdrawal> {
    require_positive(amount, "withdrawal")?;
    let state = &snapshot.state;
    if !state.minimum_reached() {
        return precondition(format!(
            "net contributions of {} are below the minimum of {}",
            state.counters.net_contributed(),
            state.minimum_threshold
        ));
    }
    let raised = snapshot.raised_balance();
    if amount > raised {
        return precondition(format!("only {raised} available, {amount} requested"));
    }

    let (dev_share, owner_share) = split_dev_fee(amount, state.constants.dev_fee_bps);
    let outcome = if amount == raised && state.counters.outstanding() == 0 {
        let residual_value = if state.is_native_base() {
            snapshot.value - amount
        } else {
            snapshot.value
        };
        WithdrawalOutcome::Terminated {
            identity_amount: snapshot.identity_amount,
            reward_amount: snapshot.reward_amount,
            residual_value,
        }
    } else {
        WithdrawalOutcome::Replicated(with_base_delta(snapshot.clone(), false, amount)?)
    };

    Ok(Withdrawal {
        outcome,
        owner_share,
        dev_share,
    })
}

/// Add (`delta > 0`) or remove (`delta < 0`) reward tokens.  Removal never
/// touches tokens backing outstanding receipts.
pub fn rebalance(snapshot: &EscrowSnapshot, delta: i64) -> Result<EscrowSnapshot> {
    if delta == 0 {
        return precondition("rebalance amount must be non-zero");
    }
    let magnitude = delta.unsigned_abs();
    let mut next = snapshot.clone();
    if delta > 0 {
        next.reward_amount = snapshot
            .reward_amount
            .checked_add(magnitude)
            .ok_or_else(|| ProtocolError::precondition("reward balance overflows"))?;
    } else {
        next.reward_amount = take_unsold(snapshot, magnitude)?;
    }
    Ok(next)
}

/// Remove `amount` unsold reward tokens for the owner.
pub fn withdraw_unsold(snapshot: &EscrowSnapshot, amount: u64) -> Result<EscrowSnapshot> {
    require_positive(amount, "withdrawal")?;
    let mut next = snapshot.clone();
    next.reward_amount = take_unsold(snapshot, amount)?;
    Ok(next)
}

fn take_unsold(snapshot: &EscrowSnapshot, amount: u64) -> Result<u64> {
    let unsold = snapshot.unsold_reward_amount();
    if amount > unsold {
        return precondition(format!(
            "only {unsold} reward tokens are unsold, {amount} requested"
        ));
    }
    Ok(snapshot.reward_amount - amount)
}

// ── Successor check ──────────────────────────────────────────────────

/// Checks every replicated successor must satisfy against its predecessor.
pub fn check_transition(prev: &EscrowSnapshot, next: &EscrowSnapshot) -> Result<()> {
    if !prev.state.same_immutable_fields(&next.state) {
        return precondition("successor changes an immutable field");
    }
    let (a, b) = (&prev.state.counters, &next.state.counters);
    if b.sold < a.sold || b.refunded < a.refunded || b.exchanged < a.exchanged {
        return precondition(format!("counters decrease from {a:?} to {b:?}"));
    }
    if !b.is_consistent() {
        return precondition(format!("inconsistent counters {b:?}"));
    }
    match (prev.total_reward_supply(), next.total_reward_supply()) {
        (Some(a), Some(b)) if a == b => {}
        _ => return precondition("identity tokens no longer match outstanding receipts"),
    }
    if next.reward_amount < b.outstanding() {
        return precondition("reward tokens no longer cover outstanding receipts");
    }
    if next.value < MIN_BOX_VALUE {
        return precondition("successor holds less than the minimum box value");
    }
    Ok(())
}
