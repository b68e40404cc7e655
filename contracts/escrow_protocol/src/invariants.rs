// Assertion helpers shared by the lifecycle tests.

use crate::types::EscrowSnapshot;

/// Counters never run backwards between two observations of the same box.
pub fn assert_counters_monotonic(prev: &EscrowSnapshot, next: &EscrowSnapshot) {
    let (a, b) = (&prev.state.counters, &next.state.counters);
    assert!(b.sold >= a.sold, "sold went from {} to {}", a.sold, b.sold);
    assert!(
        b.refunded >= a.refunded,
        "refunded went from {} to {}",
        a.refunded,
        b.refunded
    );
    assert!(
        b.exchanged >= a.exchanged,
        "exchanged went from {} to {}",
        a.exchanged,
        b.exchanged
    );
    assert!(
        b.refunded <= b.sold,
        "net contribution negative: sold {} refunded {}",
        b.sold,
        b.refunded
    );
}

/// Identity tokens held plus receipts in circulation equal the minted supply.
pub fn assert_identity_conserved(snapshot: &EscrowSnapshot, total_reward_supply: u64) {
    let outstanding = snapshot.state.counters.outstanding();
    assert_eq!(
        snapshot.identity_amount + outstanding,
        total_reward_supply + 1,
        "identity {} + outstanding {} != 1 + supply {}",
        snapshot.identity_amount,
        outstanding,
        total_reward_supply
    );
}

/// Reward tokens held plus the ones handed out by exchange equal what was
/// deposited.
pub fn assert_reward_conserved(snapshot: &EscrowSnapshot, deposited: u64) {
    assert_eq!(
        snapshot.reward_amount + snapshot.state.counters.exchanged,
        deposited,
        "reward {} + exchanged {} != deposited {}",
        snapshot.reward_amount,
        snapshot.state.counters.exchanged,
        deposited
    );
}

/// The raised balance equals the receipts still paid for.
pub fn assert_balance_matches_counters(snapshot: &EscrowSnapshot) {
    let paid = snapshot.state.counters.net_contributed() * snapshot.state.unit_price;
    assert_eq!(
        snapshot.raised_balance(),
        paid,
        "raised {} but {} receipts paid at {}",
        snapshot.raised_balance(),
        snapshot.state.counters.net_contributed(),
        snapshot.state.unit_price
    );
}

pub fn assert_all(prev: &EscrowSnapshot, next: &EscrowSnapshot, supply: u64, deposited: u64) {
    assert_counters_monotonic(prev, next);
    assert_identity_conserved(next, supply);
    assert_reward_conserved(next, deposited);
}
