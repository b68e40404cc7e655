use proptest::prelude::*;

use crate::error::ProtocolError;
use crate::invariants::*;
use crate::params::MIN_BOX_VALUE;
use crate::rules::*;
use crate::types::*;

const SUPPLY: u64 = 1_000;
const DEADLINE: u64 = 100;

fn constants(dev_fee_bps: u32) -> ContractConstants {
    ContractConstants {
        owner_authorization: vec![0x00, 0x08, 0xcd, 0x02, 0x01],
        dev_authorization: vec![0x00, 0x08, 0xcd, 0x03, 0x02],
        dev_fee_bps,
        reward_token_id: TokenId([0xaa; 32]),
        base_asset_id: None,
    }
}

fn project(minimum: u64, price: u64) -> EscrowSnapshot {
    let state = EscrowState {
        version: ProtocolVersion::V1_1,
        deadline: Deadline::BlockHeight(DEADLINE),
        minimum_threshold: minimum,
        counters: Counters::default(),
        unit_price: price,
        constants: constants(500),
        content_blob: ProjectContent::default().to_blob(),
    };
    initial_snapshot(state, SUPPLY, SUPPLY).unwrap()
}

fn at(height: u64) -> ChainTime {
    ChainTime {
        height,
        timestamp_ms: 0,
    }
}

fn is_precondition<T: std::fmt::Debug>(r: crate::error::Result<T>) -> bool {
    matches!(r, Err(ProtocolError::PreconditionFailed(_)))
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn test_successful_campaign() {
    let start = project(500, 10);
    assert_identity_conserved(&start, SUPPLY);
    assert_eq!(start.value, MIN_BOX_VALUE);

    let funded = contribute(&start, 600, &at(50)).unwrap();
    assert_all(&start, &funded, SUPPLY, SUPPLY);
    assert_balance_matches_counters(&funded);
    assert_eq!(funded.raised_balance(), 6_000);
    assert!(funded.state.minimum_reached());
    assert!(funded.state.is_ended(&at(DEADLINE)));

    let withdrawal = withdraw_funds(&funded, 6_000).unwrap();
    assert_eq!(withdrawal.dev_share, 300);
    assert_eq!(withdrawal.owner_share, 5_700);

    // Receipts still circulate, so the box must survive.
    let drained = withdrawal.successor().cloned().unwrap();
    assert_eq!(drained.value, MIN_BOX_VALUE);
    check_transition(&funded, &drained).unwrap();

    let redeemed = exchange(&drained, 600).unwrap();
    assert_all(&drained, &redeemed, SUPPLY, SUPPLY);
    assert_eq!(redeemed.state.counters.outstanding(), 0);
    assert_eq!(redeemed.identity_amount, SUPPLY + 1);
    assert_eq!(redeemed.reward_amount, SUPPLY - 600);
}

#[test]
fn test_failed_campaign() {
    let start = project(500, 10);
    let partial = contribute(&start, 300, &at(10)).unwrap();

    assert!(is_precondition(refund(&partial, 300, &at(DEADLINE - 1))));
    assert!(is_precondition(contribute(&partial, 1, &at(DEADLINE))));

    let refunded = refund(&partial, 300, &at(DEADLINE)).unwrap();
    assert_all(&partial, &refunded, SUPPLY, SUPPLY);
    assert_balance_matches_counters(&refunded);
    assert_eq!(refunded.value, MIN_BOX_VALUE);
    assert_eq!(refunded.state.counters, Counters::new(300, 300, 0));

    assert!(is_precondition(withdraw_funds(&refunded, 1)));
}

#[test]
fn test_contribution_after_deadline_once_minimum_reached() {
    let funded = contribute(&project(500, 10), 500, &at(10)).unwrap();
    let late = contribute(&funded, 100, &at(DEADLINE + 50)).unwrap();
    assert_eq!(late.state.counters.sold, 600);

    let sold_out = contribute(&late, SUPPLY - 600, &at(DEADLINE + 60)).unwrap();
    assert_eq!(sold_out.receipts_available(), 0);
    assert!(is_precondition(contribute(&sold_out, 1, &at(DEADLINE + 61))));
}

#[test]
fn test_full_withdrawal_terminates_when_no_receipts_circulate() {
    let funded = contribute(&project(100, 10), 100, &at(10)).unwrap();
    let redeemed = exchange(&funded, 100).unwrap();

    let withdrawal = withdraw_funds(&redeemed, 1_000).unwrap();
    assert!(withdrawal.successor().is_none());
    assert_eq!(
        withdrawal.outcome,
        WithdrawalOutcome::Terminated {
            identity_amount: SUPPLY + 1,
            reward_amount: SUPPLY - 100,
            residual_value: MIN_BOX_VALUE,
        }
    );
}

#[test]
fn test_partial_withdrawal_replicates() {
    let funded = contribute(&project(100, 10), 100, &at(10)).unwrap();
    let withdrawal = withdraw_funds(&funded, 400).unwrap();
    let next = withdrawal.successor().unwrap();
    assert_eq!(next.raised_balance(), 600);
    assert_eq!(withdrawal.dev_share + withdrawal.owner_share, 400);
    assert!(is_precondition(withdraw_funds(next, 601)));
}

#[test]
fn test_dev_fee_rounding_floors() {
    assert_eq!(split_dev_fee(6_000, 500), (300, 5_700));
    assert_eq!(split_dev_fee(19, 500), (0, 19));
    assert_eq!(split_dev_fee(20, 500), (1, 19));
    assert_eq!(split_dev_fee(399, 500), (19, 380));
    assert_eq!(split_dev_fee(1, 10_000), (1, 0));
    assert_eq!(split_dev_fee(u64::MAX, 10_000), (u64::MAX, 0));
    assert_eq!(split_dev_fee(12_345, 0), (0, 12_345));
}

#[test]
fn test_rebalance_and_unsold_bounds() {
    let funded = contribute(&project(100, 10), 400, &at(10)).unwrap();
    assert_eq!(funded.unsold_reward_amount(), SUPPLY - 400);

    assert!(is_precondition(withdraw_unsold(&funded, SUPPLY - 399)));
    let trimmed = withdraw_unsold(&funded, SUPPLY - 400).unwrap();
    assert_eq!(trimmed.reward_amount, 400);
    check_transition(&funded, &trimmed).unwrap();

    assert!(is_precondition(rebalance(&trimmed, -1)));
    let topped = rebalance(&trimmed, 250).unwrap();
    assert_eq!(topped.reward_amount, 650);
    assert!(is_precondition(rebalance(&topped, 0)));
    assert_eq!(rebalance(&topped, -250).unwrap().reward_amount, 400);
}

#[test]
fn test_contribution_needs_reward_backing() {
    let thin = EscrowSnapshot {
        reward_amount: 10,
        ..project(5, 10)
    };
    assert!(contribute(&thin, 10, &at(1)).is_ok());
    assert!(is_precondition(contribute(&thin, 11, &at(1))));
}

#[test]
fn test_exchange_bounded_by_outstanding() {
    let funded = contribute(&project(100, 10), 50, &at(10)).unwrap();
    assert!(is_precondition(exchange(&funded, 51)));
    assert!(is_precondition(exchange(&funded, 0)));
}

#[test]
fn test_check_transition_rejects_tampering() {
    let start = project(100, 10);
    let funded = contribute(&start, 10, &at(10)).unwrap();

    let mut repriced = funded.clone();
    repriced.state.unit_price = 1;
    assert!(is_precondition(check_transition(&start, &repriced)));

    let mut leaked = funded.clone();
    leaked.identity_amount -= 1;
    assert!(is_precondition(check_transition(&start, &leaked)));

    let mut rewound = start.clone();
    rewound.state.counters.sold = 0;
    assert!(is_precondition(check_transition(&funded, &rewound)));
}

#[test]
fn test_oversized_holdings_fail_without_overflow() {
    let mut hostile = project(100, 10);
    hostile.state.counters = Counters::new(u64::MAX - 1, 0, 0);
    hostile.identity_amount = u64::MAX;
    assert_eq!(hostile.total_reward_supply(), None);
    assert!(is_precondition(check_transition(&hostile, &hostile)));

    hostile.reward_amount = u64::MAX;
    assert!(is_precondition(contribute(&hostile, 2, &at(10))));
}

// ── Properties ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Contribute(u64),
    Refund(u64),
    Exchange(u64),
    Advance(u64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u64..200).prop_map(Step::Contribute),
        (1u64..200).prop_map(Step::Refund),
        (1u64..200).prop_map(Step::Exchange),
        (1u64..60).prop_map(Step::Advance),
    ]
}

proptest! {
    #[test]
    fn counters_and_tokens_are_conserved(
        minimum in 0u64..SUPPLY,
        price in 1u64..1_000,
        steps in prop::collection::vec(step(), 1..40),
    ) {
        let mut current = project(minimum, price);
        let mut height = 0u64;
        for s in steps {
            let attempt = match s {
                Step::Contribute(n) => contribute(&current, n, &at(height)),
                Step::Refund(n) => refund(&current, n, &at(height)),
                Step::Exchange(n) => exchange(&current, n),
                Step::Advance(h) => {
                    height += h;
                    continue;
                }
            };
            match attempt {
                Ok(next) => {
                    assert_all(&current, &next, SUPPLY, SUPPLY);
                    assert_balance_matches_counters(&next);
                    prop_assert!(check_transition(&current, &next).is_ok());
                    current = next;
                }
                Err(e) => prop_assert!(matches!(e, ProtocolError::PreconditionFailed(_))),
            }
        }
    }
}
