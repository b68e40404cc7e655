//! Project creation in two transactions.
//!
//! 1. **Mint**: wallet inputs → mint box holding the freshly minted identity
//!    token (`total + 1` units, id = first input's box id), the reward
//!    deposit and the initial registers.  The mint box carries one extra fee
//!    so step 2 needs nothing from the wallet.
//! 2. **Deposit**: mint box → escrow box.  The mint program only checks the
//!    output lands under the escrow program, so this transaction needs no
//!    signature.

use std::collections::HashSet;

use escrow_protocol::params::{MIN_BOX_VALUE, TX_FEE};
use escrow_protocol::{registers, rules, EscrowSnapshot, EscrowState, TokenId};
use tracing::debug;

use super::{escrow_output, BuildContext};
use crate::errors::{Result, ServiceError};
use crate::tx::{select_inputs, LedgerBox, OutputCandidate, TxBuilder, UnsignedTransaction};

/// Tokens held by the mint box: identity and reward.
const MINT_BOX_TOKENS: usize = 2;

#[derive(Debug, Clone)]
pub struct MintPlan {
    pub tx: UnsignedTransaction,
    pub identity: TokenId,
    /// The escrow box the deposit step will produce.
    pub snapshot: EscrowSnapshot,
}

pub fn build_mint(
    ctx: &BuildContext<'_>,
    escrow_program: &[u8],
    mint_program: &[u8],
    draft: EscrowState,
    total_reward_supply: u64,
    reward_deposit: u64,
) -> Result<MintPlan> {
    if reward_deposit == 0 {
        return Err(ServiceError::precondition("reward deposit must be positive"));
    }
    let snapshot = rules::initial_snapshot(draft, total_reward_supply, reward_deposit)?;

    // Both boxes carry the same registers; check the larger program too.
    let placeholder = TokenId([0; 32]);
    escrow_output(ctx, escrow_program, placeholder, &snapshot)?;
    let regs = registers::encode(&snapshot.state)?;
    let mint_size = ctx
        .size_model
        .estimate(mint_program.len(), MINT_BOX_TOKENS, &regs)?;
    ctx.size_model.report(mint_size).into_result()?;

    let mint_value = MIN_BOX_VALUE + TX_FEE;
    let reward_id = snapshot.state.constants.reward_token_id;
    let inputs = select_inputs(
        ctx.wallet,
        ctx.guard,
        &HashSet::new(),
        mint_value + TX_FEE + MIN_BOX_VALUE,
        &[(reward_id, reward_deposit)],
    )?;
    let identity = inputs
        .first()
        .map(|b| TokenId::from(b.box_id))
        .ok_or_else(|| ServiceError::precondition("wallet holds no spendable boxes"))?;
    debug!("minting identity token {identity}");

    let mint_box = OutputCandidate::new(mint_value, mint_program.to_vec(), ctx.height()?)
        .with_token(identity, snapshot.identity_amount)
        .with_token(reward_id, reward_deposit)
        .with_registers(regs.to_hex_map()?);

    let tx = inputs
        .into_iter()
        .fold(ctx.tx()?, TxBuilder::input)
        .output(mint_box)
        .build()?;

    Ok(MintPlan {
        tx,
        identity,
        snapshot,
    })
}

/// Move the confirmed or mempool `mint_box` under the escrow program.
pub fn build_deposit(
    height: u32,
    escrow_program: &[u8],
    mint_box: &LedgerBox,
) -> Result<UnsignedTransaction> {
    let value = mint_box
        .value
        .checked_sub(TX_FEE)
        .filter(|v| *v >= MIN_BOX_VALUE)
        .ok_or_else(|| {
            ServiceError::precondition(format!(
                "mint box holds {}, at least {} needed",
                mint_box.value,
                MIN_BOX_VALUE + TX_FEE
            ))
        })?;

    let escrow_box = OutputCandidate {
        value,
        ergo_tree: escrow_program.to_vec(),
        assets: mint_box.assets.clone(),
        additional_registers: mint_box.additional_registers.clone(),
        creation_height: height,
    };
    TxBuilder::new(height, Vec::new())
        .input(mint_box.clone())
        .output(escrow_box)
        .build()
}

#[cfg(test)]
mod tests {
    use escrow_protocol::ProtocolVersion::V2_0;
    use escrow_protocol::{Counters, ProjectContent};

    use super::*;
    use crate::builders::test_support::*;
    use crate::reconstructor::decode_project;
    use crate::reconstructor::fixtures::{escrow_program, state, REWARD};
    use crate::reservation::ReservationGuard;
    use crate::tx::{Token, FEE_PROGRAM_HEX};

    fn mint_program() -> Vec<u8> {
        vec![0x10, 0x01, 0x0e, 0x20, 0xaa, 0xd1, 0x93]
    }

    #[test]
    fn mint_then_deposit_yields_a_fresh_escrow_box() {
        let wallet = funded_wallet(vec![Token::new(REWARD, 5_000)]);
        let guard = ReservationGuard::new();
        let ctx = context(before_deadline(), &wallet, &guard);

        let plan = build_mint(
            &ctx,
            &escrow_program(),
            &mint_program(),
            state(V2_0, None),
            1_000,
            1_000,
        )
        .unwrap();
        assert_eq!(plan.identity, TokenId::from(plan.tx.inputs[0].box_id));

        let minted = &plan.tx.outputs[0];
        assert_eq!(minted.value, MIN_BOX_VALUE + TX_FEE);
        assert_eq!(minted.assets[0], Token::new(plan.identity, 1_001));
        assert_eq!(minted.assets[1], Token::new(REWARD, 1_000));
        // leftover reward tokens return as change
        assert_eq!(token_total(&plan.tx.outputs[1..], &REWARD), 4_000);

        let mint_box = LedgerBox {
            box_id: escrow_protocol::BoxId([0xee; 32]),
            value: minted.value,
            ergo_tree: minted.ergo_tree.clone(),
            assets: minted.assets.clone(),
            additional_registers: minted.additional_registers.clone(),
            creation_height: minted.creation_height,
            transaction_id: None,
            index: Some(0),
        };
        let deposit = build_deposit(800, &escrow_program(), &mint_box).unwrap();
        assert_eq!(deposit.inputs.len(), 1);
        assert_eq!(deposit.outputs.len(), 2);
        assert_eq!(deposit.outputs[0].value, MIN_BOX_VALUE);
        assert_eq!(hex::encode(&deposit.outputs[1].ergo_tree), FEE_PROGRAM_HEX);

        let escrow = LedgerBox {
            box_id: escrow_protocol::BoxId([0xef; 32]),
            ergo_tree: escrow_program(),
            value: deposit.outputs[0].value,
            ..mint_box
        };
        let project = decode_project(&escrow, V2_0).unwrap();
        assert_eq!(project.token_id, plan.identity);
        assert_eq!(project.snapshot.state.counters, Counters::default());
        assert_eq!(project.total_reward_supply(), 1_000);
        assert_eq!(project.snapshot, plan.snapshot);
    }

    #[test]
    fn zero_deposit_is_refused() {
        let wallet = funded_wallet(vec![]);
        let guard = ReservationGuard::new();
        let ctx = context(before_deadline(), &wallet, &guard);
        let err = build_mint(&ctx, &escrow_program(), &mint_program(), state(V2_0, None), 1_000, 0)
            .unwrap_err();
        assert!(err.to_string().contains("reward deposit"));
    }

    #[test]
    fn oversized_content_is_infeasible() {
        let wallet = funded_wallet(vec![Token::new(REWARD, 5_000)]);
        let guard = ReservationGuard::new();
        let ctx = context(before_deadline(), &wallet, &guard);
        let mut draft = state(V2_0, None);
        draft.content_blob = ProjectContent {
            description: "x".repeat(5_000),
            ..ProjectContent::default()
        }
        .to_blob();
        let err = build_mint(&ctx, &escrow_program(), &mint_program(), draft, 1_000, 1_000)
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InfeasibleSize);
    }

    #[test]
    fn missing_reward_tokens_fail_before_minting() {
        let wallet = funded_wallet(vec![Token::new(REWARD, 10)]);
        let guard = ReservationGuard::new();
        let ctx = context(before_deadline(), &wallet, &guard);
        let err = build_mint(
            &ctx,
            &escrow_program(),
            &mint_program(),
            state(V2_0, None),
            1_000,
            1_000,
        )
        .unwrap_err();
        assert!(err.to_string().contains("lacks 990 units"));
    }
}
