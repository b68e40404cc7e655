//! Owner withdrawal of raised funds with the developer fee split off.
//!
//! Outputs, in order: escrow successor (unless terminated), owner share,
//! developer share (omitted when it rounds to zero).  On termination the
//! owner output also takes the leftover identity and reward tokens and the
//! escrow box's residual value.

use escrow_protocol::params::MIN_BOX_VALUE;
use escrow_protocol::{rules, WithdrawalOutcome};
use tracing::info;

use super::{finish, successor, BuildContext};
use crate::errors::Result;
use crate::project::Project;
use crate::tx::{OutputCandidate, UnsignedTransaction};

/// A payout of `share` base asset to `program`.
fn payout(
    ctx: &BuildContext<'_>,
    project: &Project,
    program: &[u8],
    share: u64,
    extra_value: u64,
) -> Result<OutputCandidate> {
    let height = ctx.height()?;
    Ok(match project.snapshot.state.constants.base_asset_id {
        None => OutputCandidate::new(share + extra_value, program.to_vec(), height),
        Some(base) => OutputCandidate::new(MIN_BOX_VALUE + extra_value, program.to_vec(), height)
            .with_token(base, share),
    })
}

pub fn build_withdraw(
    ctx: &BuildContext<'_>,
    project: &Project,
    amount: u64,
) -> Result<UnsignedTransaction> {
    let withdrawal = rules::withdraw_funds(&project.snapshot, amount)?;
    let constants = &project.snapshot.state.constants;
    let mut builder = ctx.spend_escrow(project)?;

    let owner = match &withdrawal.outcome {
        WithdrawalOutcome::Replicated(next) => {
            builder = builder.output(successor(ctx, project, next)?);
            payout(ctx, project, &constants.owner_authorization, withdrawal.owner_share, 0)?
        }
        WithdrawalOutcome::Terminated {
            identity_amount,
            reward_amount,
            residual_value,
        } => {
            info!("withdrawal empties project {}; terminating its box", project.token_id);
            payout(
                ctx,
                project,
                &constants.owner_authorization,
                withdrawal.owner_share,
                *residual_value,
            )?
            .with_token(project.token_id, *identity_amount)
            .with_token(constants.reward_token_id, *reward_amount)
        }
    };
    builder = builder.output(owner);

    if withdrawal.dev_share > 0 {
        builder = builder.output(payout(
            ctx,
            project,
            &constants.dev_authorization,
            withdrawal.dev_share,
            0,
        )?);
    }
    finish(ctx, builder)
}
