//! Contribution and refund.  One entry point: a positive amount buys
//! receipts, a negative one returns them.

use escrow_protocol::params::MIN_BOX_VALUE;
use escrow_protocol::rules;

use super::{finish, successor, BuildContext};
use crate::errors::{Result, ServiceError};
use crate::project::Project;
use crate::tx::{OutputCandidate, UnsignedTransaction};

pub fn build_contribute(
    ctx: &BuildContext<'_>,
    project: &Project,
    amount: i64,
) -> Result<UnsignedTransaction> {
    match amount {
        0 => Err(ServiceError::precondition("contribution must be non-zero")),
        n if n > 0 => build_purchase(ctx, project, n.unsigned_abs()),
        n => build_refund(ctx, project, n.unsigned_abs()),
    }
}

/// Sell `n` receipts to the wallet for `n × price` of the base asset.
fn build_purchase(ctx: &BuildContext<'_>, project: &Project, n: u64) -> Result<UnsignedTransaction> {
    let next = rules::contribute(&project.snapshot, n, &ctx.now)?;
    let receipts = OutputCandidate::new(MIN_BOX_VALUE, ctx.change_program.clone(), ctx.height()?)
        .with_token(project.token_id, n);

    let builder = ctx
        .spend_escrow(project)?
        .output(successor(ctx, project, &next)?)
        .output(receipts);
    finish(ctx, builder)
}

/// Return `n` receipts from the wallet; the released base asset lands in
/// the change output.
pub fn build_refund(ctx: &BuildContext<'_>, project: &Project, n: u64) -> Result<UnsignedTransaction> {
    let next = rules::refund(&project.snapshot, n, &ctx.now)?;
    let builder = ctx
        .spend_escrow(project)?
        .output(successor(ctx, project, &next)?);
    finish(ctx, builder)
}
