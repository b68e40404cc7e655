//! Receipt → reward token exchange.

use escrow_protocol::rules;

use super::{finish, successor, BuildContext};
use crate::errors::Result;
use crate::project::Project;
use crate::tx::UnsignedTransaction;

/// Hand `n` receipts from the wallet to the escrow box; `n` reward tokens
/// come back in the change output.
pub fn build_exchange(ctx: &BuildContext<'_>, project: &Project, n: u64) -> Result<UnsignedTransaction> {
    let next = rules::exchange(&project.snapshot, n)?;
    let builder = ctx
        .spend_escrow(project)?
        .output(successor(ctx, project, &next)?);
    finish(ctx, builder)
}
