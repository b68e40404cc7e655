//! Operation builders: one escrow box in, one unsigned transaction out.
//!
//! Every builder spends the escrow box as `INPUTS(0)` and, unless the box
//! terminates, places its successor at `OUTPUTS(0)`.  The business rule
//! itself comes from [`escrow_protocol::rules`]; this layer only lays the
//! result out as outputs and funds the transaction from the wallet.
//!
//! | Builder                          | Wallet supplies                       |
//! |----------------------------------|---------------------------------------|
//! | [`create::build_mint`]           | fee, box values, reward deposit       |
//! | [`contribute::build_contribute`] | base asset (n × price) and fee        |
//! | [`exchange::build_exchange`]     | receipts and fee                      |
//! | [`withdraw::build_withdraw`]     | fee                                   |
//! | [`rebalance::build_rebalance`]   | reward tokens when adding, fee        |

pub mod contribute;
pub mod create;
pub mod exchange;
pub mod rebalance;
pub mod withdraw;

use escrow_protocol::{registers, BoxSizeModel, ChainTime, EscrowSnapshot};

use crate::errors::{Result, ServiceError};
use crate::project::Project;
use crate::reservation::ReservationGuard;
use crate::tx::{LedgerBox, OutputCandidate, TxBuilder, UnsignedTransaction};

/// What a builder needs from the caller's side of the world.
pub struct BuildContext<'a> {
    pub now: ChainTime,
    /// Program of the signing wallet; change and contributor outputs go here.
    pub change_program: Vec<u8>,
    pub wallet: &'a [LedgerBox],
    pub guard: &'a ReservationGuard,
    pub size_model: BoxSizeModel,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        now: ChainTime,
        change_program: Vec<u8>,
        wallet: &'a [LedgerBox],
        guard: &'a ReservationGuard,
    ) -> Self {
        Self {
            now,
            change_program,
            wallet,
            guard,
            size_model: BoxSizeModel::default(),
        }
    }

    pub fn height(&self) -> Result<u32> {
        u32::try_from(self.now.height)
            .map_err(|_| ServiceError::BadRequest(format!("height {} out of range", self.now.height)))
    }

    fn tx(&self) -> Result<TxBuilder> {
        Ok(TxBuilder::new(self.height()?, self.change_program.clone()))
    }

    /// Fail early when the escrow box is committed to another operation.
    fn ensure_unreserved(&self, project: &Project) -> Result<()> {
        if self.guard.is_reserved(&project.box_id()) {
            return Err(ServiceError::BoxReserved(project.box_id().to_string()));
        }
        Ok(())
    }

    /// A transaction spending `project`'s escrow box first.
    fn spend_escrow(&self, project: &Project) -> Result<TxBuilder> {
        self.ensure_unreserved(project)?;
        Ok(self.tx()?.input(project.escrow_box.clone()))
    }

    fn is_owner(&self, project: &Project) -> bool {
        self.change_program == project.snapshot.state.constants.owner_authorization
    }
}

/// The box `snapshot` is stored in, under `program`.  Tokens are laid out
/// identity, reward, base; empty holdings are left out.
pub fn escrow_output(
    ctx: &BuildContext<'_>,
    program: &[u8],
    identity: escrow_protocol::TokenId,
    snapshot: &EscrowSnapshot,
) -> Result<OutputCandidate> {
    let regs = registers::encode(&snapshot.state)?;
    let constants = &snapshot.state.constants;
    let mut output = OutputCandidate::new(snapshot.value, program.to_vec(), ctx.height()?)
        .with_token(identity, snapshot.identity_amount)
        .with_token(constants.reward_token_id, snapshot.reward_amount);
    if let Some(base) = constants.base_asset_id {
        output = output.with_token(base, snapshot.base_amount);
    }

    let size = ctx
        .size_model
        .estimate(program.len(), output.assets.len(), &regs)?;
    ctx.size_model.report(size).into_result()?;
    Ok(output.with_registers(regs.to_hex_map()?))
}

/// Successor of `project`'s escrow box holding `next`.
fn successor(
    ctx: &BuildContext<'_>,
    project: &Project,
    next: &EscrowSnapshot,
) -> Result<OutputCandidate> {
    escrow_protocol::rules::check_transition(&project.snapshot, next)?;
    escrow_output(ctx, &project.escrow_box.ergo_tree, project.token_id, next)
}

/// Fund from the wallet with at least one wallet input, then balance.
fn finish(ctx: &BuildContext<'_>, builder: TxBuilder) -> Result<UnsignedTransaction> {
    builder.fund_from(ctx.wallet, ctx.guard, true)?.build()
}

#[cfg(test)]
pub(crate) mod test_support {
    use escrow_protocol::ChainTime;

    use super::*;
    use crate::tx::fixtures::{wallet_box, wallet_program};
    use crate::tx::Token;

    pub const ERG: u64 = 1_000_000_000;

    pub fn before_deadline() -> ChainTime {
        ChainTime {
            height: 800,
            timestamp_ms: 0,
        }
    }

    pub fn after_deadline() -> ChainTime {
        ChainTime {
            height: 1_200,
            timestamp_ms: 0,
        }
    }

    pub fn funded_wallet(extra: Vec<Token>) -> Vec<LedgerBox> {
        vec![wallet_box(0xa1, 10 * ERG, extra), wallet_box(0xa2, 10 * ERG, vec![])]
    }

    pub fn context<'a>(
        now: ChainTime,
        wallet: &'a [LedgerBox],
        guard: &'a ReservationGuard,
    ) -> BuildContext<'a> {
        BuildContext::new(now, wallet_program(), wallet, guard)
    }

    pub fn token_total(outputs: &[OutputCandidate], id: &escrow_protocol::TokenId) -> u64 {
        outputs
            .iter()
            .flat_map(|o| &o.assets)
            .filter(|t| t.token_id == *id)
            .map(|t| t.amount)
            .sum()
    }
}
