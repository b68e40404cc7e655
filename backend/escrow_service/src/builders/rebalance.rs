//! Owner-only reward supply changes.

use escrow_protocol::{rules, EscrowSnapshot};

use super::{finish, successor, BuildContext};
use crate::errors::{Result, ServiceError};
use crate::project::Project;
use crate::tx::UnsignedTransaction;

fn owner_only(ctx: &BuildContext<'_>, project: &Project, action: &str) -> Result<()> {
    if !ctx.is_owner(project) {
        return Err(ServiceError::precondition(format!(
            "only the project owner may {action}"
        )));
    }
    Ok(())
}

fn replicate(
    ctx: &BuildContext<'_>,
    project: &Project,
    next: &EscrowSnapshot,
) -> Result<UnsignedTransaction> {
    let builder = ctx
        .spend_escrow(project)?
        .output(successor(ctx, project, next)?);
    finish(ctx, builder)
}

/// Add (`delta > 0`) reward tokens from the wallet or take (`delta < 0`)
/// unsold ones back into it.
pub fn build_rebalance(
    ctx: &BuildContext<'_>,
    project: &Project,
    delta: i64,
) -> Result<UnsignedTransaction> {
    owner_only(ctx, project, "rebalance the reward supply")?;
    let next = rules::rebalance(&project.snapshot, delta)?;
    replicate(ctx, project, &next)
}

pub fn build_withdraw_unsold(
    ctx: &BuildContext<'_>,
    project: &Project,
    amount: u64,
) -> Result<UnsignedTransaction> {
    owner_only(ctx, project, "withdraw unsold reward tokens")?;
    let next = rules::withdraw_unsold(&project.snapshot, amount)?;
    replicate(ctx, project, &next)
}

#[cfg(test)]
mod tests {
    use escrow_protocol::ProtocolVersion::V1_1;

    use super::*;
    use crate::builders::test_support::*;
    use crate::errors::ErrorKind;
    use crate::reconstructor::fixtures::{dev_program, project, snapshot, state, REWARD};
    use crate::reservation::ReservationGuard;
    use crate::tx::Token;

    #[test]
    fn owner_adds_and_removes_rewards() {
        let p = project(snapshot(state(V1_1, None), 600, 1_000), 1);
        let wallet = funded_wallet(vec![Token::new(REWARD, 500)]);
        let guard = ReservationGuard::new();
        let ctx = context(before_deadline(), &wallet, &guard);

        let added = build_rebalance(&ctx, &p, 300).unwrap();
        assert_eq!(added.outputs[0].assets[1], Token::new(REWARD, 1_300));
        assert_eq!(token_total(&added.outputs[1..], &REWARD), 200);

        let removed = build_rebalance(&ctx, &p, -400).unwrap();
        assert_eq!(removed.outputs[0].assets[1], Token::new(REWARD, 600));
        assert_eq!(token_total(&removed.outputs[1..], &REWARD), 400);
    }

    #[test]
    fn removal_is_bounded_by_unsold() {
        let p = project(snapshot(state(V1_1, None), 600, 1_000), 1);
        let wallet = funded_wallet(vec![]);
        let guard = ReservationGuard::new();
        let ctx = context(after_deadline(), &wallet, &guard);

        let err = build_withdraw_unsold(&ctx, &p, 401).unwrap_err();
        assert!(err.to_string().contains("only 400 reward tokens are unsold"));
        let tx = build_withdraw_unsold(&ctx, &p, 400).unwrap();
        assert_eq!(tx.outputs[0].assets[1], Token::new(REWARD, 600));
    }

    #[test]
    fn strangers_are_refused() {
        let p = project(snapshot(state(V1_1, None), 600, 1_000), 1);
        let wallet = funded_wallet(vec![]);
        let guard = ReservationGuard::new();
        let mut ctx = context(before_deadline(), &wallet, &guard);
        ctx.change_program = dev_program();

        let err = build_rebalance(&ctx, &p, -1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert!(build_withdraw_unsold(&ctx, &p, 1).is_err());
    }
}
