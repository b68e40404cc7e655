//! # Box feasibility
//!
//! Estimates the serialized size of the boxes a project creates and rejects
//! configurations above [`MAX_BOX_SIZE`](crate::params::MAX_BOX_SIZE).
//!
//! ```text
//! size = base_overhead
//!      + program_len
//!      + per_token * token_count
//!      + Σ (register_bytes + per_register_overhead)
//!      + safety_margin
//! ```
//!
//! Register bytes come from the real encoding of each slot, so growth of the
//! content blob in R9 is tracked byte for byte.
//!
//! A project produces two boxes with the same registers: the mint box (mint
//! program, identity + reward tokens) and the escrow box (escrow program,
//! plus the base token when one is configured).  The mint program depends on
//! the escrow program hash, so the escrow program is always resolved first.
//! The reported estimate is the larger of the two boxes.

use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::params::MAX_BOX_SIZE;
use crate::registers::{encode, Registers};
use crate::types::{EscrowState, ProjectContent};
use crate::variants::ContractResolver;

/// Tokens the mint box holds: identity and reward.
const MINT_BOX_TOKENS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxSizeModel {
    /// Value, creation height, transaction reference and counts.
    pub base_overhead: usize,
    pub per_token: usize,
    pub per_register_overhead: usize,
    pub safety_margin: usize,
    pub max_box_size: usize,
}

impl Default for BoxSizeModel {
    fn default() -> Self {
        Self {
            base_overhead: 50,
            per_token: 40,
            per_register_overhead: 1,
            safety_margin: 64,
            max_box_size: MAX_BOX_SIZE,
        }
    }
}

impl BoxSizeModel {
    pub fn estimate(
        &self,
        program_len: usize,
        token_count: usize,
        registers: &Registers,
    ) -> Result<usize> {
        let register_bytes: usize = registers
            .serialized_sizes()?
            .into_iter()
            .map(|len| len + self.per_register_overhead)
            .sum();
        Ok(self.base_overhead
            + program_len
            + self.per_token * token_count
            + register_bytes
            + self.safety_margin)
    }

    pub fn report(&self, estimated_size: usize) -> ValidationReport {
        let max = self.max_box_size;
        if estimated_size <= max {
            let remaining = max - estimated_size;
            ValidationReport {
                is_valid: true,
                estimated_size,
                remaining_capacity: remaining,
                max_size: max,
                message: format!("{remaining} bytes remaining"),
            }
        } else {
            let excess = estimated_size - max;
            ValidationReport {
                is_valid: false,
                estimated_size,
                remaining_capacity: 0,
                max_size: max,
                message: format!(
                    "box would exceed the {max}-byte limit by {excess} bytes; shorten the content"
                ),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub estimated_size: usize,
    pub remaining_capacity: usize,
    pub max_size: usize,
    pub message: String,
}

impl ValidationReport {
    pub fn excess(&self) -> usize {
        self.estimated_size.saturating_sub(self.max_size)
    }

    pub fn into_result(self) -> Result<Self> {
        if self.is_valid {
            Ok(self)
        } else {
            Err(ProtocolError::InfeasibleSize {
                excess: self.excess(),
            })
        }
    }
}

/// Size validator bound to one project's resolved programs.
#[derive(Debug, Clone)]
pub struct FeasibilityValidator {
    model: BoxSizeModel,
    draft: EscrowState,
    escrow_program_len: usize,
    mint_program_len: usize,
}

impl FeasibilityValidator {
    /// Resolve the escrow program for `draft`, then the mint program bound to
    /// it, and keep both sizes.
    pub async fn for_constants(resolver: &ContractResolver, draft: EscrowState) -> Result<Self> {
        let escrow = resolver.resolve(draft.version, &draft.constants).await?;
        let mint = resolver.resolve_mint(&escrow).await?;
        Ok(Self::with_program_sizes(
            BoxSizeModel::default(),
            draft,
            escrow.program_bytes.len(),
            mint.program_bytes.len(),
        ))
    }

    pub fn with_program_sizes(
        model: BoxSizeModel,
        draft: EscrowState,
        escrow_program_len: usize,
        mint_program_len: usize,
    ) -> Self {
        Self {
            model,
            draft,
            escrow_program_len,
            mint_program_len,
        }
    }

    /// Check the draft project with `content` in R9.
    pub fn validate(&self, content: &ProjectContent) -> Result<ValidationReport> {
        let state = EscrowState {
            content_blob: content.to_blob(),
            ..self.draft.clone()
        };
        self.validate_state(&state)
    }

    /// Check an arbitrary state against this project's programs.
    pub fn validate_state(&self, state: &EscrowState) -> Result<ValidationReport> {
        let registers = encode(state)?;
        let escrow = self
            .model
            .estimate(self.escrow_program_len, state.token_slots(), &registers)?;
        let mint = self
            .model
            .estimate(self.mint_program_len, MINT_BOX_TOKENS, &registers)?;
        let report = self.model.report(escrow.max(mint));
        tracing::debug!(
            escrow_size = escrow,
            mint_size = mint,
            valid = report.is_valid,
            "box size estimate"
        );
        Ok(report)
    }
}
