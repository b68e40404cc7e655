//! Escrow box → [`Project`].
//!
//! [`decode_project`] is pure: registers, token layout and the constants
//! cross-check.  [`Reconstructor`] adds the program check and the
//! token-metadata lookups, and [`ProjectIndex`] merges results across
//! search pages keyed by identity token so a box seen twice is reported
//! once.
//!
//! The explorer search matches a program *template*, so any box whose
//! program shares the template's shape is returned, whatever constants it
//! was compiled with.  A box is only taken as a project when its program is
//! exactly the one its own R8 constants resolve to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use escrow_protocol::{
    registers, ContractConstants, ContractResolver, EscrowSnapshot, ProjectContent,
    ProtocolError, ProtocolVersion, Registers, TokenId,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::explorer::LedgerSearch;
use crate::project::Project;
use crate::tx::LedgerBox;

fn mismatch(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::precondition(format!("token layout: {}", reason.into()))
}

/// Decode `escrow_box` as a `version` escrow box.
pub fn decode_project(escrow_box: &LedgerBox, version: ProtocolVersion) -> Result<Project> {
    let regs = Registers::from_hex_map(&escrow_box.additional_registers)?;
    let state = registers::decode(&regs, version)?;

    let identity = escrow_box
        .assets
        .first()
        .ok_or_else(|| mismatch("box holds no identity token"))?;
    let token_id = identity.token_id;
    let reward_id = state.constants.reward_token_id;
    let base_id = state.constants.base_asset_id;
    if token_id == reward_id || Some(token_id) == base_id {
        return Err(mismatch("identity token collides with a configured token").into());
    }

    let mut reward_amount = None;
    let mut base_amount = None;
    for token in &escrow_box.assets[1..] {
        let slot = if token.token_id == reward_id {
            &mut reward_amount
        } else if Some(token.token_id) == base_id {
            &mut base_amount
        } else if token.token_id == token_id {
            return Err(mismatch("identity token listed twice").into());
        } else {
            return Err(mismatch(format!("unexpected token {}", token.token_id)).into());
        };
        if slot.replace(token.amount).is_some() {
            return Err(mismatch(format!("token {} listed twice", token.token_id)).into());
        }
    }

    let content = ProjectContent::parse_or_placeholder(&state.content_blob, &token_id.to_hex());
    let snapshot = EscrowSnapshot {
        state,
        value: escrow_box.value,
        identity_amount: identity.amount,
        reward_amount: reward_amount.unwrap_or(0),
        base_amount: base_amount.unwrap_or(0),
    };
    let total_reward_supply = snapshot.total_reward_supply().ok_or_else(|| {
        mismatch(format!(
            "identity holdings {} and {} outstanding receipts exceed any minted supply",
            snapshot.identity_amount,
            snapshot.state.counters.outstanding()
        ))
    })?;

    Ok(Project {
        token_id,
        escrow_box: escrow_box.clone(),
        snapshot,
        content,
        reward_token: None,
        total_reward_supply,
    })
}

type ProgramKey = (ProtocolVersion, Vec<u8>);

pub struct Reconstructor {
    search: Arc<dyn LedgerSearch>,
    resolver: ContractResolver,
    /// Compiled escrow programs by version and constants blob.
    programs: Mutex<HashMap<ProgramKey, Vec<u8>>>,
}

impl Reconstructor {
    pub fn new(search: Arc<dyn LedgerSearch>, resolver: ContractResolver) -> Self {
        Self {
            search,
            resolver,
            programs: Mutex::new(HashMap::new()),
        }
    }

    async fn escrow_program(
        &self,
        version: ProtocolVersion,
        constants: &ContractConstants,
    ) -> Result<Vec<u8>> {
        let key = (version, constants.to_blob());
        if let Some(program) = self.programs.lock().get(&key) {
            return Ok(program.clone());
        }
        let program = self.resolver.resolve(version, constants).await?.program_bytes;
        self.programs.lock().insert(key, program.clone());
        Ok(program)
    }

    /// Decode, check the box's program against the one its constants
    /// resolve to, check the identity emission against the counters when
    /// the ledger reports it, and attach the reward token's metadata.
    pub async fn reconstruct(
        &self,
        escrow_box: &LedgerBox,
        version: ProtocolVersion,
    ) -> Result<Project> {
        let mut project = decode_project(escrow_box, version)?;

        let expected_program = self
            .escrow_program(version, &project.snapshot.state.constants)
            .await?;
        if escrow_box.ergo_tree != expected_program {
            return Err(ProtocolError::precondition(format!(
                "program of box {} is not the {version} escrow for its constants",
                escrow_box.box_id
            ))
            .into());
        }

        match self.search.get_token_metadata(&project.token_id).await {
            Ok(meta) => {
                let expected = project.total_reward_supply().saturating_add(1);
                if let Some(emitted) = meta.emission_amount {
                    if emitted != expected {
                        return Err(mismatch(format!(
                            "identity token emitted {emitted}, counters imply {expected}"
                        ))
                        .into());
                    }
                }
            }
            Err(e) => debug!("no metadata for identity token {}: {e}", project.token_id),
        }

        let reward_id = project.snapshot.state.constants.reward_token_id;
        project.reward_token = match self.search.get_token_metadata(&reward_id).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!("no metadata for reward token {reward_id}: {e}");
                None
            }
        };
        Ok(project)
    }
}

/// Projects keyed by identity token.
#[derive(Debug, Default)]
pub struct ProjectIndex {
    projects: BTreeMap<TokenId, Project>,
}

impl ProjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `project` unless its identity token is already indexed.
    /// Returns whether it was kept.  A later box never displaces the
    /// indexed one, whatever its creation height.
    pub fn insert(&mut self, project: Project) -> bool {
        match self.projects.get(&project.token_id) {
            Some(existing) => {
                if existing.box_id() != project.box_id() {
                    warn!(
                        "project {} seen in boxes {} and {}; keeping {}",
                        project.token_id,
                        existing.box_id(),
                        project.box_id(),
                        existing.box_id()
                    );
                }
                false
            }
            None => {
                self.projects.insert(project.token_id, project);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn into_projects(self) -> Vec<Project> {
        self.projects.into_values().collect()
    }
}
