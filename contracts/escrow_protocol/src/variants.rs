//! # Contract variants
//!
//! Turns a protocol version plus a [`ContractConstants`] set into concrete
//! program bytes.  Compilation itself is delegated to an injected
//! [`ProgramCompiler`]; everything around it (template selection, constant
//! substitution, hashing, template extraction) is deterministic so that the
//! mint program, which embeds the escrow program hash, always agrees with the
//! escrow program it points at.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, RngCore};

use crate::address::{blake2b256, Address, Network};
use crate::error::{ProtocolError, Result};
use crate::params::BPS_DENOMINATOR;
use crate::registers::layout;
use crate::sigma::{SValue, SigmaReader, PROVE_DLOG};
use crate::templates::{self, escrow_template, mint_template};
use crate::types::{ContractConstants, ProtocolVersion, TokenId};

/// Header flag: a VLQ tree size follows the header.
const HAS_SIZE_FLAG: u8 = 0x08;
/// Header flag: constants are segregated ahead of the tree body.
const CONSTANT_SEGREGATION_FLAG: u8 = 0x10;

/// Compiles contract source into serialized program bytes.
///
/// Implementations must be deterministic: the same source always yields the
/// same bytes.
#[async_trait]
pub trait ProgramCompiler: Send + Sync {
    async fn compile(&self, source: &str) -> Result<Vec<u8>>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedProgram {
    pub program_bytes: Vec<u8>,
    pub address: Address,
    /// blake2b-256 of `program_bytes`.
    pub hash: [u8; 32],
}

impl ResolvedProgram {
    fn new(network: Network, program_bytes: Vec<u8>) -> Self {
        let hash = blake2b256(&program_bytes);
        let address = Address::from_program(network, &program_bytes);
        Self {
            program_bytes,
            address,
            hash,
        }
    }
}

impl fmt::Debug for ResolvedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProgram")
            .field("len", &self.program_bytes.len())
            .field("hash", &hex::encode(self.hash))
            .finish()
    }
}

#[derive(Clone)]
pub struct ContractResolver {
    compiler: Arc<dyn ProgramCompiler>,
    network: Network,
}

impl ContractResolver {
    pub fn new(compiler: Arc<dyn ProgramCompiler>, network: Network) -> Self {
        Self { compiler, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Escrow source for `version` with `constants` substituted in.
    pub fn escrow_source(version: ProtocolVersion, constants: &ContractConstants) -> Result<String> {
        let layout = layout(version)?;
        if constants.base_asset_id.is_some() && !layout.token_base_asset {
            return Err(ProtocolError::precondition(format!(
                "protocol {version} only accepts the native coin as base asset"
            )));
        }
        let base_token = constants
            .base_asset_id
            .map(|id| id.to_hex())
            .unwrap_or_default();
        Ok(escrow_template(version)
            .replace(templates::OWNER_PROGRAM, &hex::encode(&constants.owner_authorization))
            .replace(templates::DEV_PROGRAM, &hex::encode(&constants.dev_authorization))
            .replace(templates::DEV_FEE_BPS, &constants.dev_fee_bps.to_string())
            .replace(templates::REWARD_TOKEN_ID, &constants.reward_token_id.to_hex())
            .replace(templates::BASE_TOKEN_ID, &base_token))
    }

    pub fn mint_source(escrow_hash: &[u8; 32]) -> String {
        mint_template().replace(templates::ESCROW_PROGRAM_HASH, &hex::encode(escrow_hash))
    }

    pub async fn resolve(
        &self,
        version: ProtocolVersion,
        constants: &ContractConstants,
    ) -> Result<ResolvedProgram> {
        constants.validate()?;
        let source = Self::escrow_source(version, constants)?;
        let program = self.compiler.compile(&source).await?;
        let resolved = ResolvedProgram::new(self.network, program);
        tracing::debug!(
            "resolved {version} escrow program ({} bytes, hash {})",
            resolved.program_bytes.len(),
            hex::encode(resolved.hash)
        );
        Ok(resolved)
    }

    /// Identity-minting program bound to `escrow`.
    pub async fn resolve_mint(&self, escrow: &ResolvedProgram) -> Result<ResolvedProgram> {
        let source = Self::mint_source(&escrow.hash);
        let program = self.compiler.compile(&source).await?;
        Ok(ResolvedProgram::new(self.network, program))
    }

    /// Hash of the version's program template, independent of any project's
    /// constants.  Native-coin projects only; see [`Self::search_keys`].
    pub async fn template_hash(&self, version: ProtocolVersion) -> Result<[u8; 32]> {
        self.template_hash_with(version, random_constants(false)).await
    }

    /// Every template hash a project of `version` may carry.
    pub async fn search_keys(&self, version: ProtocolVersion) -> Result<Vec<[u8; 32]>> {
        let mut keys = vec![self.template_hash(version).await?];
        if layout(version)?.token_base_asset {
            let token_based = self
                .template_hash_with(version, random_constants(true))
                .await?;
            if !keys.contains(&token_based) {
                keys.push(token_based);
            }
        }
        Ok(keys)
    }

    async fn template_hash_with(
        &self,
        version: ProtocolVersion,
        constants: ContractConstants,
    ) -> Result<[u8; 32]> {
        let resolved = self.resolve(version, &constants).await?;
        Ok(blake2b256(program_template(&resolved.program_bytes)?))
    }
}

/// Constants with random keys and ids, for template extraction.
pub fn random_constants(token_base: bool) -> ContractConstants {
    let mut rng = rand::thread_rng();
    let mut token = || {
        let mut id = [0u8; 32];
        rng.fill_bytes(&mut id);
        TokenId(id)
    };
    let reward_token_id = token();
    let base_asset_id = token_base.then(&mut token);
    ContractConstants {
        owner_authorization: random_p2pk_program(),
        dev_authorization: random_p2pk_program(),
        dev_fee_bps: rand::thread_rng().gen_range(1..BPS_DENOMINATOR as u32),
        reward_token_id,
        base_asset_id,
    }
}

fn random_p2pk_program() -> Vec<u8> {
    let mut program = vec![0x00, crate::sigma::type_code::SIGMA_PROP, PROVE_DLOG, 0x02];
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    program.extend_from_slice(&key);
    program
}

/// The program body after its header, size and segregated constants.
pub fn program_template(program: &[u8]) -> Result<&[u8]> {
    let invalid = |e: ProtocolError| ProtocolError::Compilation(format!("unreadable program: {e}"));

    let mut reader = SigmaReader::new(program);
    let header = reader.get_u8().map_err(invalid)?;
    if header & HAS_SIZE_FLAG != 0 {
        let size = reader.get_vlq().map_err(invalid)?;
        if size != reader.remaining() as u64 {
            return Err(ProtocolError::Compilation(format!(
                "program declares {size} bytes but carries {}",
                reader.remaining()
            )));
        }
    }
    if header & CONSTANT_SEGREGATION_FLAG != 0 {
        let count = reader.get_vlq().map_err(invalid)?;
        for _ in 0..count {
            SValue::read_constant(&mut reader).map_err(invalid)?;
        }
    }
    Ok(reader.rest())
}
