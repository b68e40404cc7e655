//! Service façade: the operations a host exposes, wired to the ledger, the
//! wallet and the reservation guard.
//!
//! ## Operation flow
//!
//! ```text
//! fetch project → build unsigned tx → lease inputs → sign → submit
//!                                          └─ released when the tx confirms
//! ```
//!
//! ## Listing
//!
//! Projects are found by searching unspent boxes under every template hash
//! of every configured protocol version.  A failing page is retried with
//! exponential back-off up to [`ServiceSettings::max_fetch_attempts`]; a box
//! that does not decode is logged and skipped without affecting the rest.

use std::sync::Arc;
use std::time::Duration;

use escrow_protocol::{
    BoxSizeModel, ChainTime, ContractConstants, ContractResolver, Counters, Deadline, EscrowState,
    FeasibilityValidator, ProjectContent, ProtocolVersion, TokenId, ValidationReport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::builders::create::{build_deposit, build_mint};
use crate::builders::{contribute, exchange, rebalance, withdraw, BuildContext};
use crate::config::Config;
use crate::errors::{ErrorKind, Result, ServiceError};
use crate::explorer::{LedgerSearch, SearchFilters, SearchPage};
use crate::project::Project;
use crate::reconstructor::{ProjectIndex, Reconstructor};
use crate::reservation::ReservationGuard;
use crate::tx::{SignedTransaction, UnsignedTransaction};
use crate::wallet::{chain_time, WalletSigner};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const PROGRESS_BUFFER: usize = 16;

// ─────────────────────────────────────────────────────────
// Settings and requests
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub protocol_versions: Vec<ProtocolVersion>,
    /// Program receiving the developer fee of projects created here.
    pub dev_program: Vec<u8>,
    pub dev_fee_bps: u32,
    pub page_size: u32,
    pub max_fetch_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            protocol_versions: config.protocol_versions.clone(),
            dev_program: config.dev_address.to_program_bytes()?,
            dev_fee_bps: config.dev_fee_bps,
            page_size: config.page_size.max(1),
            max_fetch_attempts: config.max_fetch_attempts.max(1),
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default = "ProtocolVersion::latest")]
    pub version: ProtocolVersion,
    pub deadline: Deadline,
    pub minimum_threshold: u64,
    pub total_reward_supply: u64,
    pub unit_price: u64,
    pub reward_token_id: TokenId,
    pub reward_deposit: u64,
    #[serde(default)]
    pub base_asset_id: Option<TokenId>,
    #[serde(default)]
    pub content: ProjectContent,
}

/// Events emitted while a project is being created.  The stream ends with
/// exactly one `Submitted` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CreateProgress {
    Status {
        message: String,
    },
    Submitted {
        token_id: TokenId,
        mint_tx_id: String,
        tx_id: String,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl CreateProgress {
    pub fn is_final(&self) -> bool {
        !matches!(self, CreateProgress::Status { .. })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectFilters {
    /// Defaults to every configured version.
    #[serde(default)]
    pub versions: Option<Vec<ProtocolVersion>>,
    #[serde(default)]
    pub token_id: Option<TokenId>,
}

// ─────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EscrowService {
    resolver: ContractResolver,
    search: Arc<dyn LedgerSearch>,
    wallet: Arc<dyn WalletSigner>,
    guard: ReservationGuard,
    settings: Arc<ServiceSettings>,
}

impl EscrowService {
    pub fn new(
        resolver: ContractResolver,
        search: Arc<dyn LedgerSearch>,
        wallet: Arc<dyn WalletSigner>,
        guard: ReservationGuard,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            resolver,
            search,
            wallet,
            guard,
            settings: Arc::new(settings),
        }
    }

    pub fn guard(&self) -> &ReservationGuard {
        &self.guard
    }

    pub async fn chain_time(&self) -> Result<ChainTime> {
        chain_time(self.wallet.as_ref()).await
    }

    async fn owner_program(&self) -> Result<Vec<u8>> {
        Ok(self.wallet.get_change_address().await?.to_program_bytes()?)
    }

    fn draft_state(&self, req: &CreateProjectRequest, owner: Vec<u8>) -> EscrowState {
        EscrowState {
            version: req.version,
            deadline: req.deadline,
            minimum_threshold: req.minimum_threshold,
            counters: Counters::default(),
            unit_price: req.unit_price,
            constants: ContractConstants {
                owner_authorization: owner,
                dev_authorization: self.settings.dev_program.clone(),
                dev_fee_bps: self.settings.dev_fee_bps,
                reward_token_id: req.reward_token_id,
                base_asset_id: req.base_asset_id,
            },
            content_blob: req.content.to_blob(),
        }
    }

    /// Size report for the project `req` describes, owned by this wallet.
    pub async fn validate_content(&self, req: &CreateProjectRequest) -> Result<ValidationReport> {
        let draft = self.draft_state(req, self.owner_program().await?);
        let validator = FeasibilityValidator::for_constants(&self.resolver, draft).await?;
        Ok(validator.validate(&req.content)?)
    }

    // ── Create ───────────────────────────────────────────

    /// Start creating a project; progress arrives on the returned channel.
    pub fn create_project(&self, req: CreateProjectRequest) -> mpsc::Receiver<CreateProgress> {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let service = self.clone();
        tokio::spawn(async move {
            let last = match service.run_create(req, &tx).await {
                Ok(done) => done,
                Err(e) => {
                    error!("Project creation failed: {e}");
                    CreateProgress::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            };
            let _ = tx.send(last).await;
        });
        rx
    }

    async fn run_create(
        &self,
        req: CreateProjectRequest,
        progress: &mpsc::Sender<CreateProgress>,
    ) -> Result<CreateProgress> {
        let status = |message: &str| {
            let event = CreateProgress::Status {
                message: message.to_string(),
            };
            async move {
                let _ = progress.send(event).await;
            }
        };

        status("Resolving contract programs").await;
        let draft = self.draft_state(&req, self.owner_program().await?);
        let escrow = self.resolver.resolve(req.version, &draft.constants).await?;
        let mint = self.resolver.resolve_mint(&escrow).await?;

        status("Checking box size").await;
        FeasibilityValidator::with_program_sizes(
            BoxSizeModel::default(),
            draft.clone(),
            escrow.program_bytes.len(),
            mint.program_bytes.len(),
        )
        .validate_state(&draft)?
        .into_result()?;

        status("Building mint transaction").await;
        let now = self.chain_time().await?;
        let utxos = self.wallet.get_utxos().await?;
        let change_program = self.owner_program().await?;
        let plan = {
            let ctx = BuildContext::new(now, change_program, &utxos, &self.guard);
            build_mint(
                &ctx,
                &escrow.program_bytes,
                &mint.program_bytes,
                draft,
                req.total_reward_supply,
                req.reward_deposit,
            )?
        };
        let lease = self.guard.lease(plan.tx.input_ids())?;

        status("Waiting for wallet signature").await;
        let signed = self.wallet.sign(&plan.tx).await?;
        let mint_tx_id = self.wallet.submit(&signed).await?;
        info!("Mint transaction {mint_tx_id} submitted for project {}", plan.identity);
        self.guard.spawn_release(mint_tx_id.clone(), lease);

        status("Depositing into the escrow contract").await;
        let mint_box = signed.output_box(0)?;
        let height = u32::try_from(now.height)
            .map_err(|_| ServiceError::BadRequest(format!("height {} out of range", now.height)))?;
        let deposit = build_deposit(height, &escrow.program_bytes, &mint_box)?;
        let tx_id = self
            .wallet
            .submit(&SignedTransaction::from_unproven(deposit))
            .await?;
        info!("Project {} created in transaction {tx_id}", plan.identity);

        Ok(CreateProgress::Submitted {
            token_id: plan.identity,
            mint_tx_id,
            tx_id,
        })
    }

    // ── Operations ───────────────────────────────────────

    /// Positive `amount` buys receipts, negative returns them.
    pub async fn contribute(&self, token_id: &TokenId, amount: i64) -> Result<String> {
        self.execute(token_id, "contribute", |project, ctx| {
            contribute::build_contribute(ctx, project, amount)
        })
        .await
    }

    pub async fn refund(&self, token_id: &TokenId, receipts: u64) -> Result<String> {
        let amount = i64::try_from(receipts)
            .map_err(|_| ServiceError::BadRequest(format!("refund of {receipts} is out of range")))?;
        self.contribute(token_id, -amount).await
    }

    pub async fn withdraw(&self, token_id: &TokenId, amount: u64) -> Result<String> {
        self.execute(token_id, "withdraw", |project, ctx| {
            withdraw::build_withdraw(ctx, project, amount)
        })
        .await
    }

    pub async fn rebalance(&self, token_id: &TokenId, delta: i64) -> Result<String> {
        self.execute(token_id, "rebalance", |project, ctx| {
            rebalance::build_rebalance(ctx, project, delta)
        })
        .await
    }

    pub async fn exchange(&self, token_id: &TokenId, receipts: u64) -> Result<String> {
        self.execute(token_id, "exchange", |project, ctx| {
            exchange::build_exchange(ctx, project, receipts)
        })
        .await
    }

    pub async fn withdraw_unsold(&self, token_id: &TokenId, amount: u64) -> Result<String> {
        self.execute(token_id, "withdraw_unsold", |project, ctx| {
            rebalance::build_withdraw_unsold(ctx, project, amount)
        })
        .await
    }

    async fn execute<F>(&self, token_id: &TokenId, operation: &str, build: F) -> Result<String>
    where
        F: FnOnce(&Project, &BuildContext<'_>) -> Result<UnsignedTransaction> + Send,
    {
        let project = self.project(token_id).await?;
        let now = self.chain_time().await?;
        let change_program = self.owner_program().await?;
        let utxos = self.wallet.get_utxos().await?;

        let unsigned = {
            let ctx = BuildContext::new(now, change_program, &utxos, &self.guard);
            build(&project, &ctx)?
        };
        let lease = self.guard.lease(unsigned.input_ids())?;

        let signed = self.wallet.sign(&unsigned).await?;
        let tx_id = self.wallet.submit(&signed).await?;
        info!("{operation} on project {token_id} submitted as {tx_id}");
        self.guard.spawn_release(tx_id.clone(), lease);
        Ok(tx_id)
    }

    // ── Listing ──────────────────────────────────────────

    pub async fn project(&self, token_id: &TokenId) -> Result<Project> {
        let filters = ProjectFilters {
            versions: None,
            token_id: Some(*token_id),
        };
        self.list_projects(&filters)
            .await?
            .into_iter()
            .find(|p| p.token_id == *token_id)
            .ok_or_else(|| ServiceError::NotFound(token_id.to_hex()))
    }

    pub async fn list_projects(&self, filters: &ProjectFilters) -> Result<Vec<Project>> {
        let versions = filters
            .versions
            .clone()
            .unwrap_or_else(|| self.settings.protocol_versions.clone());
        let search_filters = SearchFilters {
            assets: filters.token_id.into_iter().collect(),
        };
        let reconstructor = Reconstructor::new(self.search.clone(), self.resolver.clone());
        let mut index = ProjectIndex::new();

        for version in versions {
            for key in self.resolver.search_keys(version).await? {
                let mut offset = 0u64;
                loop {
                    let page = self.fetch_page(&key, &search_filters, offset).await?;
                    if page.items.is_empty() {
                        break;
                    }
                    for escrow_box in &page.items {
                        match reconstructor.reconstruct(escrow_box, version).await {
                            Ok(project) => {
                                index.insert(project);
                            }
                            Err(e) => warn!("Skipping box {} ({version}): {e}", escrow_box.box_id),
                        }
                    }
                    offset += page.items.len() as u64;
                    if offset >= page.total {
                        break;
                    }
                }
            }
        }

        info!("Listed {} projects", index.len());
        Ok(index.into_projects())
    }

    async fn fetch_page(
        &self,
        key: &[u8; 32],
        filters: &SearchFilters,
        offset: u64,
    ) -> Result<SearchPage> {
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 1;

        loop {
            match self
                .search
                .search_unspent_by_program_hash(key, filters, offset, self.settings.page_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.settings.max_fetch_attempts => {
                    warn!(
                        "Search page at offset {offset} failed (attempt {attempt}, will retry in {backoff:?}): {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use escrow_protocol::sigma::SValue;
    use escrow_protocol::ProtocolVersion::{V1_0, V1_1};
    use escrow_protocol::{Network, Registers};

    use super::fakes::*;
    use super::*;
    use escrow_protocol::params::{MIN_BOX_VALUE, TX_FEE};

    use crate::builders::test_support::funded_wallet;
    use crate::reconstructor::fixtures::{resolved_box, snapshot, state, REWARD};
    use crate::reservation::ConfirmationWatcher;
    use crate::tx::{LedgerBox, Token};

    struct Never;

    #[async_trait]
    impl ConfirmationWatcher for Never {
        async fn wait_for_confirmation(&self, _tx_id: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    fn settings() -> ServiceSettings {
        ServiceSettings {
            protocol_versions: vec![V1_1],
            dev_program: crate::reconstructor::fixtures::dev_program(),
            dev_fee_bps: 500,
            page_size: 2,
            max_fetch_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    async fn project_box(seed: u8, sold: u64) -> LedgerBox {
        let mut b = resolved_box(&snapshot(state(V1_1, None), sold, 1_000), seed).await;
        b.assets[0].token_id = TokenId([seed; 32]);
        b
    }

    fn service(ledger: Arc<FakeLedger>, wallet: Arc<FakeWallet>, guard: ReservationGuard) -> EscrowService {
        EscrowService::new(
            ContractResolver::new(Arc::new(HashCompiler), Network::Mainnet),
            ledger,
            wallet,
            guard,
            settings(),
        )
    }

    #[tokio::test]
    async fn listing_pages_through_and_skips_broken_boxes() {
        let mut broken = project_box(9, 0).await;
        broken.additional_registers.insert("R6".into(), "ff".into());
        let ledger = Arc::new(FakeLedger::default());
        let boxes = vec![
            project_box(1, 10).await,
            broken,
            project_box(2, 20).await,
            project_box(3, 30).await,
        ];
        *ledger.boxes.lock() = boxes;

        let svc = service(ledger.clone(), Arc::new(FakeWallet::new(vec![])), ReservationGuard::new());
        let projects = svc.list_projects(&ProjectFilters::default()).await.unwrap();
        let ids: Vec<TokenId> = projects.iter().map(|p| p.token_id).collect();
        assert_eq!(ids, vec![TokenId([1; 32]), TokenId([2; 32]), TokenId([3; 32])]);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn counters_outside_long_range_never_reach_a_view() {
        // v1_0 packs the counters into one BigInt; this one claims
        // sold = u64::MAX with two identity tokens left.
        let mut hostile = resolved_box(&snapshot(state(V1_0, None), 0, 1_000), 8).await;
        let mut regs = Registers::from_hex_map(&hostile.additional_registers).unwrap();
        let mut packed = vec![0x00];
        packed.extend_from_slice(&[0xff; 8]);
        regs.r6 = SValue::BigInt(packed);
        hostile.additional_registers = regs.to_hex_map().unwrap();
        hostile.assets = vec![Token::new(TokenId([8; 32]), 2)];

        let mut good = resolved_box(&snapshot(state(V1_0, None), 40, 1_000), 4).await;
        good.assets[0].token_id = TokenId([4; 32]);

        let ledger = Arc::new(FakeLedger::default());
        *ledger.boxes.lock() = vec![good, hostile];
        let svc = service(ledger, Arc::new(FakeWallet::new(vec![])), ReservationGuard::new());

        let filters = ProjectFilters {
            versions: Some(vec![V1_0]),
            token_id: None,
        };
        let projects = svc.list_projects(&filters).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].token_id, TokenId([4; 32]));
        let now = ChainTime {
            height: 800,
            timestamp_ms: 0,
        };
        for project in &projects {
            assert_eq!(project.view(&now).total_reward_supply, 1_000);
        }
    }

    #[tokio::test]
    async fn transient_page_failures_are_retried_then_surface() {
        let ledger = Arc::new(FakeLedger::default());
        let boxes = vec![project_box(1, 10).await];
        *ledger.boxes.lock() = boxes;
        ledger.failures.store(2, Ordering::SeqCst);
        let svc = service(ledger.clone(), Arc::new(FakeWallet::new(vec![])), ReservationGuard::new());
        assert_eq!(svc.list_projects(&ProjectFilters::default()).await.unwrap().len(), 1);

        ledger.failures.store(10, Ordering::SeqCst);
        let err = svc.list_projects(&ProjectFilters::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let ledger = Arc::new(FakeLedger::default());
        let svc = service(ledger, Arc::new(FakeWallet::new(vec![])), ReservationGuard::new());
        let err = svc.project(&TokenId([7; 32])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn in_flight_escrow_box_blocks_a_second_operation() {
        let ledger = Arc::new(FakeLedger::default());
        let boxes = vec![project_box(1, 10).await];
        *ledger.boxes.lock() = boxes;
        let wallet = Arc::new(FakeWallet::new(funded_wallet(vec![])));
        let guard = ReservationGuard::with_watcher(Arc::new(Never), Duration::from_secs(600));
        let svc = service(ledger, wallet.clone(), guard.clone());
        let id = TokenId([1; 32]);

        let tx_id = svc.contribute(&id, 5).await.unwrap();
        assert_eq!(tx_id, "signed-0");
        assert!(guard.is_reserved(&escrow_protocol::BoxId([1; 32])));

        let err = svc.contribute(&id, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoxReserved);
        assert_eq!(wallet.submitted.lock().len(), 1);

        guard.shutdown();
    }

    #[tokio::test]
    async fn creation_streams_progress_and_deposits_the_mint_box() {
        let ledger = Arc::new(FakeLedger::default());
        let wallet = Arc::new(FakeWallet::new(funded_wallet(vec![Token::new(REWARD, 2_000)])));
        let svc = service(ledger, wallet.clone(), ReservationGuard::new());

        let req = CreateProjectRequest {
            version: V1_1,
            deadline: Deadline::BlockHeight(1_000),
            minimum_threshold: 500,
            total_reward_supply: 1_000,
            unit_price: 10_000_000,
            reward_token_id: REWARD,
            reward_deposit: 1_000,
            base_asset_id: None,
            content: ProjectContent {
                title: "Solar".into(),
                ..ProjectContent::default()
            },
        };
        let mut rx = svc.create_project(req);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.len() > 2);
        assert!(events[..events.len() - 1].iter().all(|e| !e.is_final()));

        let submitted = wallet.submitted.lock().clone();
        assert_eq!(submitted.len(), 2);
        let mint_box = submitted[0].output_box(0).unwrap();
        assert_eq!(submitted[1].inputs[0].box_id, mint_box.box_id);
        assert!(submitted[1].inputs[0].spending_proof.proof_bytes.is_empty());

        match events.last() {
            Some(CreateProgress::Submitted { token_id, mint_tx_id, tx_id }) => {
                assert_eq!(*token_id, TokenId::from(submitted[0].inputs[0].box_id));
                assert_eq!(mint_tx_id, "signed-0");
                assert_eq!(tx_id, "unproven-2");
            }
            other => panic!("unexpected final event {other:?}"),
        }
        assert_eq!(mint_box.value, MIN_BOX_VALUE + TX_FEE);
    }

    #[tokio::test]
    async fn creation_failure_is_the_final_event() {
        let ledger = Arc::new(FakeLedger::default());
        let wallet = Arc::new(FakeWallet::new(funded_wallet(vec![])));
        let svc = service(ledger, wallet.clone(), ReservationGuard::new());

        let req = CreateProjectRequest {
            version: V1_1,
            deadline: Deadline::BlockHeight(1_000),
            minimum_threshold: 500,
            total_reward_supply: 1_000,
            unit_price: 10_000_000,
            reward_token_id: REWARD,
            reward_deposit: 1_000,
            base_asset_id: None,
            content: ProjectContent::default(),
        };
        let mut rx = svc.create_project(req);
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(CreateProgress::Failed {
                kind: ErrorKind::PreconditionFailed,
                ..
            })
        ));
        assert!(wallet.submitted.lock().is_empty());
    }
}
