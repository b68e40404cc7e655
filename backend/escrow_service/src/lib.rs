//! Off-chain client of the token-escrow fundraising protocol.
//!
//! Builds and submits the transactions that move a project's escrow box,
//! reconstructs projects from the explorer, and serves both over REST.

pub mod api;
pub mod builders;
pub mod config;
pub mod errors;
pub mod explorer;
pub mod node;
pub mod project;
pub mod reconstructor;
pub mod reservation;
pub mod service;
pub mod tx;
pub mod wallet;

pub use errors::{ErrorKind, Result, ServiceError, WalletError};
pub use project::{Project, ProjectView};
pub use reservation::{ConfirmationWatcher, ReservationGuard};
pub use service::{CreateProgress, CreateProjectRequest, EscrowService, ProjectFilters};
