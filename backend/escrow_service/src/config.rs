//! Application configuration loaded from environment variables.

use std::time::Duration;

use escrow_protocol::{Address, Network, ProtocolVersion};

use crate::errors::{Result, ServiceError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Explorer API root (e.g. https://api.ergoplatform.com)
    pub explorer_url: String,
    /// Node REST root used for compilation, wallet and submission
    pub node_url: String,
    /// `api_key` header for node wallet endpoints
    pub node_api_key: Option<String>,
    pub network: Network,
    /// Port for the REST API server
    pub api_port: u16,
    /// Boxes requested per explorer search page
    pub page_size: u32,
    /// Attempts per search page before the listing gives up on it
    pub max_fetch_attempts: u32,
    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_secs: u64,
    /// Contract generations scanned when listing, oldest first
    pub protocol_versions: Vec<ProtocolVersion>,
    /// Receiver of the developer fee for projects created here
    pub dev_address: Address,
    pub dev_fee_bps: u32,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let network: Network = env_var("NETWORK")
            .unwrap_or_else(|_| "mainnet".to_string())
            .parse()
            .map_err(|_| ServiceError::Config("Invalid NETWORK".to_string()))?;

        let dev_address: Address = env_var("DEV_ADDRESS")
            .map_err(|_| {
                ServiceError::Config("DEV_ADDRESS environment variable is required".to_string())
            })?
            .parse()
            .map_err(|e| ServiceError::Config(format!("Invalid DEV_ADDRESS: {e}")))?;
        if dev_address.network() != network {
            return Err(ServiceError::Config(format!(
                "DEV_ADDRESS belongs to {:?}, expected {network:?}",
                dev_address.network()
            )));
        }

        Ok(Config {
            explorer_url: env_var("EXPLORER_URL")
                .unwrap_or_else(|_| "https://api.ergoplatform.com".to_string()),
            node_url: env_var("NODE_URL").unwrap_or_else(|_| "http://127.0.0.1:9053".to_string()),
            node_api_key: env_var("NODE_API_KEY").ok(),
            network,
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid API_PORT".to_string()))?,
            page_size: env_var("PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid PAGE_SIZE".to_string()))?,
            max_fetch_attempts: env_var("MAX_FETCH_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid MAX_FETCH_ATTEMPTS".to_string()))?,
            confirmation_timeout_secs: env_var("CONFIRMATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .map_err(|_| {
                    ServiceError::Config("Invalid CONFIRMATION_TIMEOUT_SECS".to_string())
                })?,
            confirmation_poll_secs: env_var("CONFIRMATION_POLL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid CONFIRMATION_POLL_SECS".to_string()))?,
            protocol_versions: parse_versions(
                &env_var("PROTOCOL_VERSIONS").unwrap_or_else(|_| "v1_0,v1_1,v2_0".to_string()),
            )?,
            dev_address,
            dev_fee_bps: env_var("DEV_FEE_BPS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid DEV_FEE_BPS".to_string()))?,
            http_timeout_secs: env_var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ServiceError::Config("Invalid HTTP_TIMEOUT_SECS".to_string()))?,
        })
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn confirmation_poll(&self) -> Duration {
        Duration::from_secs(self.confirmation_poll_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_versions(raw: &str) -> Result<Vec<ProtocolVersion>> {
    let versions = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ProtocolVersion>()
                .map_err(|e| ServiceError::Config(format!("Invalid PROTOCOL_VERSIONS: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if versions.is_empty() {
        return Err(ServiceError::Config(
            "PROTOCOL_VERSIONS must name at least one version".to_string(),
        ));
    }
    Ok(versions)
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ServiceError::Config(format!("Missing env var: {key}")))
}
