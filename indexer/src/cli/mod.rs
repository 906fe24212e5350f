//! Command line configuration.

use std::{path::PathBuf, time::Duration};

use clap::Args;
use error_stack::{Result, ResultExt};

use alloy_primitives::Address;

use hypercerts_evm::JsonRpcProviderOptions;
use hypercerts_storage::{PostgresStoreOptions, TlsConfiguration};

use crate::{error::IndexerError, orchestrator::OrchestratorOptions};

#[derive(Args, Debug)]
pub struct IndexerArgs {
    /// The chain to index.
    #[arg(long, env = "HYPERCERTS_CHAIN_ID")]
    pub chain_id: u64,
    /// JSON-RPC endpoint of the chain.
    #[arg(long, env = "HYPERCERTS_RPC_URL")]
    pub rpc_url: String,
    /// Maximum number of blocks fetched per window.
    #[arg(long, env = "HYPERCERTS_BATCH_SIZE", default_value = "10000")]
    pub batch_size: u64,
    /// Delay between indexing ticks, in seconds.
    #[arg(long, env = "HYPERCERTS_DELAY", default_value = "10")]
    pub delay: u64,
    /// RPC requests per second against the node.
    #[arg(long, env = "HYPERCERTS_RPC_RATE_LIMIT", default_value = "100")]
    pub rpc_rate_limit: u32,
    /// Per-request RPC timeout, in seconds.
    #[arg(long, env = "HYPERCERTS_RPC_TIMEOUT", default_value = "30")]
    pub rpc_timeout: u64,
    /// Order-validator contract for marketplace re-validation.
    #[arg(long, env = "HYPERCERTS_ORDER_VALIDATOR")]
    pub order_validator: Option<String>,
    #[command(flatten)]
    pub database: DatabaseArgs,
}

#[derive(Args, Debug)]
pub struct DatabaseArgs {
    /// Postgres connection string.
    #[arg(long = "database.url", env = "HYPERCERTS_DATABASE_URL")]
    pub database_url: String,
    /// Disable TLS towards the database.
    #[arg(long = "database.no-tls", env = "HYPERCERTS_DATABASE_NO_TLS")]
    pub no_tls: bool,
    /// Path to a PEM certificate to trust.
    #[arg(long = "database.tls-certificate", env = "HYPERCERTS_DATABASE_TLS_CERTIFICATE")]
    pub tls_certificate: Option<PathBuf>,
    /// Accept TLS certificates with mismatched hostnames.
    #[arg(long = "database.tls-accept-invalid-hostnames")]
    pub tls_accept_invalid_hostnames: Option<bool>,
    /// Accept invalid TLS certificates.
    #[arg(long = "database.tls-accept-invalid-certificates")]
    pub tls_accept_invalid_certificates: Option<bool>,
    /// Do not trust the system certificate roots.
    #[arg(long = "database.tls-disable-system-roots")]
    pub tls_disable_system_roots: Option<bool>,
    /// Use Server Name Indication.
    #[arg(long = "database.tls-use-sni")]
    pub tls_use_sni: Option<bool>,
}

impl IndexerArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    pub fn to_provider_options(&self) -> JsonRpcProviderOptions {
        JsonRpcProviderOptions {
            timeout: Duration::from_secs(self.rpc_timeout),
            rate_limit: self.rpc_rate_limit,
            ..Default::default()
        }
    }

    pub fn to_orchestrator_options(&self) -> Result<OrchestratorOptions, IndexerError> {
        let order_validator = self
            .order_validator
            .as_deref()
            .map(|address| {
                address
                    .parse::<Address>()
                    .change_context(IndexerError::Configuration)
                    .attach_printable("malformed order validator address")
            })
            .transpose()?;

        Ok(OrchestratorOptions {
            chain_id: self.chain_id,
            batch_size: self.batch_size,
            order_validator,
        })
    }
}

impl DatabaseArgs {
    pub fn to_store_options(&self) -> PostgresStoreOptions {
        let tls = if self.no_tls {
            TlsConfiguration::NoTls
        } else {
            TlsConfiguration::Tls {
                certificate: self.tls_certificate.clone(),
                accept_invalid_hostnames: self.tls_accept_invalid_hostnames,
                accept_invalid_certificates: self.tls_accept_invalid_certificates,
                disable_system_roots: self.tls_disable_system_roots,
                use_sni: self.tls_use_sni,
            }
        };

        PostgresStoreOptions {
            connection_string: self.database_url.clone(),
            tls,
        }
    }
}
