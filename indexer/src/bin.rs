use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use hypercerts_evm::{JsonRpcProvider, LogFetcher};
use hypercerts_indexer::{
    cli::IndexerArgs, IndexerError, Orchestrator, ReportExt,
};
use hypercerts_observability::init_tracing;
use hypercerts_storage::PostgresStore;

#[derive(Parser, Debug)]
#[command(name = "hypercerts-indexer", version)]
struct Cli {
    #[command(flatten)]
    args: IndexerArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    run(cli.args).await.to_exit_code()
}

async fn run(args: IndexerArgs) -> Result<(), IndexerError> {
    init_tracing().change_context(IndexerError::Fatal)?;

    let rpc_url = args
        .rpc_url
        .parse::<Url>()
        .change_context(IndexerError::Configuration)
        .attach_printable("malformed RPC url")?;
    let provider = JsonRpcProvider::new(rpc_url, args.to_provider_options());
    let fetcher = LogFetcher::new(provider.clone());

    let store = PostgresStore::connect(args.database.to_store_options())
        .await
        .change_context(IndexerError::Temporary)
        .attach_printable("failed to connect to the store")?;

    let options = args.to_orchestrator_options()?;
    let poll_interval = args.poll_interval();

    let orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(fetcher),
        Arc::new(provider),
        options,
    );

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ct.cancel();
        }
    });

    orchestrator.run_loop(poll_interval, ct).await;
    Ok(())
}
