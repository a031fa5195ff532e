use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use wallet_ledger::csv::{read_requests, write_balances};
use wallet_ledger::config::StorageBackend;
use wallet_ledger::{Config, Ledger, MemoryStore, SqliteStore, Store};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::WARN.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: wallet-ledger <requests.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match config.storage.backend {
        StorageBackend::Memory => process(Arc::new(MemoryStore::new()), &config, path).await,
        StorageBackend::Sqlite => {
            let store =
                match SqliteStore::open(&config.storage.path, config.storage.max_connections).await
                {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        error!(path = %config.storage.path.display(), "failed to open store: {e}");
                        return ExitCode::FAILURE;
                    }
                };
            let code = process(store.clone(), &config, path).await;
            store.close().await;
            code
        }
    }
}

/// Apply every request in the CSV at `path` to `store`, then print the
/// audited balances.
async fn process<S: Store>(store: Arc<S>, config: &Config, path: String) -> ExitCode {
    for asset in &config.assets {
        if let Err(e) = store
            .ensure_asset(&asset.code, &asset.name, asset.decimals)
            .await
        {
            error!(asset = %asset.code, "failed to register asset: {e}");
            return ExitCode::FAILURE;
        }
    }
    let ledger = Ledger::new(store, config);

    let requests = match read_requests(path, config.asset_decimals()) {
        Ok(requests) => requests,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (request_sender, request_receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for result in requests {
            match result {
                Ok(request) => {
                    if request_sender.send(request).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
    });

    ledger.engine.run(ReceiverStream::new(request_receiver)).await;

    let balances = match ledger.engine.balances().await {
        Ok(balances) => balances,
        Err(e) => {
            error!("failed to list balances: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut rows = Vec::with_capacity(balances.len());
    let mut all_consistent = true;
    for balance in &balances {
        let consistent = match ledger.audit.validate(balance.wallet_id).await {
            Ok(report) => report.is_consistent(),
            Err(e) => {
                error!(wallet = balance.wallet_id, "audit failed: {e}");
                false
            }
        };
        all_consistent &= consistent;
        rows.push((balance, consistent));
    }

    if let Err(e) = write_balances(std::io::stdout().lock(), rows) {
        error!("failed to write balances: {e}");
        return ExitCode::FAILURE;
    }

    if all_consistent {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
