use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use console::{style, Term};
use subpayd::config::{Config, ConfigOverrides};
use subpayd::database::SledDatabase;
use subpayd::ledger::{RemoteSigner, RpcLedgerClient};
use subpayd::metrics::init_prometheus_metrics;
use subpayd::observability::{init_logging, LoggingConfig};
use subpayd::router::build_router;
use subpayd::{AppState, SubpayCore};
use tracing::{info, warn};

#[derive(Parser)]
#[clap(version, about = "Recurring-payment settlement daemon")]
struct Cli {
    /// Data directory path (contains config, database and logs)
    #[clap(long, env = "SUBPAYD_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Password (overrides config)
    #[clap(long, env = "SUBPAYD_PASSWORD")]
    password: Option<String>,

    /// Server address as ip:port (overrides config)
    #[clap(long, env = "SUBPAYD_ADDR")]
    addr: Option<String>,

    /// Ledger JSON-RPC endpoint (overrides config)
    #[clap(long, env = "SUBPAYD_LEDGER_RPC_URL")]
    ledger_rpc_url: Option<String>,

    /// Transaction signer endpoint (overrides config)
    #[clap(long, env = "SUBPAYD_SIGNER_URL")]
    signer_url: Option<String>,

    /// Disable authentication
    #[clap(long)]
    no_auth: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli: Cli = Cli::parse();

    let log_config = LoggingConfig {
        level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        console_output: std::env::var("NO_CONSOLE_LOG").is_err(),
        file_output: std::env::var("NO_FILE_LOG").is_err(),
        ..LoggingConfig::for_data_dir(&cli.data_dir)
    };
    init_logging(log_config)?;

    info!("Starting subpayd");

    std::fs::create_dir_all(&cli.data_dir)?;
    let config_path = Config::path_in(&cli.data_dir);

    let term = Term::stdout();
    let (mut config, password_generated) = Config::load_or_create(&config_path)?;

    if password_generated {
        term.write_line(&format!(
            "{}{}",
            style("Generating default api password...").yellow(),
            style("done").white()
        ))?;
    }

    config.apply_overrides(ConfigOverrides {
        data_dir: Some(cli.data_dir.clone()),
        password: cli.password,
        addr: cli.addr,
        ledger_rpc_url: cli.ledger_rpc_url,
        signer_url: cli.signer_url,
        no_auth: cli.no_auth,
    })?;
    config.validate()?;

    if !config.has_settlement_target() {
        warn!("Ledger package-id or registry-id is not configured; settlement calls will fail");
    }

    let db = Arc::new(SledDatabase::open(cli.data_dir.join("db"))?);
    let timeout = config.ledger_timeout();
    let ledger = Arc::new(RpcLedgerClient::new(config.ledger.rpc_url.clone(), timeout)?);
    let signer = Arc::new(RemoteSigner::new(config.ledger.signer_url.clone(), timeout)?);

    let core = SubpayCore::new(&config, db, ledger, signer).await?;
    let report = core.bootstrap().await?;
    info!(
        scheduled = report.scheduled,
        renewed = report.renewed,
        failed = report.failed,
        "Renewal schedule restored"
    );

    let state = AppState::new(core);
    let metrics_handle = init_prometheus_metrics().await?;
    let app = build_router(state.clone(), &config, metrics_handle);

    let addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("subpayd listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.core.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
