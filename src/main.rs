use clap::Parser;
use escrow_cycle::application::scheduler::ReleaseScheduler;
use escrow_cycle::config::EscrowConfig;
use escrow_cycle::domain::ports::{EscrowStoreRef, NotificationSinkRef, TransferGatewayRef};
use escrow_cycle::infrastructure::in_memory::InMemoryEscrowStore;
use escrow_cycle::infrastructure::logging::{LoggingGateway, TracingNotifier};
use escrow_cycle::interfaces::csv::deposit_reader::DepositReader;
use escrow_cycle::interfaces::csv::summary_writer::SummaryWriter;
use escrow_cycle::telemetry::{LogFormat, init_logging};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Deposits CSV file (`owner, amount`)
    deposits: PathBuf,

    /// JSON config file. Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds. Without it, runs until Ctrl-C.
    #[arg(long, value_name = "SECS")]
    run_for: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let config = match &cli.config {
        Some(path) => EscrowConfig::from_path(path).into_diagnostic()?,
        None => EscrowConfig::default(),
    };

    let store: EscrowStoreRef = Arc::new(InMemoryEscrowStore::new(config.limits()));
    let gateway: TransferGatewayRef = Arc::new(LoggingGateway::new());
    let notifier: NotificationSinkRef = Arc::new(TracingNotifier::new());
    let scheduler =
        Arc::new(ReleaseScheduler::new(config, store, gateway, notifier).into_diagnostic()?);

    let file = File::open(&cli.deposits).into_diagnostic()?;
    let reader = DepositReader::new(file);
    for (row, deposit) in reader.deposits().enumerate() {
        match deposit {
            Ok(deposit) => {
                if let Err(e) = scheduler.deposit(&deposit.owner, deposit.amount) {
                    warn!(row = row + 1, owner = %deposit.owner, error = %e, "rejected deposit");
                }
            }
            Err(e) => warn!(row = row + 1, error = %e, "Error reading deposit"),
        }
    }

    let handle = Arc::clone(&scheduler).spawn();
    match cli.run_for {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for Ctrl-C");
            }
        }
    }
    handle.stop().await;

    let pending = scheduler.pending_transfers().len();
    let review = scheduler.review_queue().len();
    if pending > 0 || review > 0 {
        warn!(pending, review, "undelivered allocations at shutdown");
    }

    let stdout = io::stdout();
    let mut writer = SummaryWriter::new(stdout.lock());
    writer
        .write_summaries(scheduler.summaries())
        .into_diagnostic()?;

    Ok(())
}
