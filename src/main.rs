use clap::Parser;
use pg_tail::{Config, Error, LogicalReceiver, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pg-tail")]
#[command(about = "PostgreSQL logical replication tail reader", long_about = None)]
#[command(version)]
struct Args {
    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting pg-tail v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("\nRequired environment variables:");
            eprintln!("  PG_DATABASE      - PostgreSQL database name");
            eprintln!("  PG_USERNAME      - PostgreSQL username");
            eprintln!("  PG_PASSWORD      - PostgreSQL password");
            eprintln!("\nOptional: PG_HOST, PG_PORT, PG_SLOT_NAME, PG_PLUGIN,");
            eprintln!("          PG_PLUGIN_OPTIONS, REPLICATION_CHANNEL_CAPACITY");
            std::process::exit(1);
        }
    };

    info!(
        postgres_host = %config.postgres.host,
        postgres_port = %config.postgres.port,
        postgres_database = %config.postgres.database,
        slot_name = %config.replication.slot_name,
        plugin = %config.replication.plugin,
        "Configuration summary"
    );

    let mut receiver = LogicalReceiver::open(
        &config.postgres_url(),
        &config.replication.slot_name,
        &config.replication.plugin,
        &config.replication.plugin_options,
    )
    .await?;

    let (tx, mut rx) = mpsc::channel(config.replication.channel_capacity);
    let cancel = CancellationToken::new();

    // Print each operation as a JSON line.
    let printer = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match serde_json::to_string(&op) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("Failed to serialize operation: {}", e),
            }
        }
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let result = receiver.run(cancel, tx).await;
    receiver.close().await?;
    printer.abort();

    match result {
        Ok(()) => Ok(()),
        Err(Error::Cancelled) => {
            info!("Replication stopped");
            Ok(())
        }
        Err(e) => {
            error!("Replication failed: {}", e);
            Err(e)
        }
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pg_tail=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pg_tail=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
