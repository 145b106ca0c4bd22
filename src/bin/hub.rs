use std::path::{Path, PathBuf};

use anyhow::Context;
use aquaponics_telemetry::{
    Channel,
    actors::dispatcher::{DispatcherHandle, DispatcherSettings, Transports},
    config::{Config, read_config_file},
    notification::{Audience, ChannelKind},
    sensors,
    storage::{self, RecipientRecord, StorageBundle},
    supervisor::{Collaborators, PipelineSettings, Supervisor},
    tolerance::ToleranceSpec,
};
use clap::{Parser, Subcommand};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(about = "Aquaponics telemetry hub")]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Also write daily rotated log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the telemetry pipeline until interrupted (default)
    Run,

    /// Send the test message to every opted-in recipient and the chat webhook
    SendTest,

    /// Set the safe range of a channel
    SetTolerance {
        channel: Channel,

        #[arg(long, allow_hyphen_values = true)]
        min: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        max: Option<f64>,
    },

    /// Stop checking a channel
    ClearTolerance { channel: Channel },

    /// Add or replace a recipient
    AddRecipient {
        id: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// Carrier name used to pick the SMS gateway
        #[arg(long)]
        carrier: Option<String>,
    },
}

fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = filter::Targets::new().with_targets(vec![
        ("aquaponics_telemetry", LevelFilter::DEBUG),
        ("aquaponics_hub", LevelFilter::DEBUG),
    ]);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "aquaponics-hub.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let _guard = init(args.log_dir.as_deref());
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let storage = storage::open(&config.storage)
        .await
        .context("failed to open storage")?;
    storage::apply_seed(storage.settings.as_ref(), &config.seed)
        .await
        .context("failed to seed storage")?;

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, storage.clone()).await,
        Command::SendTest => send_test(&config, &storage).await,
        Command::SetTolerance { channel, min, max } => {
            let spec = ToleranceSpec::new(min, max)
                .with_context(|| format!("invalid tolerance for {channel}"))?;
            storage.settings.set_tolerance(channel, spec).await?;
            info!("tolerance for {channel} set to {spec:?}");
            Ok(())
        }
        Command::ClearTolerance { channel } => {
            if storage.settings.remove_tolerance(channel).await? {
                info!("tolerance for {channel} removed, values are no longer checked");
            } else {
                warn!("no tolerance configured for {channel}");
            }
            Ok(())
        }
        Command::AddRecipient {
            id,
            email,
            phone,
            carrier,
        } => {
            let mut record = RecipientRecord::new(id);
            if let Some(email) = email {
                record = record.with_email(email);
            }
            if let Some(phone) = phone {
                record = record.with_phone(phone, carrier);
            }
            storage.settings.upsert_recipient(record.clone()).await?;
            info!("recipient {} saved", record.id);
            Ok(())
        }
    };

    if let Err(e) = storage.readings.close().await {
        warn!("failed to close storage: {e}");
    }

    result
}

async fn run(config: &Config, storage: StorageBundle) -> anyhow::Result<()> {
    let transports = Transports::from_config(&config.notifications)?;

    let collaborators = Collaborators {
        source: sensors::from_config(&config.sensors),
        storage,
        transports,
    };

    let mut supervisor = Supervisor::new(collaborators, PipelineSettings::from_config(config));

    supervisor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
            }
        })
        .await;

    Ok(())
}

async fn send_test(config: &Config, storage: &StorageBundle) -> anyhow::Result<()> {
    let transports = Transports::from_config(&config.notifications)?;

    let audience = Audience {
        email: storage
            .recipients
            .fetch_opted_in(ChannelKind::Email)
            .await
            .context("failed to fetch email recipients")?,
        sms: storage
            .recipients
            .fetch_opted_in(ChannelKind::Sms)
            .await
            .context("failed to fetch sms recipients")?,
    };

    let (dispatcher, task) = DispatcherHandle::spawn(
        DispatcherSettings::from_config(&config.notifications),
        transports,
    );

    let report = dispatcher.send_test(audience).await?;
    for outcome in &report.outcomes {
        info!(
            "{:?} {}: {:?} after {} attempts",
            outcome.channel, outcome.recipient, outcome.status, outcome.attempts
        );
    }
    info!("test message: {report}");

    dispatcher.shutdown().await?;
    task.await??;

    if report.is_complete_success() {
        Ok(())
    } else {
        anyhow::bail!("{} deliveries failed", report.failed())
    }
}
