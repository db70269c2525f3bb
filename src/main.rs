use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use admission::config::{AdmissionConfig, StoreSettings};
use admission::ratelimit::{self, IndividualStore, LimiterConfig, TotalStore};
use admission::runner::{Runner, RunnerChain, Work};
use admission::sms::{SimulatedSmsService, SmsRequest, SmsResponse, SmsService};
use admission::{CancelHandle, Context};

#[derive(Debug, Parser)]
#[command(
    name = "admission-demo",
    version,
    about = "Send SMS messages through admission-controlled runners"
)]
struct Cli {
    /// Configuration file; ADMISSION_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Debug, Subcommand)]
enum Scenario {
    /// One process-wide limiter around every send
    Basic {
        #[arg(long, default_value_t = 7)]
        sends: u32,
        /// Overrides the configured basic rate
        #[arg(long)]
        rate: Option<f64>,
        /// Overrides the configured basic burst
        #[arg(long)]
        burst: Option<u32>,
    },
    /// Process-wide limiter outermost, per-phone limiter inside
    Chain {
        #[arg(long, default_value_t = 7)]
        sends: u32,
        #[arg(long, default_value = "0966666666")]
        phone: String,
    },
}

#[derive(Debug, Default)]
struct Summary {
    sent: u32,
    denied: u32,
    failed: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting admission demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config =
        AdmissionConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let (ctx, cancel) = Context::background().with_cancel();
    tokio::spawn(cancel_on_shutdown(cancel));

    let service = SimulatedSmsService::new(config.sms.clone());

    let (runner, request, sends) = match cli.scenario {
        Scenario::Basic { sends, rate, burst } => {
            if let Some(rate) = rate {
                config.basic.rate = rate;
            }
            if let Some(burst) = burst {
                config.basic.burst = burst;
            }
            info!(rate = config.basic.rate, burst = config.basic.burst, "Running basic scenario");

            let runner = ratelimit::new(global_limiter(&config.basic)?);
            (runner, SmsRequest::new("0966666666", "Your code is 1234"), sends)
        }
        Scenario::Chain { sends, phone } => {
            info!(
                global_rate = config.global.rate,
                per_caller_rate = config.per_caller.rate,
                phone = %phone,
                "Running chain scenario"
            );

            let runner = RunnerChain::new()
                .with(ratelimit::middleware(global_limiter(&config.global)?))
                .with(ratelimit::middleware(phone_limiter(&config.per_caller)?))
                .build();
            (runner, SmsRequest::new(phone, "Your code is 1234"), sends)
        }
    };

    let summary = send_all(runner.as_ref(), &ctx, &service, &request, sends).await;

    info!(
        sent = summary.sent,
        denied = summary.denied,
        failed = summary.failed,
        "Admission demo finished"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Limiter keyed by a constant: every send shares one bucket.
fn global_limiter(settings: &StoreSettings) -> anyhow::Result<LimiterConfig> {
    let store = TotalStore::with_config(settings.total()?);

    Ok(LimiterConfig::builder()
        .identifier(|_| Ok("total".to_string()))
        .on_error(|_, err| {
            warn!(error = %err, "Global limiter could not identify the send");
            Some(err)
        })
        .on_deny(|_, identifier, err| {
            warn!(identifier = %identifier, "Global limit reached");
            Some(err)
        })
        .store(store)
        .build()?)
}

/// Limiter keyed by the phone number of the request carried in the context.
fn phone_limiter(settings: &StoreSettings) -> anyhow::Result<LimiterConfig> {
    let store = IndividualStore::with_config(settings.individual()?);

    Ok(LimiterConfig::builder()
        .identifier(|ctx| {
            ctx.value::<SmsRequest>()
                .map(|request| request.phone_number.clone())
                .ok_or_else(|| "no SMS request in context".into())
        })
        .on_error(|_, err| {
            warn!(error = %err, "Per-phone limiter could not identify the caller");
            Some(err)
        })
        .on_deny(|_, identifier, err| {
            warn!(phone = %identifier, "Per-phone limit reached");
            Some(err)
        })
        .store(store)
        .build()?)
}

async fn send_all(
    runner: &dyn Runner,
    ctx: &Context,
    service: &dyn SmsService,
    request: &SmsRequest,
    sends: u32,
) -> Summary {
    let ctx = ctx.with_value(request.clone());
    let mut summary = Summary::default();

    for n in 1..=sends {
        let mut response: Option<SmsResponse> = None;
        let slot = &mut response;

        let result = runner
            .run(
                &ctx,
                Work::new(move |ctx| async move {
                    *slot = Some(service.send_sms(&ctx, request).await?);
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(()) => match response {
                Some(response) => {
                    summary.sent += 1;
                    info!(send = n, id = %response.data.id, "SMS sent");
                }
                None => info!(send = n, "Send skipped by limiter handler"),
            },
            Err(err) if err.is_denied() => {
                summary.denied += 1;
                info!(send = n, reason = %err, "SMS not sent");
            }
            Err(err) if err.is_cancelled() => {
                warn!(send = n, "Shutdown requested, stopping");
                break;
            }
            Err(err) => {
                summary.failed += 1;
                error!(send = n, error = %err, "SMS send failed");
            }
        }
    }

    summary
}

/// Cancel the root context on Ctrl+C or SIGTERM.
async fn cancel_on_shutdown(cancel: CancelHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling outstanding work");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling outstanding work");
        }
    }

    cancel.cancel();
}
