mod aggregate;
mod broadcast;
mod cancel;
mod cli;
mod config;
mod directory;
mod error;
mod locations;
mod measure;
mod models;
mod orchestrator;
mod report;
mod run;
mod sampler;
mod storage;
mod trace;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broadcast::{StreamBroadcaster, StreamEvent};
use crate::cancel::{CancelScopes, Scope};
use crate::cli::{Cli, Command, TestArgs};
use crate::config::{Settings, load_settings};
use crate::directory::SpeedtestDirectory;
use crate::locations::LocationCatalog;
use crate::measure::HttpMeasurer;
use crate::models::CallerInfo;
use crate::orchestrator::LocationTester;
use crate::report::ConsoleObserver;
use crate::run::RunController;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = load_settings()?;
    let catalog = LocationCatalog::builtin()?;

    match cli.command {
        Command::Locations => report::print_locations(&catalog),
        Command::Show { file } => {
            let path = file.unwrap_or_else(|| Path::new(&settings.output_dir).join(storage::LATEST_FILE));
            let record = storage::load_record(&path).await?;
            report::print_summary(&record, None);
        }
        Command::Test(args) => run_test(settings, catalog, args).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,globeprobe={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_test(settings: Settings, catalog: LocationCatalog, args: TestArgs) -> Result<()> {
    let settings = settings.with_overrides(
        args.output.as_deref(),
        args.threads.map(usize::from),
        args.max_providers.map(usize::from),
    );
    let catalog = if args.locations.is_empty() {
        catalog
    } else {
        catalog.subset(&args.locations)?
    };

    let client = Client::builder()
        .user_agent(&settings.user_agent)
        .timeout(settings.request_timeout)
        .build()?;

    println!("🌍 Starting global speed test with User-Agent: {}", settings.user_agent);

    let user_info = caller_info(&client, &settings).await;

    let directory = SpeedtestDirectory::new(
        client.clone(),
        &settings.directory_url,
        settings.directory_limit,
    )?;
    let m = &settings.measurement;
    let measurer = HttpMeasurer::new(client.clone(), m.ping_count, m.download_size, m.upload_bytes);
    let orchestrator_settings = settings.orchestrator();

    let broadcaster = Arc::new(StreamBroadcaster::new(catalog.locations().to_vec()));
    let console = spawn_console(broadcaster.clone());

    let scopes = Arc::new(CancelScopes::new());
    let interrupts = spawn_interrupt_handler(scopes.clone());

    let tester = LocationTester::new(&directory, &measurer, &orchestrator_settings);
    let mut controller =
        RunController::new(tester, settings.inter_location_delay).with_broadcaster(&broadcaster);

    let started = Instant::now();
    let record = controller.run_all(&catalog, user_info, &scopes).await;
    interrupts.abort();
    if let Err(e) = console.await {
        warn!(error = %e, "console observer stopped early");
    }

    let saved = storage::persist_run(Path::new(&settings.output_dir), &record).await?;
    report::print_summary(&record, Some(&saved));
    println!(
        "⏱️  Finished in {}",
        humantime::format_duration(Duration::from_secs(started.elapsed().as_secs()))
    );

    Ok(())
}

async fn caller_info(client: &Client, settings: &Settings) -> Option<CallerInfo> {
    if !settings.lookup_caller_info {
        return None;
    }
    match trace::fetch_caller_info(client, &settings.trace_url, settings.request_timeout).await {
        Ok(info) => {
            info!(
                ip = %info.ip,
                country = info.country.as_deref().unwrap_or("N/A"),
                colo = info.colo.as_deref().unwrap_or("N/A"),
                "caller identified"
            );
            Some(info)
        }
        Err(e) => {
            warn!(error = %e, "could not determine caller info");
            None
        }
    }
}

fn spawn_console(broadcaster: Arc<StreamBroadcaster>) -> JoinHandle<()> {
    let mut subscription = broadcaster.subscribe();
    tokio::spawn(async move {
        let mut observer = ConsoleObserver::default();
        while let Some(text) = subscription.events.recv().await {
            match serde_json::from_str::<StreamEvent>(&text) {
                Ok(event) => {
                    observer.handle(&event);
                    if event == StreamEvent::RunCompleted {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "undecodable stream event"),
            }
        }
        broadcaster.unsubscribe(subscription.id);
        debug!(remaining = broadcaster.subscriber_count(), "console observer detached");
    })
}

fn spawn_interrupt_handler(scopes: Arc<CancelScopes>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut presses = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            let scope = Scope::for_interrupt(presses + 1);
            if !scopes.cancel(scope) {
                info!(?scope, "interrupt: nothing in flight at this scope");
                continue;
            }
            presses += 1;
            match scope {
                Scope::Provider => warn!("interrupt: skipping current provider, press again to skip the location"),
                Scope::Location => warn!("interrupt: skipping current location, press again to stop the run"),
                Scope::Run => {
                    warn!("interrupt: stopping the run");
                    break;
                }
            }
        }
    })
}
