#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use checklist_crawler_lib::application::CrawlerService;
use checklist_crawler_lib::cli::{CliArgs, Command, USAGE};
use checklist_crawler_lib::crawling::CrawlOrchestrator;
use checklist_crawler_lib::domain::{RunEvent, RunId};
use checklist_crawler_lib::infrastructure::logging::log_system_info;
use checklist_crawler_lib::infrastructure::{
    ApiClient, AppConfig, RunBroadcaster, RunSubscription, WebDriverLauncher, init_logging_with_config,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<bool> {
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging_with_config(config.logging.clone()).context("Failed to initialize logging")?;
    log_system_info();

    let api = Arc::new(ApiClient::new(&config.api).context("Failed to build API client")?);
    let launcher = Arc::new(WebDriverLauncher::new(config.browser.webdriver_url.clone()));
    let areas = config.app.areas.clone();
    let orchestrator = CrawlOrchestrator::new(Arc::new(config), launcher, api.clone(), api);
    let service = CrawlerService::new(orchestrator, RunBroadcaster::new());

    let run_id = args.run_id.clone().unwrap_or_else(RunId::generate);
    let watched = match args.command {
        Command::AllAreas => areas.iter().map(|area| run_id.for_area(area)).collect(),
        _ => vec![run_id.clone()],
    };
    let printers: Vec<_> = watched
        .iter()
        .map(|id| tokio::spawn(print_events(service.subscribe(id))))
        .collect();
    let only_unapproved = !args.full;

    let work = async {
        match (args.command, args.area.as_deref()) {
            (Command::AllAreas, _) => {
                let results = service.trigger_all_areas_phase_one(Some(run_id.clone())).await;
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                info!("🏁 All areas done: {} ok, {} failed", results.len() - failed, failed);
                failed == 0
            }
            (Command::PhaseOne, Some(area)) => service.trigger_phase_one(area, Some(run_id)).await.is_ok(),
            (Command::PhaseTwo, Some(area)) => service
                .trigger_phase_two(area, only_unapproved, Some(run_id))
                .await
                .is_ok(),
            (Command::Both, Some(area)) => service.trigger_both(area, only_unapproved, Some(run_id)).await.is_ok(),
            (_, None) => {
                error!("❌ --area is required");
                false
            }
        }
    };

    let ok = tokio::select! {
        ok = work => ok,
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Interrupted, browser session may be left open");
            false
        }
    };

    drop(service);
    for printer in printers {
        if let Err(e) = printer.await {
            warn!("Event printer stopped: {}", e);
        }
    }
    Ok(ok)
}

/// Logs every non-log event of the run; `log` events are already in the log.
async fn print_events(mut subscription: RunSubscription) {
    while let Some(event) = subscription.recv().await {
        if matches!(event, RunEvent::Log { .. }) {
            continue;
        }
        match serde_json::to_string(&event) {
            Ok(json) => info!("📡 [{}] {}", subscription.run_id(), json),
            Err(e) => warn!("Unserializable {} event: {}", event.kind(), e),
        }
    }
}
