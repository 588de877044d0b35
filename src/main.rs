use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use locale_sync::config::Settings;
use locale_sync::scheduler::TickOutcome;
use locale_sync::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    locale_sync::init_tracing();
    info!("locale-sync starting");

    let settings = Settings::load().context("loading settings")?;
    let engine = Engine::new(settings).context("opening cycle history")?;

    if std::env::args().any(|arg| arg == "--once") {
        return match engine.run_once().await {
            TickOutcome::Completed(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                if result.successful {
                    Ok(())
                } else {
                    anyhow::bail!("cycle finished with {} errors", result.errors.len())
                }
            }
            TickOutcome::Dropped => anyhow::bail!("a cycle is already running"),
            TickOutcome::Failed(message) => anyhow::bail!("cycle failed: {message}"),
        };
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            return;
        }
        info!("shutdown requested");
        signal.cancel();
    });

    engine.run(shutdown).await;

    let report = engine.metrics.report();
    for (name, timing) in &report.timings {
        info!(metric = %name, count = timing.count, mean_ms = timing.mean_ms, p95_ms = timing.p95_ms, max_ms = timing.max_ms, "timing");
    }
    info!(cycles = report.cycles, counters = ?report.counters, "locale-sync stopped");
    Ok(())
}
