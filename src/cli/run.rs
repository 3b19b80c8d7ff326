use super::ui;
use crate::App;
use crate::core::scheduler::{Scheduler, SchedulerSettings};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

/// Runs the scheduler until Ctrl-C.
pub async fn run(app: &App) -> Result<()> {
    let settings = SchedulerSettings::from_config(&app.config)?;
    let scheduler = Scheduler::new(
        Arc::clone(&app.engine),
        app.window.clone(),
        settings,
        Some(Arc::clone(&app.nav_provider)),
    );

    println!(
        "{}",
        ui::style_text(
            &format!(
                "Valuing {} fund(s) every {} minute(s) between {} and {}. Press Ctrl-C to stop.",
                app.config.funds.len(),
                app.config.schedule.interval_minutes,
                app.config.schedule.window_start,
                app.config.schedule.window_end
            ),
            ui::StyleType::Subtle
        )
    );

    scheduler
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => {
                    error!("Could not listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;
    Ok(())
}
