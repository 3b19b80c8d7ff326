use super::ui;
use crate::App;
use crate::core::nav::sync_nav_history;
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};

/// Pulls confirmed NAV history for every configured fund.
pub async fn run(app: &App) -> Result<()> {
    let funds = app.engine.funds().await?;
    if funds.is_empty() {
        println!("No funds configured.");
        return Ok(());
    }

    let spinner = ui::new_spinner(&format!("Syncing NAV history for {} fund(s)...", funds.len()));
    let report = sync_nav_history(
        app.nav_provider.as_ref(),
        app.engine.nav_store().as_ref(),
        &funds,
    )
    .await;
    spinner.finish_and_clear();

    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Fund"), ui::header_cell("New NAVs")]);
    for (code, appended) in &report.synced {
        table.add_row(vec![
            Cell::new(code),
            Cell::new(appended).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");

    if !report.failed.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("Sync failed for: {}", report.failed.join(", ")),
                ui::StyleType::Error
            )
        );
    }
    Ok(())
}
