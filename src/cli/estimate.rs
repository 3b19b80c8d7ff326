use super::ui;
use crate::App;
use crate::core::engine::TickReport;
use crate::core::model::Fund;
use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Table};

/// Runs one valuation tick now, regardless of the trading window.
pub async fn run(app: &App) -> Result<()> {
    let funds = app.engine.funds().await?;
    if funds.is_empty() {
        println!("No funds configured.");
        return Ok(());
    }

    let now = Utc::now();
    if !app.window.contains(now) {
        println!(
            "{}",
            ui::style_text(
                "Outside the trading window, quotes may be from the last session.",
                ui::StyleType::Subtle
            )
        );
    }

    let spinner = ui::new_spinner("Fetching quotes...");
    let report = app.engine.run_tick(now, app.window.local_date(now)).await;
    spinner.finish_and_clear();
    let report = report?;

    println!(
        "\n{}",
        ui::style_text("Intraday estimates", ui::StyleType::Title)
    );
    println!("{}", render_estimates(&funds, &report));

    if !report.failed.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("Could not value: {}", report.failed.join(", ")),
                ui::StyleType::Error
            )
        );
    }
    if report.missing > 0 {
        println!(
            "{}",
            ui::style_text(
                &format!("{} of {} symbols had no quote", report.missing, report.symbols),
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}

pub fn render_estimates(funds: &[Fund], report: &TickReport) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Fund"),
        ui::header_cell("Name"),
        ui::header_cell("Est. change"),
        ui::header_cell("Est. NAV"),
        ui::header_cell("Completeness"),
        ui::header_cell("Top 10"),
        ui::header_cell("Flags"),
    ]);

    for valuation in &report.valued {
        let name = funds
            .iter()
            .find(|f| f.code == valuation.fund_code)
            .map_or("", |f| f.name.as_str());
        let mut flags = Vec::new();
        if valuation.stale {
            flags.push("stale");
        }
        if valuation.partial_data {
            flags.push("partial");
        }
        table.add_row(vec![
            Cell::new(&valuation.fund_code),
            Cell::new(name),
            ui::change_cell(valuation.estimated_change),
            ui::format_optional_cell(valuation.estimated_nav, |nav| format!("{nav:.4}")),
            ui::percent_cell(valuation.completeness),
            ui::format_optional_cell(
                report.concentration.get(&valuation.fund_code).copied(),
                |c| format!("{:.2}%", c * 100.0),
            ),
            Cell::new(flags.join(", ")),
        ]);
    }
    table
}
