use super::ui;
use crate::App;
use crate::core::error::MetricsError;
use crate::core::metrics::{RiskMetrics, SharpeRatio};
use crate::core::model::Fund;
use anyhow::{Result, bail};
use comfy_table::{Cell, CellAlignment, Color, Table};

pub async fn run(app: &App, window: Option<usize>) -> Result<()> {
    let window = window.unwrap_or(app.config.metrics.window);
    if window < 2 {
        bail!("Window must cover at least 2 observations, got {window}");
    }

    let funds = app.engine.funds().await?;
    let mut rows = Vec::with_capacity(funds.len());
    for fund in funds {
        let result = app
            .engine
            .fund_metrics(&fund.code, window, app.config.metrics.risk_free_rate)
            .await?;
        rows.push((fund, result));
    }

    println!(
        "\n{}",
        ui::style_text(
            &format!("Risk metrics (trailing {window} observations)"),
            ui::StyleType::Title
        )
    );
    println!("{}", render_metrics(&rows));
    Ok(())
}

fn sharpe_cell(sharpe: SharpeRatio) -> Cell {
    match sharpe {
        SharpeRatio::Defined(value) => {
            Cell::new(format!("{value:.2}")).set_alignment(CellAlignment::Right)
        }
        SharpeRatio::InsufficientVariance => Cell::new("flat")
            .fg(Color::DarkGrey)
            .set_alignment(CellAlignment::Right),
    }
}

pub fn render_metrics(rows: &[(Fund, Result<RiskMetrics, MetricsError>)]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Fund"),
        ui::header_cell("Name"),
        ui::header_cell("Obs"),
        ui::header_cell("Sharpe"),
        ui::header_cell("Max drawdown"),
        ui::header_cell("Volatility"),
        ui::header_cell("Ann. return"),
    ]);

    for (fund, result) in rows {
        let mut row = vec![Cell::new(&fund.code), Cell::new(&fund.name)];
        match result {
            Ok(metrics) => row.extend([
                Cell::new(metrics.window_size).set_alignment(CellAlignment::Right),
                sharpe_cell(metrics.sharpe),
                ui::percent_cell(metrics.max_drawdown),
                ui::percent_cell(metrics.annualized_volatility),
                ui::change_cell(metrics.annualized_return),
            ]),
            Err(e) => {
                let observations = match e {
                    MetricsError::InsufficientData { observations } => Some(*observations),
                    _ => None,
                };
                row.push(ui::format_optional_cell(observations, |n| n.to_string()));
                row.push(Cell::new(e.to_string()).fg(Color::DarkGrey));
            }
        }
        table.add_row(row);
    }
    table
}
