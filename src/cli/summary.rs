use super::ui;
use crate::app::App;
use crate::core::error::LedgerError;
use crate::core::portfolio::Portfolio;
use anyhow::{Result, bail};
use comfy_table::Cell;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::warn;

/// Renders a portfolio with the metrics of its last recompute. `error` is
/// shown in place of the totals when the latest recompute failed.
pub fn display_portfolio(
    portfolio: &Portfolio,
    currency: &str,
    error: Option<&LedgerError>,
) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell("Amount"),
        ui::header_cell("Cost Basis"),
        ui::header_cell(&format!("Value ({currency})")),
        ui::header_cell("Gain/Loss"),
    ]);

    let priced = error.is_none() && portfolio.last_recomputed_at.is_some();
    for holding in &portfolio.holdings {
        let invested = holding.amount * holding.cost_basis_per_unit;
        let gain = holding.last_priced_value - invested;
        table.add_row(vec![
            Cell::new(&holding.symbol),
            ui::amount_cell(holding.amount, 8),
            ui::amount_cell(holding.cost_basis_per_unit, 2),
            ui::format_optional_cell(priced.then_some(holding.last_priced_value), |v| {
                ui::format_amount(v, 2)
            }),
            if priced {
                ui::change_cell(ui::format_amount(gain, 2), gain)
            } else {
                ui::format_optional_cell(None::<Decimal>, |v| v.to_string())
            },
        ]);
    }
    for (symbol, balance) in &portfolio.cash_by_symbol {
        let face_value = (symbol == currency).then_some(*balance);
        table.add_row(vec![
            Cell::new(format!("{symbol} (cash)")),
            ui::amount_cell(*balance, 2),
            Cell::new("-"),
            ui::format_optional_cell(face_value, |v| ui::format_amount(v, 2)),
            Cell::new("-"),
        ]);
    }

    let mut output = format!(
        "Portfolio: {}\n\n",
        ui::style_text(&portfolio.owner_id, ui::StyleType::Title)
    );
    output.push_str(&table.to_string());

    match (error, priced) {
        (Some(e), _) => output.push_str(&format!(
            "\n\n{}",
            ui::style_text(&format!("Valuation failed: {e}"), ui::StyleType::Error)
        )),
        (None, false) => output.push_str(&format!(
            "\n\n{}",
            ui::style_text("Not valued yet", ui::StyleType::Subtle)
        )),
        (None, true) => {
            output.push_str(&format!(
                "\n\nTotal Value ({}): {}",
                ui::style_text(currency, ui::StyleType::TotalLabel),
                ui::style_text(
                    &ui::format_amount(portfolio.total_value, 2),
                    ui::StyleType::TotalValue
                )
            ));
            output.push_str(&format!(
                "\nInvested: {}  Gain/Loss: {} ({}%)",
                ui::format_amount(portfolio.total_invested, 2),
                ui::format_amount(portfolio.gain_loss, 2),
                ui::format_amount(portfolio.gain_loss_percent, 2)
            ));
        }
    }
    output
}

/// Values each owner's portfolio and prints it, followed by a grand total
/// when every valuation succeeded.
pub async fn run(app: &App, owners: &[String]) -> Result<()> {
    let owners = app.owners_or_accounts(owners);
    if owners.is_empty() {
        bail!("No owners given and no accounts configured");
    }
    let currency = app.pivot();

    let mut pairs = BTreeSet::new();
    for owner in &owners {
        let portfolio = app.ledger.portfolio(owner).await?;
        let symbols = portfolio
            .holdings
            .iter()
            .map(|h| h.symbol.clone())
            .chain(portfolio.cash_by_symbol.keys().cloned());
        pairs.extend(
            symbols
                .filter(|s| s != currency)
                .map(|s| (s, currency.to_string())),
        );
    }
    let pairs: Vec<_> = pairs.into_iter().collect();
    let warmed = app.cache.warm(&pairs).await;
    let failed = warmed.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!("{} of {} rates could not be fetched", failed, pairs.len());
    }

    let pb = ui::new_progress_bar(owners.len() as u64, true);
    pb.set_message("Valuing portfolios...");
    let valuations = owners.iter().map(|owner| {
        let pb_clone = pb.clone();
        async move {
            let result = app
                .ledger
                .recompute_metrics(owner, &app.converter, currency)
                .await;
            pb_clone.inc(1);
            (owner, result)
        }
    });
    let valuations = join_all(valuations).await;
    pb.finish_and_clear();

    let mut grand_total = Decimal::ZERO;
    let mut all_valued = true;
    let count = valuations.len();
    for (i, (owner, result)) in valuations.into_iter().enumerate() {
        let output = match result {
            Ok(portfolio) => {
                grand_total += portfolio.total_value;
                display_portfolio(&portfolio, currency, None)
            }
            Err(e) => {
                all_valued = false;
                let stored = app.ledger.portfolio(owner).await?;
                display_portfolio(&stored, currency, Some(&e))
            }
        };
        println!("{output}");
        if i < count - 1 {
            ui::print_separator();
        }
    }

    if all_valued && count > 1 {
        println!(
            "\nGrand Total ({}): {}",
            ui::style_text(currency, ui::StyleType::TotalLabel),
            ui::style_text(&ui::format_amount(grand_total, 2), ui::StyleType::TotalValue)
        );
    }
    Ok(())
}
