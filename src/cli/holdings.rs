use super::ui;
use crate::app::App;
use crate::core::portfolio::Portfolio;
use anyhow::Result;
use comfy_table::Cell;
use rust_decimal::Decimal;

pub enum PositionChange {
    AddHolding {
        symbol: String,
        amount: Decimal,
        cost_basis: Decimal,
    },
    RemoveHolding {
        symbol: String,
    },
    AdjustHolding {
        symbol: String,
        amount: Decimal,
    },
    Deposit {
        symbol: String,
        amount: Decimal,
    },
    Withdraw {
        symbol: String,
        amount: Decimal,
    },
}

/// Applies one change to the owner's positions and shows the result.
/// Valuation totals are left to the next `summary`.
pub async fn run(app: &App, owner: &str, change: PositionChange) -> Result<String> {
    let ledger = &app.ledger;
    let (portfolio, message) = match change {
        PositionChange::AddHolding {
            symbol,
            amount,
            cost_basis,
        } => (
            ledger.add_holding(owner, &symbol, amount, cost_basis).await?,
            format!("Added {amount} {symbol} at {cost_basis}"),
        ),
        PositionChange::RemoveHolding { symbol } => (
            ledger.remove_holding(owner, &symbol).await?,
            format!("Removed {symbol}"),
        ),
        PositionChange::AdjustHolding { symbol, amount } => (
            ledger.adjust_holding(owner, &symbol, amount).await?,
            format!("Set {symbol} to {amount}"),
        ),
        PositionChange::Deposit { symbol, amount } => (
            ledger.credit_cash(owner, &symbol, amount).await?,
            format!("Deposited {amount} {symbol}"),
        ),
        PositionChange::Withdraw { symbol, amount } => (
            ledger.debit_cash(owner, &symbol, amount).await?,
            format!("Withdrew {amount} {symbol}"),
        ),
    };
    Ok(format!("{message}\n\n{}", display_positions(&portfolio)))
}

pub fn display_positions(portfolio: &Portfolio) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell("Amount"),
        ui::header_cell("Cost Basis"),
        ui::header_cell("Acquired"),
    ]);
    for holding in &portfolio.holdings {
        table.add_row(vec![
            Cell::new(&holding.symbol),
            ui::amount_cell(holding.amount, 8),
            ui::amount_cell(holding.cost_basis_per_unit, 2),
            Cell::new(holding.acquired_at.format("%Y-%m-%d").to_string()),
        ]);
    }
    for (symbol, balance) in &portfolio.cash_by_symbol {
        table.add_row(vec![
            Cell::new(format!("{symbol} (cash)")),
            ui::amount_cell(*balance, 2),
            Cell::new("-"),
            Cell::new("-"),
        ]);
    }
    format!(
        "Portfolio: {}\n\n{}",
        ui::style_text(&portfolio.owner_id, ui::StyleType::Title),
        table
    )
}
