use super::ui;
use crate::app::App;
use crate::core::transaction::{Transaction, TransactionRequest, TransactionState};
use anyhow::Result;
use comfy_table::{Cell, Color};

/// Lifecycle events accepted by an existing transaction.
pub enum TransactionEvent {
    Approve,
    Cancel,
    Confirm { delivered: bool },
    /// Finish whatever a storage fault interrupted.
    Resume,
}

pub async fn submit(app: &App, request: TransactionRequest) -> Result<String> {
    let tx = app.processor.create(request).await?;
    Ok(display_transaction(&tx))
}

pub async fn apply(app: &App, id: &str, event: TransactionEvent) -> Result<String> {
    let tx = match event {
        TransactionEvent::Approve => app.processor.approve(id).await?,
        TransactionEvent::Cancel => app.processor.cancel(id).await?,
        TransactionEvent::Confirm { delivered } => app.processor.confirm(id, delivered).await?,
        TransactionEvent::Resume => app.processor.resume(id).await?,
    };
    Ok(display_transaction(&tx))
}

pub async fn show(app: &App, id: &str) -> Result<String> {
    let tx = app.processor.get(id).await?;
    Ok(display_transaction(&tx))
}

pub async fn list(app: &App, owner: &str, limit: usize) -> Result<String> {
    let transactions = app.processor.list_for_owner(owner, limit).await?;
    if transactions.is_empty() {
        return Ok(ui::style_text(
            &format!("No transactions for {owner}"),
            ui::StyleType::Subtle,
        ));
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Kind"),
        ui::header_cell("Counterparty"),
        ui::header_cell("Amount"),
        ui::header_cell("Settled"),
        ui::header_cell("State"),
        ui::header_cell("Created"),
    ]);
    for tx in &transactions {
        table.add_row(vec![
            Cell::new(&tx.id),
            Cell::new(tx.kind.name()),
            Cell::new(tx.kind.counterparty()),
            Cell::new(format!("{} {}", ui::format_amount(tx.amount, 8), tx.from_asset)),
            ui::format_optional_cell(tx.settlement.as_ref(), |s| {
                format!("{} {}", ui::format_amount(s.settled_amount, 8), tx.to_asset)
            }),
            state_cell(tx.state),
            Cell::new(tx.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    Ok(format!(
        "Transactions: {}\n\n{}",
        ui::style_text(owner, ui::StyleType::Title),
        table
    ))
}

pub fn display_transaction(tx: &Transaction) -> String {
    let mut table = ui::new_styled_table();
    let mut row = |label: &str, value: Cell| {
        table.add_row(vec![ui::header_cell(label), value]);
    };

    row("Id", Cell::new(&tx.id));
    row("Kind", Cell::new(tx.kind.name()));
    row("Owner", Cell::new(&tx.owner_id));
    row("Counterparty", Cell::new(tx.kind.counterparty()));
    row(
        "Amount",
        Cell::new(format!("{} {}", ui::format_amount(tx.amount, 8), tx.from_asset)),
    );
    row(
        "Rate",
        ui::format_optional_cell(tx.rate_at_execution, |r| {
            format!("{} {}/{}", ui::format_amount(r, 8), tx.to_asset, tx.from_asset)
        }),
    );
    row(
        "Settled",
        ui::format_optional_cell(tx.settlement.as_ref(), |s| {
            format!("{} {}", ui::format_amount(s.settled_amount, 8), tx.to_asset)
        }),
    );
    row("State", state_cell(tx.state));
    if let Some(description) = &tx.description {
        row("Description", Cell::new(description));
    }
    if let Some(failure) = &tx.failure {
        row("Failure", Cell::new(failure.to_string()).fg(Color::Red));
    }
    row(
        "Created",
        Cell::new(tx.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
    );
    row(
        "Completed",
        ui::format_optional_cell(tx.completed_at, |t| {
            t.format("%Y-%m-%d %H:%M:%S").to_string()
        }),
    );
    table.to_string()
}

fn state_cell(state: TransactionState) -> Cell {
    let color = match state {
        TransactionState::Completed => Color::Green,
        TransactionState::Failed => Color::Red,
        TransactionState::Cancelled => Color::DarkGrey,
        _ => Color::Yellow,
    };
    Cell::new(state.to_string()).fg(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LedgerError;
    use crate::core::transaction::TransactionKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_display_failed_transaction() {
        let mut tx = Transaction::new(TransactionRequest {
            owner_id: "alice".to_string(),
            kind: TransactionKind::Payment {
                payee: "shop".to_string(),
            },
            from_asset: "USD".to_string(),
            to_asset: "EUR".to_string(),
            amount: dec!(125),
            description: Some("groceries".to_string()),
        });
        tx.state = TransactionState::Failed;
        tx.failure = Some(LedgerError::InsufficientFunds {
            symbol: "USD".to_string(),
            available: dec!(100),
            requested: dec!(125),
        });

        let output = display_transaction(&tx);
        assert!(output.contains(&tx.id));
        assert!(output.contains("payment"));
        assert!(output.contains("shop"));
        assert!(output.contains("125 USD"));
        assert!(output.contains("groceries"));
        assert!(output.contains("failed"));
        assert!(output.contains("Insufficient funds"));
    }
}
