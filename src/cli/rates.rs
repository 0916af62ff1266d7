use super::ui;
use crate::app::App;
use crate::core::portfolio::symbol_key;
use crate::core::rate::PriceQuote;
use anyhow::{Result, bail};
use comfy_table::Cell;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

pub async fn rate(app: &App, from: &str, to: &str) -> Result<String> {
    let (from, to) = (symbol_key(from), symbol_key(to));
    let rate = app.converter.rate(&from, &to).await?;
    Ok(format!(
        "1 {} = {} {}",
        from,
        ui::style_text(&ui::format_amount(rate, 8), ui::StyleType::TotalValue),
        to
    ))
}

pub async fn convert(app: &App, amount: Decimal, from: &str, to: &str) -> Result<String> {
    let (from, to) = (symbol_key(from), symbol_key(to));
    let converted = app.converter.convert(amount, &from, &to).await?;
    Ok(format!(
        "{} {} = {} {}",
        ui::format_amount(amount, 8),
        from,
        ui::style_text(&ui::format_amount(converted, 8), ui::StyleType::TotalValue),
        to
    ))
}

/// Queries the feed directly, bypassing the rate cache, and shows the full
/// quote for each symbol.
pub async fn prices(app: &App, symbols: &[String]) -> Result<String> {
    let wanted: Vec<String> = symbols.iter().map(|s| symbol_key(s)).collect();
    if wanted.is_empty() {
        bail!("No symbols given");
    }
    let request: HashSet<String> = wanted.iter().cloned().collect();
    let quotes = app.source.fetch_prices(&request).await?;
    Ok(display_quotes(&wanted, &quotes, app.source.quote_currency()))
}

pub fn display_quotes(
    symbols: &[String],
    quotes: &HashMap<String, PriceQuote>,
    quote_currency: &str,
) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell(&format!("Price ({quote_currency})")),
        ui::header_cell("Market Cap"),
        ui::header_cell("24h Volume"),
        ui::header_cell("24h Change"),
        ui::header_cell("Updated"),
    ]);

    for symbol in symbols {
        let quote = quotes.get(symbol);
        let change = quote.and_then(|q| q.change_24h);
        table.add_row(vec![
            Cell::new(symbol),
            ui::format_optional_cell(quote.and_then(|q| q.usable_price()), |p| {
                ui::format_amount(p, 8)
            }),
            ui::format_optional_cell(quote.and_then(|q| q.market_cap), |v| {
                ui::format_amount(v, 0)
            }),
            ui::format_optional_cell(quote.and_then(|q| q.volume_24h), |v| {
                ui::format_amount(v, 0)
            }),
            match change {
                Some(c) => ui::change_cell(format!("{}%", ui::format_amount(c, 2)), c),
                None => ui::format_optional_cell(None::<Decimal>, |v| v.to_string()),
            },
            ui::format_optional_cell(quote.and_then(|q| q.last_updated_at), |t| {
                t.format("%Y-%m-%d %H:%M:%S").to_string()
            }),
        ]);
    }
    table.to_string()
}
