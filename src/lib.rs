pub mod app;
pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::app::App;
use crate::cli::holdings::PositionChange;
use crate::cli::transactions::TransactionEvent;
use crate::core::config::AppConfig;
use crate::core::transaction::TransactionRequest;
use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{debug, info};

pub enum AppCommand {
    Setup,
    Summary {
        owners: Vec<String>,
    },
    Rate {
        from: String,
        to: String,
    },
    Convert {
        amount: Decimal,
        from: String,
        to: String,
    },
    Prices {
        symbols: Vec<String>,
    },
    Position {
        owner: String,
        change: PositionChange,
    },
    Submit(TransactionRequest),
    Event {
        id: String,
        event: TransactionEvent,
    },
    Transactions {
        owner: String,
        limit: usize,
    },
    Show {
        id: String,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    if let AppCommand::Setup = command {
        return match config_path {
            Some(path) => cli::setup::setup_at_path(path),
            None => cli::setup::setup(),
        };
    }

    info!("xbridge starting...");
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::new(config).await?;
    if let Some(output) = execute(&app, command).await? {
        println!("{output}");
    }
    Ok(())
}

/// Runs a command against an assembled app. Returns the rendered output for
/// commands that produce one; `summary` prints as it goes.
pub async fn execute(app: &App, command: AppCommand) -> Result<Option<String>> {
    let output = match command {
        AppCommand::Setup => None,
        AppCommand::Summary { owners } => {
            cli::summary::run(app, &owners).await?;
            None
        }
        AppCommand::Rate { from, to } => Some(cli::rates::rate(app, &from, &to).await?),
        AppCommand::Convert { amount, from, to } => {
            Some(cli::rates::convert(app, amount, &from, &to).await?)
        }
        AppCommand::Prices { symbols } => Some(cli::rates::prices(app, &symbols).await?),
        AppCommand::Position { owner, change } => {
            Some(cli::holdings::run(app, &owner, change).await?)
        }
        AppCommand::Submit(request) => Some(cli::transactions::submit(app, request).await?),
        AppCommand::Event { id, event } => {
            Some(cli::transactions::apply(app, &id, event).await?)
        }
        AppCommand::Transactions { owner, limit } => {
            Some(cli::transactions::list(app, &owner, limit).await?)
        }
        AppCommand::Show { id } => Some(cli::transactions::show(app, &id).await?),
    };
    Ok(output)
}
