use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use rust_decimal::Decimal;
use xbridge::cli::holdings::PositionChange;
use xbridge::cli::transactions::TransactionEvent;
use xbridge::core::log::init_logging;
use xbridge::core::processor::DEFAULT_LIST_LIMIT;
use xbridge::core::transaction::{TransactionKind, TransactionRequest};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Value portfolios (all configured accounts by default)
    Summary { owners: Vec<String> },
    /// Show the rate between two assets
    Rate { from: String, to: String },
    /// Convert an amount between assets
    Convert {
        amount: Decimal,
        from: String,
        to: String,
    },
    /// Show feed quotes for symbols
    Prices {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Add, remove or adjust holdings
    #[command(subcommand)]
    Holding(HoldingCommands),
    /// Deposit or withdraw cash
    #[command(subcommand)]
    Cash(CashCommands),
    /// Move value to a recipient immediately
    Transfer(MoveArgs),
    /// Create a payment that waits for approval
    Pay(MoveArgs),
    /// Escrow funds for an international remittance
    Remit(MoveArgs),
    /// Approve a pending payment
    Approve { id: String },
    /// Cancel a pending payment or remittance
    Cancel { id: String },
    /// Record the outcome of a remittance's international leg
    Confirm {
        id: String,
        /// The transfer did not arrive; refund the escrow
        #[arg(long)]
        failed: bool,
    },
    /// Finish a transaction interrupted by a storage fault
    Resume { id: String },
    /// List an owner's transactions, newest first
    Transactions {
        owner: String,
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Show one transaction
    Show { id: String },
}

#[derive(Subcommand)]
enum HoldingCommands {
    Add {
        owner: String,
        symbol: String,
        amount: Decimal,
        /// Price paid per unit
        cost_basis: Decimal,
    },
    Remove {
        owner: String,
        symbol: String,
    },
    /// Set a holding's amount; zero removes it
    Adjust {
        owner: String,
        symbol: String,
        amount: Decimal,
    },
}

#[derive(Subcommand)]
enum CashCommands {
    Deposit {
        owner: String,
        symbol: String,
        amount: Decimal,
    },
    Withdraw {
        owner: String,
        symbol: String,
        amount: Decimal,
    },
}

#[derive(Args)]
struct MoveArgs {
    /// Owner the value leaves
    owner: String,
    /// Receiving party
    counterparty: String,
    amount: Decimal,
    /// Asset debited from the owner
    asset: String,
    /// Asset credited to the counterparty (defaults to the debited asset)
    #[arg(long)]
    to_asset: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
}

impl MoveArgs {
    fn into_request(self, kind: fn(String) -> TransactionKind) -> TransactionRequest {
        TransactionRequest {
            owner_id: self.owner,
            kind: kind(self.counterparty),
            to_asset: self.to_asset.unwrap_or_else(|| self.asset.clone()),
            from_asset: self.asset,
            amount: self.amount,
            description: self.description,
        }
    }
}

impl From<Commands> for xbridge::AppCommand {
    fn from(cmd: Commands) -> xbridge::AppCommand {
        use xbridge::AppCommand;
        match cmd {
            Commands::Setup => AppCommand::Setup,
            Commands::Summary { owners } => AppCommand::Summary { owners },
            Commands::Rate { from, to } => AppCommand::Rate { from, to },
            Commands::Convert { amount, from, to } => AppCommand::Convert { amount, from, to },
            Commands::Prices { symbols } => AppCommand::Prices { symbols },
            Commands::Holding(holding) => match holding {
                HoldingCommands::Add {
                    owner,
                    symbol,
                    amount,
                    cost_basis,
                } => AppCommand::Position {
                    owner,
                    change: PositionChange::AddHolding {
                        symbol,
                        amount,
                        cost_basis,
                    },
                },
                HoldingCommands::Remove { owner, symbol } => AppCommand::Position {
                    owner,
                    change: PositionChange::RemoveHolding { symbol },
                },
                HoldingCommands::Adjust {
                    owner,
                    symbol,
                    amount,
                } => AppCommand::Position {
                    owner,
                    change: PositionChange::AdjustHolding { symbol, amount },
                },
            },
            Commands::Cash(cash) => match cash {
                CashCommands::Deposit {
                    owner,
                    symbol,
                    amount,
                } => AppCommand::Position {
                    owner,
                    change: PositionChange::Deposit { symbol, amount },
                },
                CashCommands::Withdraw {
                    owner,
                    symbol,
                    amount,
                } => AppCommand::Position {
                    owner,
                    change: PositionChange::Withdraw { symbol, amount },
                },
            },
            Commands::Transfer(args) => AppCommand::Submit(
                args.into_request(|recipient| TransactionKind::Transfer { recipient }),
            ),
            Commands::Pay(args) => {
                AppCommand::Submit(args.into_request(|payee| TransactionKind::Payment { payee }))
            }
            Commands::Remit(args) => AppCommand::Submit(
                args.into_request(|beneficiary| TransactionKind::Remittance { beneficiary }),
            ),
            Commands::Approve { id } => AppCommand::Event {
                id,
                event: TransactionEvent::Approve,
            },
            Commands::Cancel { id } => AppCommand::Event {
                id,
                event: TransactionEvent::Cancel,
            },
            Commands::Confirm { id, failed } => AppCommand::Event {
                id,
                event: TransactionEvent::Confirm { delivered: !failed },
            },
            Commands::Resume { id } => AppCommand::Event {
                id,
                event: TransactionEvent::Resume,
            },
            Commands::Transactions { owner, limit } => AppCommand::Transactions { owner, limit },
            Commands::Show { id } => AppCommand::Show { id },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(cmd) => xbridge::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
