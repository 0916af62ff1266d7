use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fs;
use tempfile::TempDir;
use tracing::info;
use xbridge::AppCommand;
use xbridge::app::App;
use xbridge::cli::transactions::TransactionEvent;
use xbridge::core::config::AppConfig;
use xbridge::core::transaction::{TransactionKind, TransactionRequest, TransactionState};

mod test_utils {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub const PRICES: &str = r#"
    {
        "bitcoin": {"usd": 40000, "usd_24h_change": 1.5, "last_updated_at": 1760000000},
        "ethereum": {"usd": 2500, "usd_24h_change": -0.75, "last_updated_at": 1760000000}
    }"#;

    pub async fn create_coingecko_mock(mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("vs_currencies", "usd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }

    pub async fn create_failing_mock() -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        mock_server
    }
}

/// Writes a config pointing at the mock feed and a temp data directory.
fn write_config(dir: &TempDir, base_url: &str) -> String {
    let config_path = dir.path().join("config.yaml");
    let config_content = format!(
        r#"
        currency: "USD"
        fiat: [USD, EUR]
        providers:
          coingecko:
            base_url: {}
        default_cash:
          USD: 500
        accounts:
          - owner: "alice"
            cash:
              USD: 20000
            holdings:
              - symbol: "BTC"
                amount: 0.5
                cost_basis: 35000
          - owner: "bob"
            cash:
              USD: 100
        data_path: {}
    "#,
        base_url,
        dir.path().join("data").display()
    );
    fs::write(&config_path, config_content).expect("Failed to write config file");
    config_path.to_string_lossy().into_owned()
}

async fn open_app(config_path: &str) -> App {
    let config = AppConfig::load_from_path(config_path).expect("config should load");
    App::new(config).await.expect("app should build")
}

fn transfer(owner: &str, recipient: &str, amount: Decimal, asset: &str) -> TransactionRequest {
    TransactionRequest {
        owner_id: owner.to_string(),
        kind: TransactionKind::Transfer {
            recipient: recipient.to_string(),
        },
        from_asset: asset.to_string(),
        to_asset: asset.to_string(),
        amount,
        description: None,
    }
}

#[test_log::test(tokio::test)]
async fn test_summary_and_rates_with_mock() {
    let mock_server = test_utils::create_coingecko_mock(test_utils::PRICES).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());

    for command in [
        AppCommand::Summary { owners: vec![] },
        AppCommand::Rate {
            from: "btc".to_string(),
            to: "eth".to_string(),
        },
        AppCommand::Convert {
            amount: dec!(2),
            from: "ETH".to_string(),
            to: "USD".to_string(),
        },
        AppCommand::Prices {
            symbols: vec!["BTC".to_string(), "ETH".to_string()],
        },
    ] {
        let result = xbridge::run_command(command, Some(&config_path)).await;
        assert!(
            result.is_ok(),
            "Command failed with: {:?}",
            result.err()
        );
    }
}

#[test_log::test(tokio::test)]
async fn test_rendered_rate_and_conversion() {
    let mock_server = test_utils::create_coingecko_mock(test_utils::PRICES).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());
    let app = open_app(&config_path).await;

    let rate = xbridge::execute(
        &app,
        AppCommand::Rate {
            from: "BTC".to_string(),
            to: "ETH".to_string(),
        },
    )
    .await
    .unwrap()
    .unwrap();
    let rate = console::strip_ansi_codes(&rate).to_string();
    info!(%rate, "Rendered rate");
    assert_eq!(rate, "1 BTC = 16 ETH");

    let converted = xbridge::execute(
        &app,
        AppCommand::Convert {
            amount: dec!(2),
            from: "ETH".to_string(),
            to: "USD".to_string(),
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        console::strip_ansi_codes(&converted).to_string(),
        "2 ETH = 5000 USD"
    );
}

#[test_log::test(tokio::test)]
async fn test_transfer_persists_across_runs() {
    let mock_server = test_utils::create_coingecko_mock(test_utils::PRICES).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());

    let result = xbridge::run_command(
        AppCommand::Submit(transfer("alice", "bob", dec!(0.1), "BTC")),
        Some(&config_path),
    )
    .await;
    assert!(result.is_ok(), "Transfer failed with: {:?}", result.err());

    let app = open_app(&config_path).await;
    let alice = app.ledger.portfolio("alice").await.unwrap();
    let bob = app.ledger.portfolio("bob").await.unwrap();
    assert_eq!(alice.holding("BTC").unwrap().amount, dec!(0.4));
    assert_eq!(bob.holding("BTC").unwrap().amount, dec!(0.1));
    assert_eq!(bob.cash("USD"), dec!(100));

    let history = app.processor.list_for_owner("alice", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, TransactionState::Completed);
    assert_eq!(history[0].rate_at_execution, Some(dec!(1)));
}

#[test_log::test(tokio::test)]
async fn test_payment_approval_across_runs() {
    let mock_server = test_utils::create_coingecko_mock(test_utils::PRICES).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());

    let id = {
        let app = open_app(&config_path).await;
        let tx = app
            .processor
            .create(TransactionRequest {
                owner_id: "alice".to_string(),
                kind: TransactionKind::Payment {
                    payee: "carol".to_string(),
                },
                from_asset: "USD".to_string(),
                to_asset: "ETH".to_string(),
                amount: dec!(5000),
                description: Some("two ether".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(tx.state, TransactionState::AwaitingApproval);
        tx.id
    };

    let result = xbridge::run_command(
        AppCommand::Event {
            id: id.clone(),
            event: TransactionEvent::Approve,
        },
        Some(&config_path),
    )
    .await;
    assert!(result.is_ok(), "Approve failed with: {:?}", result.err());

    let app = open_app(&config_path).await;
    let tx = app.processor.get(&id).await.unwrap();
    assert_eq!(tx.state, TransactionState::Completed);
    assert_eq!(tx.settlement.unwrap().settled_amount, dec!(2));

    let alice = app.ledger.portfolio("alice").await.unwrap();
    assert_eq!(alice.cash("USD"), dec!(15000));
    // carol was never configured and starts from the default cash
    let carol = app.ledger.portfolio("carol").await.unwrap();
    assert_eq!(carol.holding("ETH").unwrap().amount, dec!(2));
    assert_eq!(carol.cash("USD"), dec!(500));

    let result = xbridge::run_command(
        AppCommand::Event {
            id,
            event: TransactionEvent::Cancel,
        },
        Some(&config_path),
    )
    .await;
    assert!(result.is_err(), "Cancelling a completed payment should fail");
}

#[test_log::test(tokio::test)]
async fn test_feed_outage_fails_transaction_without_moving_funds() {
    let mock_server = test_utils::create_failing_mock().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());
    let app = open_app(&config_path).await;

    let mut request = transfer("alice", "bob", dec!(0.1), "BTC");
    request.to_asset = "USD".to_string();
    let tx = app.processor.create(request).await.unwrap();
    assert_eq!(tx.state, TransactionState::Failed);
    assert!(tx.failure.is_some());

    let alice = app.ledger.portfolio("alice").await.unwrap();
    assert_eq!(alice.holding("BTC").unwrap().amount, dec!(0.5));
}

#[test_log::test(tokio::test)]
async fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = dir.path().join("config.yaml");
    fs::write(&config_path, "currency: \"JPY\"\nfiat: [USD]\n").unwrap();

    let result = xbridge::run_command(
        AppCommand::Summary { owners: vec![] },
        Some(config_path.to_str().unwrap()),
    )
    .await;
    assert!(result.is_err());
}
