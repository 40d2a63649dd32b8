//! Configuration loading from a gateway home directory

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::TestHome;
use sqlgate::config::{ConfigLoader, FailureStatus, GatewayConfig, HttpMethod, ResponseKind};
use sqlgate::{GatewayError, IpRule};

fn sample_service() -> serde_json::Value {
    json!({
        "settings": {
            "method": "get",
            "token": "abc",
            "iplist": ["127.0.0.1", "10.0.0.0/8"],
            "query": "report.sql",
            "response": "table",
            "extsyntax": true
        },
        "arguments": {
            "since": {"type": "text", "pattern": "\\d{4}-\\d{2}-\\d{2}"},
            "limit": {"type": "number", "default": 50}
        }
    })
}

#[tokio::test]
async fn test_load_service_from_disk() {
    let home = TestHome::new();
    home.service("report", &sample_service(), "SELECT * FROM r(:__SINCE__, :__LIMIT__)");
    let loader = ConfigLoader::new(&home.config());

    assert!(loader.service_exists("report").await);
    assert!(!loader.service_exists("absent").await);

    let service = loader.load_service("report").await.unwrap();
    assert_eq!(service.name, "report");
    assert_eq!(service.settings().method, Some(HttpMethod::Get));
    assert_eq!(service.settings().response, ResponseKind::Table);
    assert_eq!(
        service.settings().iplist.as_deref(),
        Some(&["127.0.0.1".parse::<IpRule>().unwrap(), "10.0.0.0/8".parse().unwrap()][..])
    );
    assert_eq!(service.arguments().names().collect::<Vec<_>>(), vec!["since", "limit"]);
    assert_eq!(service.template, "SELECT * FROM r(:__SINCE__, :__LIMIT__)");
}

#[tokio::test]
async fn test_missing_service_resource() {
    let home = TestHome::new();
    let loader = ConfigLoader::new(&home.config());
    assert!(matches!(
        loader.load_service("absent").await,
        Err(GatewayError::ConfigMissing(_))
    ));
}

#[tokio::test]
async fn test_invalid_iplist_entry_rejected() {
    let home = TestHome::new();
    let mut config = sample_service();
    config["settings"]["iplist"] = json!(["10.0.0.0/40"]);
    home.service("report", &config, "SELECT 1");

    let loader = ConfigLoader::new(&home.config());
    assert!(matches!(
        loader.load_service("report").await,
        Err(GatewayError::ConfigMalformed(_))
    ));
}

#[tokio::test]
async fn test_optional_shared_resources() {
    let home = TestHome::new();
    let loader = ConfigLoader::new(&home.config());
    assert_eq!(loader.audit_sql().await.unwrap(), None);
    assert_eq!(loader.connection_string().unwrap(), None);

    home.audit("INSERT INTO audit VALUES ($1, $2, $3)");
    std::fs::write(
        home.path().join("config").join("db.connection.config"),
        "host=localhost user=gateway dbname=app\n",
    )
    .unwrap();

    assert_eq!(
        loader.audit_sql().await.unwrap().as_deref(),
        Some("INSERT INTO audit VALUES ($1, $2, $3)")
    );
    assert_eq!(
        loader.connection_string().unwrap().as_deref(),
        Some("host=localhost user=gateway dbname=app")
    );
}

#[test]
fn test_gateway_settings_file() {
    let home = TestHome::new();
    assert_eq!(home.config().port, 880);

    std::fs::write(
        home.path().join("config").join("gateway.json"),
        r#"{"port": 8088, "failure_status": "differentiated", "services_dir": "svc"}"#,
    )
    .unwrap();

    let config = GatewayConfig::load(home.path()).unwrap();
    assert_eq!(config.port, 8088);
    assert_eq!(config.failure_status, FailureStatus::Differentiated);
    assert_eq!(config.services_path(), home.path().join("svc"));
    assert_eq!(config.error_log_path(), home.path().join("log/errors.log"));
}

#[test]
fn test_config_dir_moves_shared_resources_not_settings() {
    let home = TestHome::new();
    std::fs::write(
        GatewayConfig::settings_path(home.path()),
        r#"{"config_dir": "shared", "port": 9000}"#,
    )
    .unwrap();
    std::fs::create_dir_all(home.path().join("shared")).unwrap();
    std::fs::write(home.path().join("shared").join("db.connection.config"), "dbname=moved\n")
        .unwrap();

    let config = GatewayConfig::load(home.path()).unwrap();
    assert_eq!(config.port, 9000);
    assert_eq!(config.config_path(), home.path().join("shared"));
    assert_eq!(
        GatewayConfig::settings_path(home.path()),
        home.path().join("config").join("gateway.json")
    );

    let loader = ConfigLoader::new(&config);
    assert_eq!(loader.connection_string().unwrap().as_deref(), Some("dbname=moved"));
}

#[test]
fn test_invalid_gateway_settings_file() {
    let home = TestHome::new();
    std::fs::write(home.path().join("config").join("gateway.json"), r#"{"port": "eighty"}"#)
        .unwrap();
    assert!(matches!(GatewayConfig::load(home.path()), Err(GatewayError::ConfigMalformed(_))));
}

#[tokio::test]
async fn test_preload_rejects_invalid_service() {
    let home = TestHome::new();
    home.service("report", &sample_service(), "SELECT * FROM r(:__SINCE__, :__LIMIT__)");
    home.service(
        "typo",
        &json!({
            "settings": {"token": "abc", "query": "typo.sql", "response": "row", "extsyntax": true},
            "arguments": {"id": {"type": "number"}}
        }),
        "SELECT :__IDD__",
    );

    let err = ConfigLoader::new(&home.config()).preload().await.unwrap_err();
    assert_eq!(err, GatewayError::TemplateUnresolvedMacro(vec![":__IDD__".to_string()]));
}

#[tokio::test]
async fn test_preload_catalog() {
    let home = TestHome::new();
    home.service("report", &sample_service(), "SELECT * FROM r(:__SINCE__, :__LIMIT__)");
    home.audit("SELECT 1");

    let loader = ConfigLoader::new(&home.config()).preload().await.unwrap();
    assert!(loader.service_exists("report").await);
    assert!(!loader.service_exists("get_item").await);
    assert_eq!(loader.audit_sql().await.unwrap().as_deref(), Some("SELECT 1"));

    // The catalog is fixed at preload time
    std::fs::remove_file(home.path().join("config").join("logger.sql.config")).unwrap();
    assert_eq!(loader.audit_sql().await.unwrap().as_deref(), Some("SELECT 1"));
}
