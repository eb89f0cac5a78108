use std::time::Duration;

use fl_domain::config::Config;

#[test]
fn default_node_binds_localhost() {
    let config = Config::default();
    assert_eq!(config.node.server.host, "127.0.0.1");
    assert_eq!(config.node.server.path, "/v1/rpc/ws");
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[node.server]
host = "0.0.0.0"
port = 3210
"#;
    let config = Config::parse(toml_str).unwrap();
    assert_eq!(config.node.server.host, "0.0.0.0");
    assert_eq!(config.node.server.port, 3210);
}

#[test]
fn client_timings_convert_to_durations() {
    let config = Config::default();
    assert_eq!(config.client.heartbeat_interval(), Duration::from_secs(10));
    assert_eq!(config.client.heartbeat_timeout(), Duration::from_secs(30));
    assert_eq!(config.client.request_timeout(), Some(Duration::from_secs(60)));
}

#[test]
fn zero_request_timeout_disables_it() {
    let toml_str = r#"
[client]
request_timeout_secs = 0
"#;
    let config = Config::parse(toml_str).unwrap();
    assert_eq!(config.client.request_timeout(), None);
}

#[test]
fn retry_defaults_fill_missing_keys() {
    let toml_str = r#"
[client.retry]
max_attempts = 0
"#;
    let config = Config::parse(toml_str).unwrap();
    assert_eq!(config.client.retry.max_attempts, 0);
    assert_eq!(config.client.retry.initial_delay_ms, 500);
    assert_eq!(config.client.retry.max_delay_ms, 30_000);
}

#[test]
fn all_permission_is_case_insensitive() {
    let toml_str = r#"
[[node.users]]
username = "admin"
password = "root"
permissions = ["all"]
"#;
    let config = Config::parse(toml_str).unwrap();
    let perms = config.node.users[0].permission_set().unwrap();
    assert!(perms.allows_operation("nodeInfo"));
    assert!(perms.allows_flow("CashIssue"));
}
