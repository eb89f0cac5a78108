//! Integration test: boots the reference node in-process on an ephemeral
//! port and drives it through the public client API.
//!
//! Covers login, permission enforcement, unknown operations, the cash
//! flows end to end, shared flow results, reattaching by flow id, and
//! session close semantics.

use std::time::Duration;

use fl_client::{Amount, Client, ClientError, ConnectionState, Credential, FlowPoll, RetryPolicy};
use fl_domain::config::{NodeConfig, UserConfig};
use fl_node::{NodeServer, RunningNode};
use serde_json::{json, Value};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn user(username: &str, password: &str, permissions: &[&str]) -> UserConfig {
    UserConfig {
        username: username.into(),
        password: password.into(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

async fn start_node(cash_issue_delay_ms: u64) -> RunningNode {
    let mut config = NodeConfig::default();
    config.server.port = 0;
    config.flows.cash_issue_delay_ms = cash_issue_delay_ms;
    config.users = vec![
        // The scenario grant plus `cashBalance`, which the node guards like
        // any other operation; `cashier` below holds the bare pair.
        user(
            "user1",
            "test",
            &[
                "StartProcess:CashIssue",
                "InvokeOperation:nodeInfo",
                "InvokeOperation:cashBalance",
            ],
        ),
        user("cashier", "issue", &["StartProcess:CashIssue", "InvokeOperation:nodeInfo"]),
        user("observer", "watch", &["InvokeOperation:nodeInfo"]),
        user("admin", "root", &["ALL"]),
    ];
    NodeServer::start(config).await.unwrap()
}

async fn login(node: &RunningNode, username: &str, password: &str) -> Client {
    Client::login(&node.ws_url(), &Credential::new(username, password))
        .await
        .unwrap_or_else(|e| panic!("login as {username} failed: {e}"))
}

// ── Login ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_and_query_node_info() {
    let node = start_node(0).await;
    let client = login(&node, "user1", "test").await;

    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert!(!client.session().session_id().is_empty());
    assert!(!client.node_version().is_empty());

    let info = client.node_info().await.unwrap();
    assert_eq!(info.legal_name, "O=Alice Corp, L=Madrid, C=ES");
    assert_eq!(info.platform_version, 1);
}

#[tokio::test]
async fn wrong_password_is_an_authentication_error() {
    let node = start_node(0).await;
    match Client::login(&node.ws_url(), &Credential::new("user1", "wrong")).await {
        Err(ClientError::Authentication(_)) => {}
        Err(other) => panic!("expected authentication error, got {other}"),
        Ok(_) => panic!("login with a wrong password succeeded"),
    }

    match Client::login(&node.ws_url(), &Credential::new("nobody", "test")).await {
        Err(ClientError::Authentication(_)) => {}
        Err(other) => panic!("expected authentication error, got {other}"),
        Ok(_) => panic!("login as an unknown user succeeded"),
    }
}

#[tokio::test]
async fn rejected_login_is_not_retried() {
    let node = start_node(0).await;
    let result = Client::builder(node.ws_url())
        .login_with_retry(&Credential::new("user1", "wrong"), &RetryPolicy::default())
        .await;
    assert!(matches!(result, Err(ClientError::Authentication(_))));
}

// ── Permissions and errors ──────────────────────────────────────────────

#[tokio::test]
async fn missing_permission_leaves_session_usable() {
    let node = start_node(0).await;
    let client = login(&node, "user1", "test").await;

    let err = client.current_node_time().await.unwrap_err();
    assert!(matches!(err, ClientError::Permission(_)), "got {err}");

    let err = client
        .start_cash_payment(Amount::dollars(1), "O=Bob, L=Paris, C=FR")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Permission(_)), "got {err}");

    assert_eq!(client.state(), ConnectionState::Authenticated);
    client.node_info().await.unwrap();
}

#[tokio::test]
async fn unknown_operation_is_an_operation_error() {
    let node = start_node(0).await;
    let client = login(&node, "admin", "root").await;

    let err = client.invoke("vaultQueryBy", Value::Null).await.unwrap_err();
    match err {
        ClientError::Operation(msg) => assert!(msg.contains("vaultQueryBy")),
        other => panic!("expected operation error, got {other}"),
    }

    let err = client.start_flow_dynamic("CashExit", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Operation(_)), "got {err}");

    client.node_info().await.unwrap();
}

#[tokio::test]
async fn malformed_arguments_are_rejected_before_sending() {
    let node = start_node(0).await;
    let client = login(&node, "admin", "root").await;

    let err = client.invoke("nodeInfo", json!({ "verbose": true })).await.unwrap_err();
    assert!(matches!(err, ClientError::Operation(ref m) if m.contains("invalid arguments")));

    let err = client
        .start_flow_dynamic("CashIssue", json!({ "amount": 5 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Operation(ref m) if m.contains("CashIssue")));

    // Nothing was issued.
    assert_eq!(client.cash_balance("USD").await.unwrap().quantity, 0);
}

// ── Flows ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn cash_issue_completes_and_updates_balance() {
    let node = start_node(0).await;
    let client = login(&node, "user1", "test").await;

    let handle = client.start_cash_issue(Amount::dollars(123), "1").await.unwrap();
    let result = handle.await_result(WAIT).await.unwrap();
    assert_eq!(result.amount, Amount::dollars(123));
    assert!(!result.transaction_id.is_empty());

    match handle.poll_result().unwrap() {
        FlowPoll::Completed(r) => assert_eq!(r, result),
        other => panic!("expected completed poll, got {other:?}"),
    }

    let balance = client.cash_balance("USD").await.unwrap();
    assert_eq!(balance, Amount::dollars(123));
}

#[tokio::test]
async fn issue_and_node_info_alone_do_not_grant_balance_queries() {
    let node = start_node(0).await;
    let client = login(&node, "cashier", "issue").await;

    let handle = client.start_cash_issue(Amount::dollars(123), "1").await.unwrap();
    let result = handle.await_result(WAIT).await.unwrap();
    assert_eq!(result.amount, Amount::dollars(123));
    client.node_info().await.unwrap();

    let err = client.cash_balance("USD").await.unwrap_err();
    assert!(matches!(err, ClientError::Permission(_)), "got {err}");
}

#[tokio::test]
async fn concurrent_waiters_observe_the_same_result() {
    let node = start_node(200).await;
    let client = login(&node, "user1", "test").await;

    let handle = client.start_cash_issue(Amount::dollars(5), "shared").await.unwrap();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let h = handle.clone();
            tokio::spawn(async move { h.await_result(WAIT).await })
        })
        .collect();

    let direct = handle.await_result(WAIT).await.unwrap();
    for waiter in waiters {
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.transaction_id, direct.transaction_id);
    }
}

#[tokio::test]
async fn failed_flow_surfaces_flow_failed() {
    let node = start_node(0).await;
    let client = login(&node, "admin", "root").await;

    let handle = client
        .start_cash_payment(Amount::dollars(50), "O=Bob, L=Paris, C=FR")
        .await
        .unwrap();
    match handle.await_result(WAIT).await {
        Err(ClientError::FlowFailed { flow_id, error }) => {
            assert_eq!(flow_id, handle.id());
            assert!(error.message.contains("insufficient funds"));
        }
        other => panic!("expected flow failure, got {other:?}"),
    }
}

#[tokio::test]
async fn flow_can_be_tracked_from_another_session() {
    let node = start_node(300).await;

    let first = login(&node, "user1", "test").await;
    let handle = first.start_cash_issue(Amount::dollars(7), "reattach").await.unwrap();
    let flow_id = handle.id();
    first.close();

    let second = login(&node, "user1", "test").await;
    let reattached = second.flow_handle(flow_id).await.unwrap();
    let value = reattached.await_result(WAIT).await.unwrap();
    assert_eq!(value["amount"]["quantity"], 7);

    // A finished flow can still be tracked.
    let again = second.flow_handle(flow_id).await.unwrap();
    assert_eq!(again.await_result(WAIT).await.unwrap(), value);
}

#[tokio::test]
async fn tracking_requires_flow_permission() {
    let node = start_node(0).await;
    let owner = login(&node, "user1", "test").await;
    let handle = owner.start_cash_issue(Amount::dollars(1), "x").await.unwrap();
    handle.await_result(WAIT).await.unwrap();

    let observer = login(&node, "observer", "watch").await;
    let err = observer.flow_handle(handle.id()).await.unwrap_err();
    assert!(matches!(err, ClientError::Permission(_)), "got {err}");

    let err = owner.flow_handle(fl_client::FlowId::random()).await.unwrap_err();
    assert!(matches!(err, ClientError::Operation(_)), "got {err}");
}

#[tokio::test]
async fn catalogue_queries() {
    let node = start_node(0).await;
    let client = login(&node, "admin", "root").await;

    assert_eq!(client.registered_flows().await.unwrap(), ["CashIssue", "CashPayment"]);

    let before = chrono::Utc::now() - chrono::Duration::seconds(60);
    assert!(client.current_node_time().await.unwrap() > before);

    let handle = client.start_cash_issue(Amount::dollars(2), "snap").await.unwrap();
    handle.await_result(WAIT).await.unwrap();
    let snapshot = client.state_machines_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].flow_id, handle.id());
    assert_eq!(snapshot[0].flow_type, "CashIssue");
    assert_eq!(snapshot[0].status, "completed");
}

// ── Close semantics ─────────────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let node = start_node(0).await;
    let client = login(&node, "user1", "test").await;

    client.close();
    client.close();
    assert_eq!(client.state(), ConnectionState::Closed);

    let err = client.node_info().await.unwrap_err();
    assert!(err.is_connection(), "got {err}");
}

#[tokio::test]
async fn close_wakes_flow_waiters() {
    let node = start_node(5_000).await;
    let client = login(&node, "user1", "test").await;

    let handle = client.start_cash_issue(Amount::dollars(1), "slow").await.unwrap();
    let waiter = tokio::spawn(async move { handle.await_result(None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close();
    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap();
    assert!(matches!(result, Err(ClientError::Connection(_))));
}

#[tokio::test]
async fn await_timeout_does_not_cancel_the_flow() {
    let node = start_node(500).await;
    let client = login(&node, "user1", "test").await;

    let handle = client.start_cash_issue(Amount::dollars(9), "late").await.unwrap();
    let err = handle
        .await_result(Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));

    let result = handle.await_result(WAIT).await.unwrap();
    assert_eq!(result.amount.quantity, 9);
}

#[tokio::test]
async fn oversized_flow_update_fails_the_waiter() {
    let node = start_node(0).await;
    let client = Client::builder(node.ws_url())
        .max_message_bytes(160)
        .login(&Credential::new("user1", "test"))
        .await
        .unwrap();

    let outcome = match client.start_cash_issue(Amount::dollars(123), "1").await {
        Ok(handle) => handle.await_result(WAIT).await.map(|_| ()),
        Err(e) => Err(e),
    };
    assert!(matches!(outcome, Err(ClientError::Connection(_))), "got {outcome:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn node_shutdown_disconnects_the_session() {
    let node = start_node(0).await;
    let client = login(&node, "user1", "test").await;
    client.node_info().await.unwrap();

    node.shutdown().await;

    let mut state = client.state();
    for _ in 0..100 {
        if state == ConnectionState::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        state = client.state();
    }
    assert_eq!(state, ConnectionState::Disconnected);

    let err = client.node_info().await.unwrap_err();
    assert!(err.is_connection(), "got {err}");
}
