//! In-memory cash vault and the cash flows backed by it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fl_protocol::ops::{Amount, CashBalanceArgs, CashFlowResult, CashIssueArgs, CashPaymentArgs};
use fl_protocol::{ErrorKind, WireError};
use parking_lot::Mutex;
use serde_json::Value;

use crate::flows::{FlowContext, FlowLogic};
use crate::handlers::{parse_args, to_result, CallContext, HandlerResult, OperationHandler};

/// Balances per currency.
#[derive(Default)]
pub struct Vault {
    balances: Mutex<HashMap<String, i64>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, currency: &str) -> Amount {
        let quantity = self.balances.lock().get(currency).copied().unwrap_or(0);
        Amount::new(quantity, currency)
    }

    pub fn issue(&self, amount: &Amount) -> Result<(), WireError> {
        if amount.quantity <= 0 {
            return Err(WireError::new(
                ErrorKind::Failed,
                format!("cannot issue a non-positive amount: {amount}"),
            ));
        }
        let mut balances = self.balances.lock();
        let entry = balances.entry(amount.currency.clone()).or_insert(0);
        *entry = entry
            .checked_add(amount.quantity)
            .ok_or_else(|| WireError::new(ErrorKind::Failed, "balance overflow"))?;
        Ok(())
    }

    pub fn pay(&self, amount: &Amount) -> Result<(), WireError> {
        if amount.quantity <= 0 {
            return Err(WireError::new(
                ErrorKind::Failed,
                format!("cannot pay a non-positive amount: {amount}"),
            ));
        }
        let mut balances = self.balances.lock();
        let available = balances.get(&amount.currency).copied().unwrap_or(0);
        if available < amount.quantity {
            return Err(WireError::new(
                ErrorKind::Failed,
                format!("insufficient funds: have {available} {}, need {amount}", amount.currency),
            ));
        }
        balances.insert(amount.currency.clone(), available - amount.quantity);
        Ok(())
    }
}

fn transaction_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ── Flows ────────────────────────────────────────────────────────────

pub struct CashIssueFlow {
    pub vault: Arc<Vault>,
    /// Latency before the issuance lands.
    pub delay: Duration,
}

#[async_trait::async_trait]
impl FlowLogic for CashIssueFlow {
    async fn run(&self, ctx: FlowContext, args: Value) -> Result<Value, WireError> {
        let args: CashIssueArgs = parse_args(args)?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.vault.issue(&args.amount)?;
        tracing::info!(
            flow_id = %ctx.flow_id,
            initiator = %ctx.initiator,
            amount = %args.amount,
            issuer_ref = %args.issuer_ref,
            "cash issued"
        );
        to_result(&CashFlowResult {
            amount: args.amount,
            transaction_id: transaction_id(),
            recipient: None,
        })
    }
}

pub struct CashPaymentFlow {
    pub vault: Arc<Vault>,
}

#[async_trait::async_trait]
impl FlowLogic for CashPaymentFlow {
    async fn run(&self, ctx: FlowContext, args: Value) -> Result<Value, WireError> {
        let args: CashPaymentArgs = parse_args(args)?;
        self.vault.pay(&args.amount)?;
        tracing::info!(
            flow_id = %ctx.flow_id,
            initiator = %ctx.initiator,
            amount = %args.amount,
            recipient = %args.recipient,
            "cash paid"
        );
        to_result(&CashFlowResult {
            amount: args.amount,
            transaction_id: transaction_id(),
            recipient: Some(args.recipient),
        })
    }
}

// ── Queries ──────────────────────────────────────────────────────────

pub struct CashBalanceHandler {
    pub vault: Arc<Vault>,
}

#[async_trait::async_trait]
impl OperationHandler for CashBalanceHandler {
    async fn call(&self, _ctx: CallContext, args: Value) -> HandlerResult {
        let args: CashBalanceArgs = parse_args(args)?;
        to_result(&self.vault.balance(&args.currency))
    }
}
