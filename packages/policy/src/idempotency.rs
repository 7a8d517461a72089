//! Process-local idempotency ledger.
//!
//! Prevents a destructive action from executing twice within a run. The
//! ledger is deliberately not durable: keys are task-scoped and a restart
//! starts a fresh run.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// Result of an idempotency check.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyCheck {
    pub already_executed: bool,
    pub previous_result: Option<Value>,
}

#[derive(Default)]
pub struct IdempotencyLedger {
    entries: Mutex<HashMap<String, Value>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str) -> IdempotencyCheck {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(result) => IdempotencyCheck {
                already_executed: true,
                previous_result: Some(result.clone()),
            },
            None => IdempotencyCheck {
                already_executed: false,
                previous_result: None,
            },
        }
    }

    pub fn record(&self, key: impl Into<String>, result: Value) {
        self.entries.lock().insert(key.into(), result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_then_check_returns_previous_result() {
        let ledger = IdempotencyLedger::new();
        assert!(!ledger.check("task-1:send_email").already_executed);

        ledger.record("task-1:send_email", json!({"message_id": "m-42"}));
        let check = ledger.check("task-1:send_email");
        assert!(check.already_executed);
        assert_eq!(check.previous_result, Some(json!({"message_id": "m-42"})));
    }
}
