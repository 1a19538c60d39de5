//! In-memory bank behind the `Transport` seam
//!
//! Routes: `POST /reset`, `POST /transfer`, `POST /deposit`, `GET /balance`.
//! Bug flags are set at construction or through `/reset`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use invcheck_runner::{HttpRequest, HttpResponse, Transport, TransportError};
use serde_json::{Value, json};

pub const BASE_URL: &str = "http://bank.test";

#[derive(Debug, Clone, Copy, Default)]
pub struct BugFlags {
    /// Transfers may overdraw the source account
    pub allow_negative: bool,
    /// Idempotency keys are ignored, so replays apply again
    pub duplicate_on_retry: bool,
    /// Non-numeric amounts crash the handler
    pub crash_on_bad_amount: bool,
    /// Rejected transfers still debit the source account
    pub debit_before_validation: bool,
}

#[derive(Debug)]
struct State {
    accounts: BTreeMap<String, f64>,
    processed: BTreeMap<String, Value>,
    tx_counter: u64,
    flags: BugFlags,
    balance_down: bool,
    log: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Bank {
    state: Arc<Mutex<State>>,
}

impl Bank {
    pub fn new(flags: BugFlags) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                accounts: default_accounts(),
                processed: BTreeMap::new(),
                tx_counter: 0,
                flags,
                balance_down: false,
                log: Vec::new(),
            })),
        }
    }

    pub fn healthy() -> Self {
        Self::new(BugFlags::default())
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn balance(&self, account: &str) -> f64 {
        self.state.lock().unwrap().accounts[account]
    }

    /// Make `/balance` answer 503.
    pub fn set_balance_down(&self, down: bool) {
        self.state.lock().unwrap().balance_down = down;
    }

    /// `METHOD /path` of every request received, in order.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }
}

fn default_accounts() -> BTreeMap<String, f64> {
    BTreeMap::from([("A".to_string(), 100.0), ("B".to_string(), 100.0)])
}

impl Transport for Bank {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let Some(target) = request.url.strip_prefix(BASE_URL) else {
            return Err(TransportError::Connect(format!("no route to {}", request.url)));
        };
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let body = request.body.clone().unwrap_or(Value::Null);
        let key = request.headers.get("Idempotency-Key").cloned();

        let mut state = self.state.lock().unwrap();
        state.log.push(format!("{} {path}", request.method));
        let (status, payload) = match (request.method.as_str(), path) {
            ("GET", "/health") => (200, json!({"status": "ok"})),
            ("GET", "/balance") => state.balance(query),
            ("POST", "/reset") => state.reset(&body),
            ("POST", "/deposit") => state.deposit(&body),
            ("POST", "/transfer") => state.transfer(&body, key),
            _ => (404, json!({"error": "not found"})),
        };
        Ok(HttpResponse {
            status,
            body: payload.to_string(),
        })
    }
}

impl State {
    fn balance(&self, query: &str) -> (u16, Value) {
        if self.balance_down {
            return (503, json!({"error": "unavailable"}));
        }
        match query.strip_prefix("account=") {
            Some(account) => match self.accounts.get(account) {
                Some(b) => (200, json!({"accounts": {account: b}})),
                None => (404, json!({"error": format!("Account {account} not found")})),
            },
            None => (200, json!({"accounts": self.accounts})),
        }
    }

    fn reset(&mut self, body: &Value) -> (u16, Value) {
        self.accounts = match body.get("accounts") {
            Some(Value::Object(map)) => {
                let mut accounts = BTreeMap::new();
                for (name, balance) in map {
                    let Some(b) = balance.as_f64() else {
                        return (400, json!({"error": "Account balances must be numeric"}));
                    };
                    accounts.insert(name.clone(), b);
                }
                accounts
            }
            Some(_) => return (400, json!({"error": "`accounts` must be a mapping"})),
            None => default_accounts(),
        };
        if let Some(flags) = body.get("bug_flags") {
            if let Some(v) = flags.get("allow_negative_balance").and_then(Value::as_bool) {
                self.flags.allow_negative = v;
            }
            if let Some(v) = flags.get("duplicate_on_retry").and_then(Value::as_bool) {
                self.flags.duplicate_on_retry = v;
            }
        }
        self.processed.clear();
        self.tx_counter = 0;
        (200, json!({"status": "reset", "accounts": self.accounts}))
    }

    fn deposit(&mut self, body: &Value) -> (u16, Value) {
        let Some(account) = body.get("account").and_then(Value::as_str) else {
            return (400, json!({"error": "`account` must be a string"}));
        };
        let Some(amount) = body.get("amount").and_then(Value::as_f64) else {
            return (400, json!({"error": "`amount` must be numeric"}));
        };
        if amount <= 0.0 {
            return (400, json!({"error": "`amount` must be > 0"}));
        }
        let balance = self.accounts.entry(account.to_string()).or_insert(0.0);
        *balance += amount;
        let balance = *balance;
        self.tx_counter += 1;
        (
            200,
            json!({"transaction_id": self.tx_counter, "account": account, "amount": amount, "balance": balance}),
        )
    }

    fn transfer(&mut self, body: &Value, key: Option<String>) -> (u16, Value) {
        if self.flags.debit_before_validation {
            if let Some(from) = body.get("from").and_then(Value::as_str) {
                if let Some(b) = self.accounts.get_mut(from) {
                    *b -= 1.0;
                }
            }
        }
        let Some(from) = body.get("from").and_then(Value::as_str) else {
            return (400, json!({"error": "`from` must be a string"}));
        };
        let Some(to) = body.get("to").and_then(Value::as_str) else {
            return (400, json!({"error": "`to` must be a string"}));
        };
        if from == to {
            return (400, json!({"error": "`from` and `to` must be different accounts"}));
        }
        let amount = match body.get("amount") {
            Some(v) if v.is_number() => v.as_f64().unwrap_or_default(),
            _ if self.flags.crash_on_bad_amount => {
                return (500, json!({"error": "internal error"}));
            }
            _ => return (400, json!({"error": "`amount` must be numeric"})),
        };
        if amount <= 0.0 {
            return (400, json!({"error": "`amount` must be > 0"}));
        }
        if !self.accounts.contains_key(from) || !self.accounts.contains_key(to) {
            return (404, json!({"error": "Account not found"}));
        }

        let honour_key = !self.flags.duplicate_on_retry;
        if honour_key {
            if let Some(cached) = key.as_ref().and_then(|k| self.processed.get(k)) {
                let mut replay = cached.clone();
                replay["idempotent_replay"] = json!(true);
                return (200, replay);
            }
        }
        if !self.flags.allow_negative && self.accounts[from] < amount {
            return (400, json!({"error": "Insufficient funds"}));
        }

        *self.accounts.entry(from.to_string()).or_default() -= amount;
        *self.accounts.entry(to.to_string()).or_default() += amount;
        self.tx_counter += 1;
        let response = json!({
            "transaction_id": self.tx_counter,
            "from": from,
            "to": to,
            "amount": amount,
            "balances": {from: self.accounts[from], to: self.accounts[to]},
        });
        if honour_key {
            if let Some(k) = key {
                self.processed.insert(k, response.clone());
            }
        }
        (200, response)
    }
}
