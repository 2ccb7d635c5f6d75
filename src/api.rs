//! Typed client for the fund-disbursement REST API.
//!
//! Login and register are public endpoints; everything else goes through
//! `SessionManager::request`, which gates on token validity and clears the
//! session on expiry or a 401.

use crate::models::{
    ChainEvent, CreateFundRequest, CreateTransactionRequest, DashboardStats, Envelope, Fund,
    LoginRequest, LoginResponse, RegisterRequest, Transaction,
};
use crate::session::{RequestOptions, SessionManager};
use crate::transport::{HttpResponse, HttpTransport};
use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static ETH_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid address pattern"));

/// Check a recipient address before it ever reaches the backend.
pub fn is_eth_address(s: &str) -> bool {
    ETH_ADDRESS.is_match(s)
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    stats: Option<DashboardStats>,
}

#[derive(Deserialize)]
struct FundsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    funds: Vec<Fund>,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    events: Vec<ChainEvent>,
}

pub struct ApiClient {
    base_url: String,
    transport: Box<dyn HttpTransport>,
    pub session: SessionManager,
}

impl ApiClient {
    pub fn new(base_url: &str, transport: Box<dyn HttpTransport>, session: SessionManager) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticate and store the resulting session. Returns the user's
    /// identity attributes as the server sent them.
    pub fn login(&mut self, email: &str, password: &str) -> Result<Value> {
        let body = serde_json::to_value(LoginRequest { email, password })?;
        let resp = self.transport.send(
            "POST",
            &self.url("/login"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            Some(&body),
        )?;

        check_status(&resp)?;
        let parsed: LoginResponse = resp.json()?;
        if !parsed.success {
            bail!(parsed
                .message
                .unwrap_or_else(|| "login failed".to_string()));
        }
        let token = parsed
            .token
            .ok_or_else(|| anyhow!("login response missing token"))?;
        let user = parsed
            .user
            .ok_or_else(|| anyhow!("login response missing user"))?;

        self.session.login(&token, &user);
        Ok(user)
    }

    /// Create an account. Does not log in; the server expects a login after.
    pub fn register(&mut self, username: &str, email: &str, password: &str) -> Result<String> {
        let body = serde_json::to_value(RegisterRequest {
            username,
            email,
            password,
        })?;
        let resp = self.transport.send(
            "POST",
            &self.url("/register"),
            &[("Content-Type".to_string(), "application/json".to_string())],
            Some(&body),
        )?;

        check_status(&resp)?;
        let parsed: Envelope = resp.json()?;
        if !parsed.success {
            bail!(parsed
                .message
                .unwrap_or_else(|| "registration failed".to_string()));
        }
        Ok(parsed
            .message
            .unwrap_or_else(|| "registered".to_string()))
    }

    pub fn dashboard_stats(&mut self) -> Result<DashboardStats> {
        let resp = self.get("/dashboard/stats")?;
        let parsed: StatsResponse = resp.json()?;
        if !parsed.success {
            bail!(server_error(parsed.message, resp.status));
        }
        parsed
            .stats
            .ok_or_else(|| anyhow!("stats response missing stats"))
    }

    pub fn funds(&mut self) -> Result<Vec<Fund>> {
        let resp = self.get("/funds")?;
        let parsed: FundsResponse = resp.json()?;
        if !parsed.success {
            bail!(server_error(parsed.message, resp.status));
        }
        Ok(parsed.funds)
    }

    pub fn create_fund(
        &mut self,
        name: &str,
        description: Option<&str>,
        total_amount: f64,
    ) -> Result<String> {
        if total_amount <= 0.0 {
            bail!("fund amount must be positive");
        }
        let body = serde_json::to_value(CreateFundRequest {
            name,
            description,
            total_amount,
        })?;
        let resp = self.post("/funds", body)?;
        let parsed: Envelope = resp.json()?;
        if !parsed.success {
            bail!(server_error(parsed.message, resp.status));
        }
        Ok(parsed
            .message
            .unwrap_or_else(|| "fund created".to_string()))
    }

    pub fn transactions(&mut self) -> Result<Vec<Transaction>> {
        let resp = self.get("/transactions")?;
        let parsed: TransactionsResponse = resp.json()?;
        if !parsed.success {
            bail!(server_error(parsed.message, resp.status));
        }
        Ok(parsed.transactions)
    }

    pub fn create_transaction(
        &mut self,
        fund_id: u64,
        recipient_address: &str,
        amount: f64,
    ) -> Result<String> {
        if !is_eth_address(recipient_address) {
            bail!(
                "invalid recipient address: {} (expected 0x followed by 40 hex characters)",
                recipient_address
            );
        }
        if amount <= 0.0 {
            bail!("transaction amount must be positive");
        }
        let body = serde_json::to_value(CreateTransactionRequest {
            fund_id,
            recipient_address,
            amount,
        })?;
        let resp = self.post("/transactions", body)?;
        let parsed: Envelope = resp.json()?;
        if !parsed.success {
            bail!(server_error(parsed.message, resp.status));
        }
        Ok(parsed
            .message
            .unwrap_or_else(|| "transaction created".to_string()))
    }

    pub fn chain_events(&mut self) -> Result<Vec<ChainEvent>> {
        let resp = self.get("/blockchain/events")?;
        let parsed: EventsResponse = resp.json()?;
        if !parsed.success {
            bail!(server_error(parsed.message, resp.status));
        }
        Ok(parsed.events)
    }

    fn get(&mut self, path: &str) -> Result<HttpResponse> {
        let url = self.url(path);
        let resp = self
            .session
            .request(self.transport.as_ref(), &url, RequestOptions::get())?;
        check_status(&resp)?;
        Ok(resp)
    }

    fn post(&mut self, path: &str, body: Value) -> Result<HttpResponse> {
        let url = self.url(path);
        let resp = self
            .session
            .request(self.transport.as_ref(), &url, RequestOptions::post(body))?;
        check_status(&resp)?;
        Ok(resp)
    }
}

/// Reject non-2xx responses with the server's message when the body carries
/// one, so an HTML error page never reaches the JSON parsers.
fn check_status(resp: &HttpResponse) -> Result<()> {
    if resp.ok() {
        return Ok(());
    }
    let message = resp
        .json::<Envelope>()
        .ok()
        .and_then(|env| env.message)
        .unwrap_or_else(|| format!("request failed with status {}", resp.status));
    bail!(message)
}

fn server_error(message: Option<String>, status: u16) -> String {
    message.unwrap_or_else(|| format!("request failed with status {}", status))
}
