//! Wire types for the fund-disbursement API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generic response envelope: every endpoint answers
/// `{"success": bool, "message": ..., ...data}`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fund {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub total_amount: f64,
    pub remaining_amount: f64,
    /// active, suspended, or closed
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub fund_id: u64,
    pub recipient_address: String,
    pub amount: f64,
    /// pending, completed, or failed
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_funds: u64,
    #[serde(default)]
    pub total_transactions: u64,
    #[serde(default)]
    pub completed_transactions: u64,
    #[serde(default)]
    pub blockchain_balance: f64,
}

/// A FundReleased event observed on chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainEvent {
    pub transaction_hash: String,
    pub recipient: String,
    pub amount: f64,
    #[serde(default)]
    pub block_number: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub token: Option<String>,
    /// Identity attributes; opaque to the session layer.
    pub user: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateFundRequest<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub total_amount: f64,
}

#[derive(Debug, Serialize)]
pub struct CreateTransactionRequest<'a> {
    pub fund_id: u64,
    pub recipient_address: &'a str,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fund_deserializes_server_shape() {
        let json = r#"{
            "id": 3,
            "name": "Relief Fund",
            "description": "Emergency relief",
            "total_amount": 100.0,
            "remaining_amount": 42.5,
            "status": "active",
            "created_by": 1,
            "created_at": "2026-01-12T09:30:00",
            "updated_at": "2026-01-12T09:30:00"
        }"#;
        let fund: Fund = serde_json::from_str(json).unwrap();
        assert_eq!(fund.name, "Relief Fund");
        assert_eq!(fund.remaining_amount, 42.5);
        assert_eq!(fund.status, "active");
    }

    #[test]
    fn test_transaction_optional_fields_absent() {
        let json = r#"{
            "id": 9,
            "fund_id": 3,
            "user_id": 1,
            "recipient_address": "0x52908400098527886E0F7030069857D2E4169EE7",
            "amount": 1.25,
            "status": "pending",
            "transaction_hash": null,
            "block_number": null,
            "created_at": "2026-01-12T10:00:00"
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert!(tx.transaction_hash.is_none());
        assert!(tx.block_number.is_none());
        assert_eq!(tx.status, "pending");
    }

    #[test]
    fn test_stats_default_missing_counters() {
        let stats: DashboardStats = serde_json::from_str(r#"{"total_funds": 2}"#).unwrap();
        assert_eq!(stats.total_funds, 2);
        assert_eq!(stats.total_transactions, 0);
        assert_eq!(stats.blockchain_balance, 0.0);
    }

    #[test]
    fn test_login_response_failure_has_no_token() {
        let json = r#"{"success": false, "message": "Invalid credentials!"}"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.success);
        assert!(resp.token.is_none());
        assert_eq!(resp.message.as_deref(), Some("Invalid credentials!"));
    }

    #[test]
    fn test_create_fund_request_skips_empty_description() {
        let req = CreateFundRequest {
            name: "Relief Fund",
            description: None,
            total_amount: 10.0,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("description"));
    }
}
