//! Session token lifecycle and the authenticated-request gate.
//!
//! The `SessionManager` owns the bearer token and user identity, decides
//! whether the token is still usable, and mediates every outgoing request
//! that requires authentication. Token and user are set and cleared
//! together; the manager never holds one without the other.
//!
//! A token is treated as expired once `exp < now - 60`: the 60-second grace
//! period absorbs clock skew between this client and the issuer, so a token
//! stays usable for up to a minute past its literal expiry. Any token that
//! cannot be decoded is treated as expired (fail closed), never as valid.

use crate::store::SessionStore;
use crate::transport::{HttpResponse, HttpTransport, TransportError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Seconds past `exp` during which a token is still accepted.
pub const GRACE_PERIOD_SECS: i64 = 60;

const TOKEN_KEY: &str = "token";
const USER_KEY: &str = "user";

/// Auth failures surfaced to callers. All of these are terminal for the
/// current session; the caller must drive a fresh login.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable token held: absent, malformed, or past the grace period.
    /// The session was cleared before any network traffic.
    #[error("session expired, please log in again")]
    Expired,
    /// The server answered 401 despite a locally-valid-looking token
    /// (revocation, server restart, clock divergence beyond the grace
    /// period). The session was cleared.
    #[error("authentication rejected by server, please log in again")]
    Rejected,
    /// Network-level failure, passed through uninterpreted. The session
    /// is left untouched.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Clock abstraction so tests can control time.
pub trait Clock {
    /// Current time as epoch seconds.
    fn now_epoch(&self) -> i64;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Caller-side request parameters for an authenticated call.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub method: String,
    /// Extra headers merged over the session defaults. On a name collision
    /// (compared case-insensitively) the caller's entry wins.
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            headers: Vec::new(),
            body: Some(body),
        }
    }
}

/// Claims we care about from the token payload. Everything else in the
/// payload is opaque to this component.
#[derive(Deserialize)]
struct Claims {
    // The issuer emits fractional epoch timestamps.
    exp: f64,
}

pub struct SessionManager {
    store: Box<dyn SessionStore>,
    clock: Box<dyn Clock>,
    token: Option<String>,
    user: Option<Value>,
}

impl SessionManager {
    /// Create a manager, restoring any persisted session. A stored token
    /// without a stored user (or vice versa) is discarded: the two are only
    /// valid together.
    pub fn new(store: Box<dyn SessionStore>, clock: Box<dyn Clock>) -> Self {
        let token = store.get(TOKEN_KEY);
        let user = store
            .get(USER_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok());

        let (token, user) = match (token, user) {
            (Some(t), Some(u)) => (Some(t), Some(u)),
            _ => (None, None),
        };

        Self {
            store,
            clock,
            token,
            user,
        }
    }

    /// Whether a session is currently held (it may still be expired).
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    /// The token's literal expiry as epoch seconds. None if no token is
    /// held or the token is undecodable.
    pub fn expires_at(&self) -> Option<i64> {
        let claims = decode_claims(self.token.as_deref()?)?;
        Some(claims.exp as i64)
    }

    /// Seconds until the token's literal expiry (negative once past it).
    pub fn expires_in(&self) -> Option<i64> {
        Some(self.expires_at()? - self.clock.now_epoch())
    }

    /// Check whether the held token is expired. Pure: reads only the clock
    /// and the token content.
    ///
    /// Returns true when no token is held, when the token is malformed in
    /// any way, or when `exp < now - 60`. The boundary `exp == now - 60` is
    /// still inside the grace window.
    pub fn is_expired(&self) -> bool {
        let Some(token) = self.token.as_deref() else {
            return true;
        };
        match decode_claims(token) {
            Some(claims) => {
                let cutoff = (self.clock.now_epoch() - GRACE_PERIOD_SECS) as f64;
                claims.exp < cutoff
            }
            None => true,
        }
    }

    /// Default headers for an outgoing request. Always declares the content
    /// type; adds the bearer credential only when a non-expired token is
    /// held, so a stale token is never sent.
    pub fn auth_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )];
        if let Some(token) = self.token.as_deref() {
            if !self.is_expired() {
                headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
            }
        }
        headers
    }

    /// Issue an authenticated request.
    ///
    /// An expired token clears the session and returns `AuthError::Expired`
    /// without any network traffic. A 401 response clears the session and
    /// returns `AuthError::Rejected`. Any other response is returned raw
    /// for caller interpretation; bodies are not parsed here.
    pub fn request(
        &mut self,
        transport: &dyn HttpTransport,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, AuthError> {
        if self.is_expired() {
            self.logout();
            return Err(AuthError::Expired);
        }

        let headers = merge_headers(self.auth_headers(), options.headers);
        let response = transport.send(&options.method, url, &headers, options.body.as_ref())?;

        if response.status == 401 {
            self.logout();
            return Err(AuthError::Rejected);
        }

        Ok(response)
    }

    /// Store a fresh session, replacing any prior one. Token and user are
    /// written together, in memory and in the durable store.
    pub fn login(&mut self, token: &str, user: &Value) {
        self.token = Some(token.to_string());
        self.user = Some(user.clone());
        self.store.set(TOKEN_KEY, token);
        self.store
            .set(USER_KEY, &user.to_string());
    }

    /// Clear the session from memory and the durable store. Idempotent.
    pub fn logout(&mut self) {
        self.token = None;
        self.user = None;
        self.store.remove(TOKEN_KEY);
        self.store.remove(USER_KEY);
    }
}

/// Decode the payload segment of a bearer token. Returns None for anything
/// other than three dot-separated segments with a base64url-decodable JSON
/// payload carrying a numeric `exp`.
fn decode_claims(token: &str) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }
    // Tolerate padded encoders.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Merge caller headers over the defaults. Caller entries win on name
/// collisions, compared case-insensitively per HTTP semantics.
fn merge_headers(
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut merged = defaults;
    for (name, value) in overrides {
        merged.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        merged.push((name, value));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Controllable clock for expiry tests.
    struct FixedClock {
        now: Rc<Cell<i64>>,
    }

    impl Clock for FixedClock {
        fn now_epoch(&self) -> i64 {
            self.now.get()
        }
    }

    /// Store whose entries the test keeps a handle on.
    #[derive(Clone, Default)]
    struct SharedStore {
        entries: Rc<RefCell<HashMap<String, String>>>,
    }

    impl SessionStore for SharedStore {
        fn get(&self, key: &str) -> Option<String> {
            self.entries.borrow().get(key).cloned()
        }
        fn set(&mut self, key: &str, value: &str) {
            self.entries
                .borrow_mut()
                .insert(key.to_string(), value.to_string());
        }
        fn remove(&mut self, key: &str) {
            self.entries.borrow_mut().remove(key);
        }
    }

    /// Transport that records calls and replays a canned response.
    struct MockTransport {
        calls: RefCell<Vec<(String, String)>>,
        status: u16,
        body: String,
        fail: bool,
    }

    impl MockTransport {
        fn responding(status: u16, body: &str) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                status,
                body: body.to_string(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                status: 0,
                body: String::new(),
                fail: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl HttpTransport for MockTransport {
        fn send(
            &self,
            method: &str,
            url: &str,
            _headers: &[(String, String)],
            _body: Option<&Value>,
        ) -> Result<HttpResponse, TransportError> {
            self.calls
                .borrow_mut()
                .push((method.to_string(), url.to_string()));
            if self.fail {
                return Err(TransportError("connection refused".to_string()));
            }
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    /// Build a token whose payload carries the given JSON claims.
    fn token_with_payload(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        format!("{}.{}.sig", header, body)
    }

    fn token_with_exp(exp: i64) -> String {
        token_with_payload(&format!(r#"{{"id":1,"username":"alice","exp":{}}}"#, exp))
    }

    const NOW: i64 = 1_700_000_000;

    fn manager_at(now: i64) -> (SessionManager, Rc<Cell<i64>>, SharedStore) {
        let clock_handle = Rc::new(Cell::new(now));
        let store = SharedStore::default();
        let manager = SessionManager::new(
            Box::new(store.clone()),
            Box::new(FixedClock {
                now: clock_handle.clone(),
            }),
        );
        (manager, clock_handle, store)
    }

    fn logged_in_manager(exp: i64) -> (SessionManager, Rc<Cell<i64>>, SharedStore) {
        let (mut manager, clock, store) = manager_at(NOW);
        manager.login(
            &token_with_exp(exp),
            &serde_json::json!({"username": "alice", "role": "user"}),
        );
        (manager, clock, store)
    }

    #[test]
    fn test_no_token_is_expired() {
        let (manager, _, _) = manager_at(NOW);
        assert!(manager.is_expired());
    }

    #[test]
    fn test_future_expiry_not_expired() {
        let (manager, _, _) = logged_in_manager(NOW + 3600);
        assert!(!manager.is_expired());
    }

    #[test]
    fn test_within_grace_window_not_expired() {
        // Literally expired ten seconds ago, still inside the grace period.
        let (manager, _, _) = logged_in_manager(NOW - 10);
        assert!(!manager.is_expired());
    }

    #[test]
    fn test_boundary_exactly_at_grace_not_expired() {
        let (manager, _, _) = logged_in_manager(NOW - GRACE_PERIOD_SECS);
        assert!(!manager.is_expired());
    }

    #[test]
    fn test_boundary_one_past_grace_expired() {
        let (manager, _, _) = logged_in_manager(NOW - GRACE_PERIOD_SECS - 1);
        assert!(manager.is_expired());
    }

    #[test]
    fn test_fractional_exp_parses() {
        let (mut manager, _, _) = manager_at(NOW);
        let token = token_with_payload(&format!(r#"{{"exp":{}.591}}"#, NOW + 120));
        manager.login(&token, &serde_json::json!({"username": "a"}));
        assert!(!manager.is_expired());
    }

    #[test]
    fn test_two_segment_token_expired() {
        let (mut manager, _, _) = manager_at(NOW);
        manager.login("head.payload", &serde_json::json!({"username": "a"}));
        assert!(manager.is_expired());
    }

    #[test]
    fn test_four_segment_token_expired() {
        let (mut manager, _, _) = manager_at(NOW);
        let token = format!("{}.extra", token_with_exp(NOW + 3600));
        manager.login(&token, &serde_json::json!({"username": "a"}));
        assert!(manager.is_expired());
    }

    #[test]
    fn test_undecodable_payload_expired() {
        let (mut manager, _, _) = manager_at(NOW);
        manager.login("head.!!!not-base64!!!.sig", &serde_json::json!({"username": "a"}));
        assert!(manager.is_expired());
    }

    #[test]
    fn test_payload_not_json_expired() {
        let (mut manager, _, _) = manager_at(NOW);
        let body = URL_SAFE_NO_PAD.encode(b"plain text");
        manager.login(&format!("head.{}.sig", body), &serde_json::json!({"username": "a"}));
        assert!(manager.is_expired());
    }

    #[test]
    fn test_missing_exp_expired() {
        let (mut manager, _, _) = manager_at(NOW);
        let token = token_with_payload(r#"{"id":1,"username":"alice"}"#);
        manager.login(&token, &serde_json::json!({"username": "a"}));
        assert!(manager.is_expired());
    }

    #[test]
    fn test_non_numeric_exp_expired() {
        let (mut manager, _, _) = manager_at(NOW);
        let token = token_with_payload(r#"{"exp":"tomorrow"}"#);
        manager.login(&token, &serde_json::json!({"username": "a"}));
        assert!(manager.is_expired());
    }

    #[test]
    fn test_auth_headers_with_valid_token() {
        let (manager, _, _) = logged_in_manager(NOW + 3600);
        let headers = manager.auth_headers();
        assert!(headers
            .iter()
            .any(|(n, v)| n == "Content-Type" && v == "application/json"));
        let auth = headers.iter().find(|(n, _)| n == "Authorization").unwrap();
        assert!(auth.1.starts_with("Bearer "));
        assert!(auth.1.contains(manager.token().unwrap()));
    }

    #[test]
    fn test_auth_headers_without_token() {
        let (manager, _, _) = manager_at(NOW);
        let headers = manager.auth_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "Content-Type");
    }

    #[test]
    fn test_auth_headers_expired_token_omitted() {
        let (manager, _, _) = logged_in_manager(NOW - 3600);
        assert!(!manager.auth_headers().iter().any(|(n, _)| n == "Authorization"));
    }

    #[test]
    fn test_auth_headers_malformed_token_omitted() {
        let (mut manager, _, _) = manager_at(NOW);
        manager.login("garbage", &serde_json::json!({"username": "a"}));
        assert!(!manager.auth_headers().iter().any(|(n, _)| n == "Authorization"));
    }

    #[test]
    fn test_login_then_logout_leaves_nothing() {
        let (mut manager, _, store) = manager_at(NOW);
        manager.login(&token_with_exp(NOW + 3600), &serde_json::json!({"username": "a"}));
        manager.logout();

        assert!(manager.token().is_none());
        assert!(manager.user().is_none());
        assert!(store.entries.borrow().is_empty());
    }

    #[test]
    fn test_logout_when_anonymous_is_noop() {
        let (mut manager, _, _) = manager_at(NOW);
        manager.logout();
        manager.logout();
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn test_login_persists_token_and_user_together() {
        let (mut manager, _, store) = manager_at(NOW);
        let token = token_with_exp(NOW + 3600);
        manager.login(&token, &serde_json::json!({"username": "alice"}));

        let entries = store.entries.borrow();
        assert_eq!(entries.get("token").map(String::as_str), Some(token.as_str()));
        assert!(entries.get("user").unwrap().contains("alice"));
    }

    #[test]
    fn test_relogin_replaces_prior_session() {
        let (mut manager, _, _) = manager_at(NOW);
        manager.login(&token_with_exp(NOW + 10), &serde_json::json!({"username": "alice"}));
        let second = token_with_exp(NOW + 9000);
        manager.login(&second, &serde_json::json!({"username": "bob"}));

        assert_eq!(manager.token(), Some(second.as_str()));
        assert_eq!(
            manager.user().and_then(|u| u.get("username")).and_then(|v| v.as_str()),
            Some("bob")
        );
    }

    #[test]
    fn test_restores_session_from_store() {
        let token = token_with_exp(NOW + 3600);
        let mut seed = SharedStore::default();
        seed.set("token", &token);
        seed.set("user", r#"{"username":"alice"}"#);

        let manager = SessionManager::new(
            Box::new(seed),
            Box::new(FixedClock {
                now: Rc::new(Cell::new(NOW)),
            }),
        );
        assert_eq!(manager.token(), Some(token.as_str()));
        assert!(!manager.is_expired());
    }

    #[test]
    fn test_restore_requires_both_fields() {
        let mut seed = SharedStore::default();
        seed.set("token", &token_with_exp(NOW + 3600));
        // No stored user: the pair is invalid, restore nothing.

        let manager = SessionManager::new(
            Box::new(seed),
            Box::new(FixedClock {
                now: Rc::new(Cell::new(NOW)),
            }),
        );
        assert!(manager.token().is_none());
        assert!(manager.user().is_none());
    }

    #[test]
    fn test_expired_request_never_touches_network() {
        let (mut manager, _, store) = logged_in_manager(NOW - 3600);
        let transport = MockTransport::responding(200, "{}");

        let err = manager
            .request(&transport, "http://api/funds", RequestOptions::get())
            .unwrap_err();

        assert!(matches!(err, AuthError::Expired));
        assert_eq!(transport.call_count(), 0);
        assert!(manager.token().is_none());
        assert!(store.entries.borrow().is_empty());
    }

    #[test]
    fn test_rejected_request_clears_session() {
        let (mut manager, _, store) = logged_in_manager(NOW + 3600);
        let transport = MockTransport::responding(401, r#"{"message":"Token is invalid!"}"#);

        let err = manager
            .request(&transport, "http://api/funds", RequestOptions::get())
            .unwrap_err();

        assert!(matches!(err, AuthError::Rejected));
        assert_eq!(transport.call_count(), 1);
        assert!(manager.is_expired());
        assert!(store.entries.borrow().is_empty());
    }

    #[test]
    fn test_successful_request_passes_response_through() {
        let (mut manager, _, _) = logged_in_manager(NOW + 3600);
        let transport = MockTransport::responding(200, r#"{"success":true}"#);

        let resp = manager
            .request(&transport, "http://api/funds", RequestOptions::get())
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"success":true}"#);
        assert!(manager.is_authenticated());
    }

    #[test]
    fn test_transport_failure_preserves_session() {
        let (mut manager, _, _) = logged_in_manager(NOW + 3600);
        let transport = MockTransport::failing();

        let err = manager
            .request(&transport, "http://api/funds", RequestOptions::get())
            .unwrap_err();

        assert!(matches!(err, AuthError::Transport(_)));
        assert!(manager.is_authenticated());
        assert!(!manager.is_expired());
    }

    #[test]
    fn test_non_401_error_status_passes_through() {
        let (mut manager, _, _) = logged_in_manager(NOW + 3600);
        let transport = MockTransport::responding(500, "oops");

        let resp = manager
            .request(&transport, "http://api/funds", RequestOptions::get())
            .unwrap();

        assert_eq!(resp.status, 500);
        assert!(manager.is_authenticated());
    }

    #[test]
    fn test_token_valid_then_clock_advances_past_grace() {
        // Token good for 10 more seconds; 71 seconds later it is past the
        // grace window.
        let (mut manager, clock, _) = logged_in_manager(NOW + 10);
        assert!(!manager.is_expired());

        clock.set(NOW + 71);
        assert!(manager.is_expired());

        let transport = MockTransport::responding(200, "{}");
        let err = manager
            .request(&transport, "http://api/funds", RequestOptions::get())
            .unwrap_err();
        assert!(matches!(err, AuthError::Expired));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_expires_in_reports_remaining_seconds() {
        let (manager, _, _) = logged_in_manager(NOW + 120);
        assert_eq!(manager.expires_in(), Some(120));
    }

    #[test]
    fn test_merge_headers_caller_wins() {
        let merged = merge_headers(
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), "Bearer t".to_string()),
            ],
            vec![("content-type".to_string(), "text/plain".to_string())],
        );

        assert_eq!(merged.len(), 2);
        let ct = merged
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .unwrap();
        assert_eq!(ct.1, "text/plain");
        assert!(merged.iter().any(|(n, _)| n == "Authorization"));
    }

    #[test]
    fn test_merge_headers_disjoint_appends() {
        let merged = merge_headers(
            vec![("Content-Type".to_string(), "application/json".to_string())],
            vec![("X-Request-Id".to_string(), "42".to_string())],
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_padded_base64_payload_accepted() {
        let (mut manager, _, _) = manager_at(NOW);
        let payload = format!(r#"{{"exp":{}}}"#, NOW + 3600);
        let body = base64::engine::general_purpose::URL_SAFE.encode(payload.as_bytes());
        manager.login(&format!("head.{}.sig", body), &serde_json::json!({"username": "a"}));
        assert!(!manager.is_expired());
    }
}
