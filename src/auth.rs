//! Login flows
//!
//! Password and resume-token logins, each a single `login` method call
//! whose result is parsed into a `Token`. Server rejections surface as
//! `SessionError::Api`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::SessionError;
use crate::session::Session;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Credentials issued by a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub auth_token: String,
    pub user_id: String,
    /// Expiry in epoch milliseconds; `None` means it does not expire
    pub expires_at: Option<i64>,
}

/// Login result as sent by the server
#[derive(Debug, Deserialize)]
struct LoginResult {
    #[serde(default)]
    id: Option<String>,
    token: TokenField,
    #[serde(rename = "tokenExpires", default)]
    token_expires: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenField {
    Plain(String),
    Nested(NestedToken),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NestedToken {
    auth_token: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    expires_at: Option<Timestamp>,
    #[serde(default)]
    expires_in_days: Option<f64>,
}

/// Either raw epoch millis or an EJSON date
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Millis(i64),
    Date {
        #[serde(rename = "$date")]
        date: i64,
    },
}

impl Timestamp {
    fn millis(self) -> i64 {
        match self {
            Timestamp::Millis(ms) => ms,
            Timestamp::Date { date } => date,
        }
    }
}

impl Token {
    /// Parse the result payload of a `login` call
    pub fn from_login_result(result: Value) -> Result<Self, SessionError> {
        let parsed: LoginResult = serde_json::from_value(result)
            .map_err(|e| SessionError::Protocol(format!("unexpected login result: {}", e)))?;

        let (auth_token, nested_user, expires_at) = match parsed.token {
            TokenField::Plain(auth_token) => {
                (auth_token, None, parsed.token_expires.map(Timestamp::millis))
            }
            TokenField::Nested(nested) => {
                let expires_at = nested
                    .expires_at
                    .map(Timestamp::millis)
                    .map(Ok)
                    .or_else(|| nested.expires_in_days.map(expiry_from_days))
                    .transpose()?
                    .or_else(|| parsed.token_expires.map(Timestamp::millis));
                (nested.auth_token, nested.user_id, expires_at)
            }
        };

        let user_id = nested_user
            .or(parsed.id)
            .ok_or_else(|| SessionError::Protocol("login result has no user id".to_string()))?;

        Ok(Token {
            auth_token,
            user_id,
            expires_at,
        })
    }
}

/// Absolute expiry for a relative day count
///
/// Day counts that are not finite, or whose expiry does not fit in epoch
/// millis, are rejected.
fn expiry_from_days(days: f64) -> Result<i64, SessionError> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let offset_ms = days * MILLIS_PER_DAY;
    if !offset_ms.is_finite() || offset_ms.abs() >= i64::MAX as f64 {
        return Err(SessionError::Protocol(format!(
            "login result has out-of-range expiresInDays: {}",
            days
        )));
    }
    now_ms.checked_add(offset_ms as i64).ok_or_else(|| {
        SessionError::Protocol(format!(
            "login result has out-of-range expiresInDays: {}",
            days
        ))
    })
}

/// Params for a password login
///
/// The password travels as a SHA-256 digest; usernames containing `@` are
/// sent as an email address.
fn password_login_params(username: &str, password: &str) -> Value {
    let user = if username.contains('@') {
        json!({ "email": username })
    } else {
        json!({ "username": username })
    };
    let digest = format!("{:x}", Sha256::digest(password.as_bytes()));

    json!({
        "user": user,
        "password": {
            "digest": digest,
            "algorithm": "sha-256",
        },
    })
}

impl Session {
    /// Log in with username (or email) and password
    pub async fn login_with_password(&self, username: &str, password: &str) -> Result<Token, SessionError> {
        let result = self
            .call("login", vec![password_login_params(username, password)])
            .await?;
        let token = Token::from_login_result(result)?;
        info!("Logged in as {}", token.user_id);
        Ok(token)
    }

    /// Resume a previous login with its auth token
    ///
    /// The returned token never carries an expiry.
    pub async fn login_with_token(&self, resume_token: &str) -> Result<Token, SessionError> {
        let result = self
            .call("login", vec![json!({ "resume": resume_token })])
            .await?;
        let token = Token {
            expires_at: None,
            ..Token::from_login_result(result)?
        };
        info!("Resumed login for {}", token.user_id);
        Ok(token)
    }

    /// End the logged-in session on the server
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.call("logout", vec![]).await?;
        info!("Logged out");
        Ok(())
    }
}
