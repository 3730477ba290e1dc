//! Request/response types for session endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Closed set of roles carried by access tokens.
///
/// Kept as an enum rather than a free-form string so authorization checks
/// stay exhaustive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Parse the database representation; `None` for anything unknown.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "guest" => Some(Self::Guest),
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
}

// Manual Debug so secrets never reach logs through request tracing.
impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RefreshRequest {
    /// Fallback for clients that do not use the refresh cookie.
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub all_devices: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenPairResponse {
    #[must_use]
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WhoamiResponse {
    pub subject_id: String,
    pub role: Role,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    pub issued_at: String,
    pub expires_at: String,
    pub client_descriptor: Option<String>,
    pub origin_address: Option<String>,
    /// True for the session whose refresh cookie made this request.
    pub current: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Guest, Role::User, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("ADMIN"), None);
    }

    #[test]
    fn role_serializes_lowercase() {
        let value = serde_json::to_value(Role::Admin).expect("role should serialize");
        assert_eq!(value, serde_json::json!("admin"));
        let decoded: Role = serde_json::from_value(serde_json::json!("user"))
            .expect("role should deserialize");
        assert_eq!(decoded, Role::User);
    }

    #[test]
    fn login_request_debug_redacts_secret() {
        let request = LoginRequest {
            identifier: "alice@example.com".to_string(),
            secret: "hunter2".to_string(),
        };
        let debug = format!("{request:?}");
        assert!(debug.contains("alice@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn token_pair_response_sets_bearer_type() {
        let response = TokenPairResponse::new("a".to_string(), "r".to_string(), 900);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 900);
    }

    #[test]
    fn logout_request_defaults_to_single_device() {
        let request: LogoutRequest = serde_json::from_str("{}").expect("empty body should parse");
        assert!(!request.all_devices);
        assert!(request.refresh_token.is_none());
    }
}
