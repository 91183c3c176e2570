//! Authentication and session models

use serde::{Deserialize, Serialize};

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID
    pub id: String,

    /// User email address
    pub email: String,

    /// Display name
    pub name: String,

    /// Role within the organization (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Organization the user is acting in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    /// Organization ID
    pub id: String,

    /// Organization name
    pub name: String,

    /// Subscription plan (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

/// Observable authentication state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub token: Option<String>,
    pub user: Option<User>,
    pub organization: Option<Organization>,
    pub is_authenticated: bool,
    /// A login, signup or verification is outstanding
    pub is_loading: bool,
}

impl SessionState {
    pub(crate) fn authenticated(token: String, user: User, organization: Option<Organization>) -> Self {
        Self {
            token: Some(token),
            user: Some(user),
            organization,
            is_authenticated: true,
            is_loading: false,
        }
    }
}

/// `POST /auth/login` and `POST /auth/signup` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
    #[serde(default)]
    pub organization: Option<Organization>,
}

/// `GET /auth/me` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: User,
    #[serde(default)]
    pub organization: Option<Organization>,
}

/// `POST /auth/refresh` response
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
}

/// `POST /auth/login` body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// `POST /auth/signup` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}
