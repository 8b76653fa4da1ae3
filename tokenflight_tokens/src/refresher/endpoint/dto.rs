//! Data transfer objects for the refresh endpoint

use serde::Deserialize;

use crate::AccessToken;

/// A token carried in a response body
///
/// Backends disagree on the field name, so `token`, `accessToken`, and
/// `access_token` are all accepted.
#[derive(Debug, Default, Deserialize)]
pub struct TokenBody {
    /// The new access token
    #[serde(default, alias = "accessToken", alias = "access_token")]
    pub token: Option<AccessToken>,
}

/// A response from the refresh endpoint
///
/// The token may be at the top level, or wrapped in the standard API
/// envelope under `data`.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    /// Whether the backend reports the refresh as successful
    #[serde(default)]
    pub success: Option<bool>,
    /// The enveloped payload
    #[serde(default)]
    pub data: Option<TokenBody>,
    /// A human-readable message from the backend
    #[serde(default)]
    pub message: Option<String>,
    /// A token at the top level of the body
    #[serde(flatten)]
    pub token: TokenBody,
}

impl RefreshResponse {
    /// Takes the new token out of the response, preferring the envelope
    pub fn into_token(self) -> Option<AccessToken> {
        self.data.and_then(|d| d.token).or(self.token.token)
    }
}
