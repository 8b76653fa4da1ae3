//! A refresher that calls a refresh endpoint on the backend

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::{BoxError, TokenRefresher};
use crate::{AccessToken, AccessTokenRef};

pub mod dto;

/// The default bound on a single refresh request
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Obtains new tokens by `POST`ing to a refresh endpoint
///
/// The current token, if any, is sent as a bearer token. Use a plain
/// `reqwest::Client` here, not one wrapped with the token middleware, so
/// that refreshing never recurses into itself.
#[derive(Clone, Debug)]
pub struct EndpointRefresher {
    client: reqwest::Client,
    refresh_url: reqwest::Url,
    timeout: Duration,
}

impl EndpointRefresher {
    /// Constructs a new endpoint refresher
    pub fn new(client: reqwest::Client, refresh_url: reqwest::Url) -> Self {
        Self {
            client,
            refresh_url,
            timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Bounds each refresh request by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The endpoint being called
    pub fn refresh_url(&self) -> &reqwest::Url {
        &self.refresh_url
    }
}

#[async_trait]
impl TokenRefresher for EndpointRefresher {
    async fn refresh(&self, current: Option<&AccessTokenRef>) -> Result<AccessToken, BoxError> {
        Ok(request_token(&self.client, self.refresh_url.clone(), current, self.timeout).await?)
    }
}

/// An error while attempting to request a new token from the backend
#[derive(Debug, Error)]
pub enum RefreshRequestError {
    /// An error from the backend with an error body
    #[error("error refreshing token: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing refresh response")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a refresh request to the backend
    #[error("error sending refresh request")]
    RequestSend(#[source] reqwest::Error),
    /// The backend answered, but reported the refresh as unsuccessful
    #[error("refresh rejected by backend: {}", message.as_deref().unwrap_or("no reason given"))]
    Rejected {
        /// The reason given by the backend
        message: Option<String>,
    },
    /// The response did not carry a token
    #[error("refresh response did not include a token")]
    MissingToken,
}

#[tracing::instrument(
    err,
    skip(client, refresh_url, current),
    fields(
        refresh_url = %refresh_url,
        has_token = current.is_some(),
    ),
)]
async fn request_token(
    client: &reqwest::Client,
    refresh_url: reqwest::Url,
    current: Option<&AccessTokenRef>,
    timeout: Duration,
) -> Result<AccessToken, RefreshRequestError> {
    tracing::trace!("requesting token refresh");

    let mut req = client
        .post(refresh_url)
        .timeout(timeout)
        .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = current {
        req = req.bearer_auth(token.as_str());
    }

    let resp = req.send().await.map_err(RefreshRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received refresh response"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(RefreshRequestError::BodyReadError)?;
        return Err(RefreshRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(RefreshRequestError::BodyReadError)?;
    let resp: dto::RefreshResponse = serde_json::from_slice(&body)?;

    if resp.success == Some(false) {
        return Err(RefreshRequestError::Rejected {
            message: resp.message,
        });
    }

    let token = resp.into_token().ok_or(RefreshRequestError::MissingToken)?;

    tracing::info!("received new access token");
    Ok(token)
}
