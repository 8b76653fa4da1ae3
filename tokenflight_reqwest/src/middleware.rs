use bytes::{BufMut, BytesMut};
use http::Extensions;
use predicates::prelude::*;
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Error, Middleware, Next, Result};
use tokenflight_tokens::{AccessTokenRef, TokenManager};

use crate::filter::HttpsOnly;

/// The access token could not be placed in an `Authorization` header
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("access token contains bytes that are not valid in a header")]
pub struct InvalidTokenHeader;

/// A middleware that injects an access token into outgoing requests
///
/// Before a request is sent, a token that has expired or is about to is
/// refreshed. If the server still answers `401 Unauthorized`, the token is
/// refreshed and the request replayed once. Refreshes are shared with every
/// other request and with the proactive scheduler of the [`TokenManager`],
/// so no matter how many requests run at once, at most one refresh is in
/// flight.
///
/// Requests to exempt paths (such as the refresh endpoint itself) still
/// carry the current token, but never wait on or trigger a refresh.
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    tokens: TokenManager,
    predicate: P,
    exempt_paths: Vec<String>,
}

impl AccessTokenMiddleware<HttpsOnly> {
    /// Construct a new middleware from a token manager
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(tokens: TokenManager) -> Self {
        Self {
            tokens,
            predicate: HttpsOnly,
            exempt_paths: Vec::new(),
        }
    }
}

impl<P> AccessTokenMiddleware<P> {
    /// Replaces the predicate deciding which requests receive the token
    pub fn with_predicate<Q>(self, predicate: Q) -> AccessTokenMiddleware<Q> {
        AccessTokenMiddleware {
            tokens: self.tokens,
            predicate,
            exempt_paths: self.exempt_paths,
        }
    }

    /// Exempts requests whose path ends with `path` from refresh handling
    pub fn exempt_path(mut self, path: impl Into<String>) -> Self {
        self.exempt_paths.push(path.into());
        self
    }

    /// The token manager supplying tokens
    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    fn is_exempt(&self, req: &Request) -> bool {
        let path = req.url().path();
        self.exempt_paths.iter().any(|p| path.ends_with(p.as_str()))
    }

    fn trace_token(&self) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let claims = self.tokens.claims();
            tracing::trace!(
                token.status = ?self.tokens.status(),
                token.expiry = claims.as_ref().and_then(|c| c.expiry()).map(|e| e.0),
                token.jti = claims.as_ref().and_then(|c| c.token_id()).map(|j| j.as_str()),
                "attaching access token"
            );
        }
    }
}

fn bearer(token: &AccessTokenRef) -> std::result::Result<header::HeaderValue, InvalidTokenHeader> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value.freeze()).map_err(|_| InvalidTokenHeader)?;
    value.set_sensitive(true);
    Ok(value)
}

fn authorize(req: &mut Request, token: &AccessTokenRef) -> Result<()> {
    let value = bearer(token).map_err(Error::middleware)?;
    req.headers_mut().insert(header::AUTHORIZATION, value);
    Ok(())
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !self.predicate.eval(&req) {
            tracing::trace!("request not eligible for an access token");
            return next.run(req, extensions).await;
        }

        if req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request already carries authorization, leaving it alone");
            return next.run(req, extensions).await;
        }

        if self.is_exempt(&req) {
            if let Some(token) = self.tokens.token() {
                authorize(&mut req, &token)?;
            }
            return next.run(req, extensions).await;
        }

        let token = self.tokens.preflight().await.map_err(Error::middleware)?;
        if let Some(token) = &token {
            self.trace_token();
            authorize(&mut req, token)?;
        }

        let replay = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(mut replay) = replay else {
            tracing::debug!("request cannot be replayed, returning unauthorized response");
            return Ok(resp);
        };

        tracing::debug!("request was unauthorized, refreshing access token");
        match self.tokens.request_refresh().await {
            Ok(token) => {
                authorize(&mut replay, &token)?;
                tracing::debug!("replaying request with refreshed access token");
                next.run(replay, extensions).await
            }
            Err(failure) => {
                tracing::warn!(
                    error = %failure,
                    "unable to refresh access token, returning unauthorized response"
                );
                Ok(resp)
            }
        }
    }
}
