use std::{fmt, sync::Arc, time::Duration};

use predicates::{
    boolean::{AndPredicate, OrPredicate},
    prelude::*,
};
use reqwest::{
    header::{self, HeaderMap},
    multipart, Method, Request, StatusCode, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tokenflight_tokens::{AccessToken, TokenManager};

use crate::{
    envelope::{codes, transport_error, ApiError, ApiResponse},
    filter::{ExactHostMatch, HttpsOnly, LoopbackHost},
    middleware::AccessTokenMiddleware,
};

/// The path of the token refresh endpoint, exempt from refresh handling by default
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// The predicate used unless the builder is given another
///
/// Tokens are sent over HTTPS to the host of the base URL, or to a server on
/// this machine.
pub type DefaultPredicate =
    OrPredicate<AndPredicate<HttpsOnly, ExactHostMatch, Request>, LoopbackHost, Request>;

const APPLICATION_JSON: &str = "application/json";

/// An HTTP client for a JSON API that authenticates with a refreshable bearer token
///
/// Every request goes through an [`AccessTokenMiddleware`], so expiring
/// tokens are refreshed before use and rejected ones are refreshed and the
/// request replayed once. Every response, including transport failures, is
/// normalized into an [`ApiResponse`].
#[derive(Clone)]
pub struct ApiClient {
    http: ClientWithMiddleware,
    base_url: Url,
    tokens: TokenManager,
    exempt_paths: Arc<[String]>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Starts building a client for the API rooted at `base_url`
    pub fn builder(base_url: Url, tokens: TokenManager) -> ApiClientBuilder<DefaultPredicate> {
        ApiClientBuilder::new(base_url, tokens)
    }

    /// The token manager authenticating this client
    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// The underlying middleware client, for requests the verbs do not cover
    pub fn http(&self) -> &ClientWithMiddleware {
        &self.http
    }

    /// The URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Starts a session with a freshly issued token
    pub async fn sign_in(&self, token: AccessToken) {
        self.tokens.sign_in(token).await
    }

    /// Ends the current session
    pub async fn sign_out(&self) {
        self.tokens.sign_out().await
    }

    /// Sends a `GET` request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResponse<T> {
        match self.json_request(Method::GET, path) {
            Ok(req) => send(req).await,
            Err(error) => ApiResponse::failure(error),
        }
    }

    /// Sends a `GET` request with the given query parameters
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        match self.json_request(Method::GET, path) {
            Ok(req) => send(req.query(query)).await,
            Err(error) => ApiResponse::failure(error),
        }
    }

    /// Sends a `POST` request with a JSON body
    pub async fn post<T, B>(&self, path: &str, body: &B) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, body).await
    }

    /// Sends a `PUT` request with a JSON body
    pub async fn put<T, B>(&self, path: &str, body: &B) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, body).await
    }

    /// Sends a `PATCH` request with a JSON body
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    /// Sends a `DELETE` request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ApiResponse<T> {
        match self.json_request(Method::DELETE, path) {
            Ok(req) => send(req).await,
            Err(error) => ApiResponse::failure(error),
        }
    }

    /// Uploads a multipart form with a `POST` request
    ///
    /// The content type, including its boundary, is set by the form. A form
    /// is a one-shot stream, so `form` builds it afresh for each attempt:
    /// after a `401 Unauthorized` the token is refreshed and the upload sent
    /// once more.
    pub async fn upload_file<T, F>(&self, path: &str, form: F) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        F: Fn() -> multipart::Form,
    {
        let url = match self.url(path) {
            Ok(url) => url,
            Err(error) => return ApiResponse::failure(error),
        };
        let upload = || {
            self.http
                .request(Method::POST, url.clone())
                .header(header::ACCEPT, APPLICATION_JSON)
                .multipart(form())
        };

        let resp = match upload().send().await {
            Ok(resp) => resp,
            Err(error) => return ApiResponse::failure(transport_error(error)),
        };
        if resp.status() != StatusCode::UNAUTHORIZED || self.is_exempt(&url) {
            return ApiResponse::from_response(resp).await;
        }

        tracing::debug!("upload was unauthorized, refreshing access token");
        match self.tokens.request_refresh().await {
            Ok(_) => send(upload()).await,
            Err(failure) => {
                tracing::warn!(
                    error = %failure,
                    "unable to refresh access token, returning unauthorized response"
                );
                ApiResponse::from_response(resp).await
            }
        }
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: &B) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        match self.json_request(method, path) {
            Ok(req) => send(req.json(body)).await,
            Err(error) => ApiResponse::failure(error),
        }
    }

    fn json_request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        Ok(self
            .http
            .request(method, url)
            .header(header::CONTENT_TYPE, APPLICATION_JSON)
            .header(header::ACCEPT, APPLICATION_JSON))
    }

    fn is_exempt(&self, url: &Url) -> bool {
        let path = url.path();
        self.exempt_paths.iter().any(|p| path.ends_with(p.as_str()))
    }

    /// Resolves `path` under the base URL, refusing anything that leaves its origin
    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|error| {
                ApiError::new(0, format!("invalid request path: {}", error), codes::INVALID_REQUEST)
            })?;

        if url.origin() != self.base_url.origin() {
            return Err(ApiError::new(
                0,
                format!("request path leaves the API origin: {}", url.origin().ascii_serialization()),
                codes::INVALID_REQUEST,
            ));
        }

        Ok(url)
    }
}

async fn send<T: DeserializeOwned>(req: RequestBuilder) -> ApiResponse<T> {
    match req.send().await {
        Ok(resp) => ApiResponse::from_response(resp).await,
        Err(error) => {
            let error = transport_error(error);
            tracing::debug!(
                error.status = error.status,
                error.code = %error.code,
                error.message = %error.message,
                "request failed before a response was received"
            );
            ApiResponse::failure(error)
        }
    }
}

/// Builds an [`ApiClient`]
pub struct ApiClientBuilder<P> {
    base_url: Url,
    tokens: TokenManager,
    predicate: P,
    exempt_paths: Vec<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    default_headers: HeaderMap,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl<P: fmt::Debug> fmt::Debug for ApiClientBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClientBuilder")
            .field("base_url", &self.base_url.as_str())
            .field("predicate", &self.predicate)
            .field("exempt_paths", &self.exempt_paths)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

impl ApiClientBuilder<DefaultPredicate> {
    fn new(mut base_url: Url, tokens: TokenManager) -> Self {
        // Relative paths resolve under the base path only if it ends in a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let host = ExactHostMatch::new(base_url.host_str().unwrap_or_default());
        Self {
            base_url,
            tokens,
            predicate: HttpsOnly.and(host).or(LoopbackHost),
            exempt_paths: vec![DEFAULT_REFRESH_PATH.to_owned()],
            timeout: None,
            user_agent: None,
            default_headers: HeaderMap::new(),
            middleware: Vec::new(),
        }
    }
}

impl<P> ApiClientBuilder<P> {
    /// Replaces the predicate deciding which requests receive the token
    pub fn with_predicate<Q>(self, predicate: Q) -> ApiClientBuilder<Q> {
        ApiClientBuilder {
            base_url: self.base_url,
            tokens: self.tokens,
            predicate,
            exempt_paths: self.exempt_paths,
            timeout: self.timeout,
            user_agent: self.user_agent,
            default_headers: self.default_headers,
            middleware: self.middleware,
        }
    }

    /// Exempts requests whose path ends with `path` from refresh handling
    ///
    /// [`DEFAULT_REFRESH_PATH`] is always exempt.
    pub fn exempt_path(mut self, path: impl Into<String>) -> Self {
        self.exempt_paths.push(path.into());
        self
    }

    /// Bounds the total time of each request
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the `User-Agent` sent with every request
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds headers sent with every request
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers.extend(headers);
        self
    }

    /// Adds a middleware that runs after the token has been attached
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }
}

impl<P> ApiClientBuilder<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    /// Builds the client
    pub fn build(self) -> Result<ApiClient, reqwest::Error> {
        let mut client = reqwest::Client::builder().default_headers(self.default_headers);
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        if let Some(user_agent) = self.user_agent {
            client = client.user_agent(user_agent);
        }

        let exempt_paths: Arc<[String]> = self.exempt_paths.into();
        let auth = exempt_paths
            .iter()
            .cloned()
            .fold(
                AccessTokenMiddleware::new(self.tokens.clone()).with_predicate(self.predicate),
                |auth, path| auth.exempt_path(path),
            );

        let http = self
            .middleware
            .into_iter()
            .fold(ClientBuilder::new(client.build()?).with(auth), |builder, layer| {
                builder.with_arc(layer)
            })
            .build();

        Ok(ApiClient {
            http,
            base_url: self.base_url,
            tokens: self.tokens,
            exempt_paths,
        })
    }
}
