//! Authenticated JSON API client with single-flight token refresh
//!
//! [`AccessTokenMiddleware`] attaches the current access token from a
//! [`TokenManager`](tokenflight_tokens::TokenManager) to each outbound
//! request sent through a
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware).
//! Tokens about to expire are refreshed before the request goes out, and a
//! request answered with `401 Unauthorized` is replayed once with a newly
//! refreshed token. However many requests are in flight, they share a
//! single refresh.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use tokenflight_reqwest::AccessTokenMiddleware;
//! use tokenflight_tokens::{refresher::refresher_fn, AccessToken, TokenManager};
//! #
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let refresher = refresher_fn(|| async { Ok::<_, std::io::Error>(AccessToken::from_static("token")) });
//! let tokens = TokenManager::builder(refresher).build();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(tokens).exempt_path("/auth/refresh"))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. These predicates can be composed together to
//! evaluate more complex requirements prior to attaching a token to a
//! request.
//!
//! ```
//! use predicates::prelude::PredicateBooleanExt;
//! use tokenflight_reqwest::{AccessTokenMiddleware, ExactHostMatch, HttpsOnly, LoopbackHost};
//! # use tokenflight_tokens::{refresher::refresher_fn, AccessToken, TokenManager};
//! # let refresher = refresher_fn(|| async { Ok::<_, std::io::Error>(AccessToken::from_static("token")) });
//! # let tokens = TokenManager::builder(refresher).build();
//!
//! AccessTokenMiddleware::new(tokens)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("example.com")).or(LoopbackHost));
//! ```
//!
//! Most applications will prefer the [`ApiClient`], which wraps the
//! middleware stack and normalizes every outcome into an [`ApiResponse`].
//!
//! ```no_run
//! use tokenflight_reqwest::ApiClient;
//! use tokenflight_tokens::{refresher::EndpointRefresher, TokenManager};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base = reqwest::Url::parse("https://api.example.com/v1/")?;
//! let refresher = EndpointRefresher::new(reqwest::Client::new(), base.join("auth/refresh")?);
//! let tokens = TokenManager::builder(refresher).build();
//!
//! let api = ApiClient::builder(base, tokens).build()?;
//! let profile = api.get::<serde_json::Value>("/me").await;
//! if !profile.success {
//!     eprintln!("{:?}", profile.error);
//! }
//! # Ok(()) }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod client;
mod envelope;
mod filter;
mod middleware;

pub use client::{ApiClient, ApiClientBuilder, DefaultPredicate, DEFAULT_REFRESH_PATH};
pub use envelope::{codes, ApiError, ApiResponse};
pub use filter::{ExactHostMatch, HttpsOnly, LoopbackHost};
pub use middleware::{AccessTokenMiddleware, InvalidTokenHeader};
