//! Coordinated lifecycle management for bearer access tokens
//!
//! This library keeps a client's access token fresh with as little ceremony
//! as possible for the code that uses it. A [`TokenManager`] holds the
//! current token and renews it in two ways:
//!
//! * _Proactively_: whenever a token is stored, a one-shot timer is armed to
//!   refresh it a configurable skew (five minutes by default) before it
//!   expires.
//! * _On demand_: callers such as an HTTP middleware ask for a refresh when
//!   a token is about to expire or has just been rejected.
//!
//! However many callers ask at once, at most one refresh is ever in flight.
//! Everyone waiting receives the same outcome. When a refresh fails for good
//! the token is cleared and a hook is called exactly once, which is where an
//! application sends its user back to the sign-in screen.
//!
//! Token claims are decoded only to learn when a token expires. Signatures
//! are never checked: the server remains the authority on whether a token is
//! acceptable, and a token that cannot be decoded is treated as expired.
//!
//! ```no_run
//! use tokenflight_tokens::{
//!     refresher::EndpointRefresher, slots::FileSlot, AccessToken, RefreshFailure, TokenManager,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let refresher = EndpointRefresher::new(
//!     reqwest::Client::new(),
//!     "https://api.example.com/auth/refresh".parse()?,
//! );
//!
//! let tokens = TokenManager::builder(refresher)
//!     .with_slot(FileSlot::new("session.json".into()))
//!     .on_refresh_failed(|failure: &RefreshFailure| {
//!         tracing::warn!(%failure, "session ended, please sign in again");
//!     })
//!     .build();
//!
//! if tokens.restore().await.is_none() {
//!     tokens.sign_in(AccessToken::new("issued-by-login".into())).await;
//! }
//!
//! let token = tokens.preflight().await?;
//! # drop(token);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `endpoint`: Provides [`EndpointRefresher`][refresher::EndpointRefresher], which
//!   obtains new tokens from a refresh endpoint using [reqwest].
//! * `file`: Provides [`FileSlot`][slots::FileSlot], which persists the token to the
//!   local filesystem.
//! * `rand`: Provides for an implementation of [JitterSource][jitter::JitterSource] based on the
//!   random number generator provided by the [rand] crate.
//!
//! The `rustls-tls` feature, off by default, lets the refresh endpoint be reached over HTTPS.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
pub mod codec;
mod coordinator;
pub mod jitter;
mod lifetime;
mod manager;
pub mod refresher;
mod scheduler;
pub mod slots;
mod store;

pub use braids::*;
pub use codec::{DecodeError, TokenClaims};
pub use coordinator::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
pub use lifetime::{TokenClock, TokenStatus, DEFAULT_SKEW};
pub use manager::{RefreshConfig, TokenManager, TokenManagerBuilder};
pub use scheduler::ProactiveScheduler;
pub use store::TokenStore;
