#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use http::Extensions;
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use serde_json::{json, Value};
use tokenflight_clock::{Clock, DurationSecs, System};
use tokenflight_reqwest::ApiClient;
use tokenflight_tokens::{
    codec, refresher::refresher_fn, AccessToken, RefreshConfig, TokenClaims, TokenManager,
};

pub const BASE_URL: &str = "https://api.example.com/v1/";
pub const REFRESH_LATENCY: Duration = Duration::from_millis(50);

/// What the fake backend saw for one request
#[derive(Clone, Debug)]
pub struct Seen {
    pub path: String,
    pub token: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Default)]
struct State {
    accepted: Mutex<Option<String>>,
    seen: Mutex<Vec<Seen>>,
    refreshes: AtomicUsize,
    reject_everything: AtomicBool,
    refresh_fails: AtomicBool,
}

/// An in-process stand-in for the API and its refresh endpoint
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<State>,
}

impl Backend {
    pub fn mint(&self, jti: &str, lifetime: u64) -> AccessToken {
        codec::encode_unsigned(
            &TokenClaims::new()
                .with_subject("user-1")
                .with_token_id(jti.to_owned())
                .with_lifetime(System.now(), DurationSecs(lifetime)),
        )
        .unwrap()
    }

    pub fn accept(&self, token: &AccessToken) {
        *self.state.accepted.lock().unwrap() = Some(token.as_str().to_owned());
    }

    pub fn revoke(&self) {
        *self.state.accepted.lock().unwrap() = None;
    }

    pub fn reject_everything(&self) {
        self.state.reject_everything.store(true, Ordering::SeqCst);
    }

    pub fn fail_refreshes(&self) {
        self.state.refresh_fails.store(true, Ordering::SeqCst);
    }

    pub fn refreshes(&self) -> usize {
        self.state.refreshes.load(Ordering::SeqCst)
    }

    pub fn seen(&self, path: &str) -> Vec<Seen> {
        self.state
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path == path)
            .cloned()
            .collect()
    }

    pub fn token_manager(&self) -> TokenManager {
        let state = Arc::clone(&self.state);
        let backend = self.clone();
        TokenManager::builder(refresher_fn(move || {
            let state = Arc::clone(&state);
            let backend = backend.clone();
            async move {
                let serial = state.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(REFRESH_LATENCY).await;
                if state.refresh_fails.load(Ordering::SeqCst) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "refresh token revoked",
                    ));
                }

                let token = backend.mint(&format!("refreshed-{}", serial), 3600);
                backend.accept(&token);
                Ok(token)
            }
        }))
        .with_config(RefreshConfig::default())
        .build()
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::builder(BASE_URL.parse().unwrap(), self.token_manager())
            .with_middleware(self.clone())
            .build()
            .unwrap()
    }

    fn authorized(&self, token: Option<&str>) -> bool {
        let accepted = self.state.accepted.lock().unwrap();
        !self.state.reject_everything.load(Ordering::SeqCst)
            && token.is_some()
            && token == accepted.as_deref()
    }

    fn respond(&self, req: &Request) -> (StatusCode, Value) {
        let path = req.url().path();
        let token = bearer(req);

        match path {
            "/v1/auth/refresh" => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "refresh session expired" }),
            ),
            "/v1/missing" => (
                StatusCode::NOT_FOUND,
                json!({ "error": { "message": "no such thing", "code": "NOT_FOUND" } }),
            ),
            "/v1/plain" => (StatusCode::OK, json!({ "id": 7 })),
            _ if !self.authorized(token.as_deref()) => {
                (StatusCode::UNAUTHORIZED, json!({ "message": "token rejected" }))
            }
            "/v1/upload" => (
                StatusCode::OK,
                json!({ "success": true, "data": { "contentType": content_type(req) } }),
            ),
            _ => (
                StatusCode::OK,
                json!({ "success": true, "data": { "path": path }, "message": "ok" }),
            ),
        }
    }
}

fn bearer(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_owned)
}

fn content_type(req: &Request) -> Option<String> {
    req.headers()
        .get(header::CONTENT_TYPE)?
        .to_str()
        .ok()
        .map(str::to_owned)
}

#[async_trait::async_trait]
impl Middleware for Backend {
    async fn handle(&self, req: Request, _: &mut Extensions, _: Next<'_>) -> Result<Response> {
        self.state.seen.lock().unwrap().push(Seen {
            path: req.url().path().to_owned(),
            token: bearer(&req),
            content_type: content_type(&req),
        });

        if req.url().path() == "/v1/unreachable" {
            return Err(reqwest_middleware::Error::middleware(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        if req.url().path() == "/v1/empty" {
            let resp = http::Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(String::new())
                .unwrap();
            return Ok(resp.into());
        }

        let (status, body) = self.respond(&req);
        let resp = http::Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .unwrap();
        Ok(resp.into())
    }
}
