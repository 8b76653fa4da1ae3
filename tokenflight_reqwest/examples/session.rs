use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use serde_json::Value;
use tokenflight_reqwest::ApiClient;
use tokenflight_tokens::{
    refresher::{EndpointRefresher, RetryingRefresher},
    AccessToken, RefreshFailure, TokenManager,
};
use tokio::time;

/// Polls an authenticated endpoint, keeping the session alive in the background
#[derive(Debug, Parser)]
struct Opts {
    /// The root of the API
    #[arg(long, env, value_name = "URL")]
    api_base_url: Url,

    /// The access token issued at sign-in
    #[arg(long, env, hide_env_values = true)]
    access_token: String,

    /// The path to poll, relative to the API root
    #[arg(short, long, env, default_value = "me")]
    path: String,

    /// Seconds between polls
    #[arg(short, long, env, default_value_t = 15)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let refresher = EndpointRefresher::new(
        reqwest::Client::builder()
            .user_agent(concat!("tokenflight-session/", env!("CARGO_PKG_VERSION")))
            .build()?,
        opts.api_base_url.join("auth/refresh")?,
    );

    let tokens = TokenManager::builder(RetryingRefresher::new(refresher, Default::default()))
        .on_refresh_failed(|failure: &RefreshFailure| {
            tracing::error!(error = %failure, "session ended, sign in again");
        })
        .build();

    let api = ApiClient::builder(opts.api_base_url, tokens)
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("tokenflight-session/", env!("CARGO_PKG_VERSION")))
        .build()?;

    api.sign_in(AccessToken::from(opts.access_token)).await;

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let resp = api.get::<Value>(&opts.path).await;
        match (resp.success, resp.error) {
            (true, _) => tracing::info!(data = ?resp.data, "polled"),
            (false, Some(error)) if error.is_unauthorized() => {
                tracing::error!(%error, "not authorized");
                break;
            }
            (false, error) => tracing::warn!(?error, "poll failed"),
        }
    }

    Ok(())
}
