use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::Parser;
use tokenflight_clock::{Clock, DurationSecs, System};
use tokenflight_tokens::{
    codec, jitter, refresher::refresher_fn, slots::FileSlot, AccessToken, RefreshConfig,
    RefreshFailure, TokenClaims, TokenManager, TokenStatus,
};
use tokio::time;

/// Keeps a locally minted session alive and reports on it periodically
#[derive(Debug, Parser)]
struct Opts {
    /// How long each minted token is valid for, in seconds
    #[arg(short, long, env, default_value_t = 420)]
    lifetime: u64,

    /// How long before expiry to refresh, in seconds
    #[arg(short, long, env, default_value_t = 300)]
    skew: u64,

    /// The most a scheduled refresh may be pulled earlier, in seconds
    #[arg(short, long, env, default_value_t = 10)]
    jitter: u64,

    /// The local file used to persist the session
    #[arg(short = 'f', long, env, value_name = "FILE", default_value = ".session.json")]
    session_file: std::path::PathBuf,
}

fn mint(lifetime: DurationSecs, serial: u64) -> Result<AccessToken, serde_json::Error> {
    codec::encode_unsigned(
        &TokenClaims::new()
            .with_subject("demo-user")
            .with_token_id(format!("demo-{}", serial))
            .with_lifetime(System.now(), lifetime),
    )
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
    let lifetime = DurationSecs(opts.lifetime);
    let serial = Arc::new(AtomicU64::new(0));

    let refresher = refresher_fn({
        let serial = Arc::clone(&serial);
        move || {
            let serial = serial.fetch_add(1, Ordering::SeqCst) + 1;
            async move { mint(lifetime, serial) }
        }
    });

    let tokens = TokenManager::builder(refresher)
        .with_slot(FileSlot::new(opts.session_file))
        .with_config(RefreshConfig::new(DurationSecs(opts.skew)))
        .with_jitter(jitter::RandomEarlyJitter::new(DurationSecs(opts.jitter)))
        .on_refresh_failed(|failure: &RefreshFailure| {
            tracing::error!(error = (failure as &dyn std::error::Error), "session ended");
        })
        .build();

    if tokens.restore().await.is_none() {
        tokens.sign_in(mint(lifetime, 0)?).await;
    }

    tracing::info!(
        token = format_args!("{:#?}", tokens.token()),
        next_refresh = tokens.scheduler().next_fire_at().map(|t| t.0),
        "session started"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let Some(claims) = tokens.claims() else {
            tracing::error!("no session");
            continue;
        };

        let status = tokens.lifetime().status(&claims, System.now());
        let expiry = claims.expiry().map(|e| e.0);
        let jti = claims.token_id().map(|j| j.as_str().to_owned());
        match status {
            TokenStatus::Fresh => {
                tracing::debug!(?status, ?jti, expiry, "pulled token")
            }
            TokenStatus::RefreshSoon => {
                tracing::warn!(?status, ?jti, expiry, "pulled token")
            }
            TokenStatus::Expired => {
                tracing::error!(?status, ?jti, expiry, "pulled token")
            }
        }
    }
}
