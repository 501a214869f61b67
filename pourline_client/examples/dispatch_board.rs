//! Signs in against the scheduling backend and makes an authenticated
//! call, logging session-state transitions along the way.
//!
//! Point it at a backend exposing `POST /auth/exchange` and
//! `POST /auth/refresh`:
//!
//! ```sh
//! cargo run --example dispatch_board -- \
//!     --backend-url http://localhost:8080/ \
//!     --assertion "$ASSERTION"
//! ```

use std::sync::Arc;

use clap::Parser;
use pourline_client::ApiClient;
use pourline_session::authority::HttpTokenAuthority;
use pourline_session::store::InMemorySessionStore;
use pourline_session::{SessionManager, UserId, UserIdentity};

#[derive(Debug, Parser)]
struct Opts {
    /// The scheduling backend's base URL
    #[arg(short, long, env)]
    backend_url: reqwest::Url,

    /// The identity assertion issued by the OAuth provider at sign-in
    #[arg(short, long, env, hide_env_values = true)]
    assertion: String,

    /// The user id asserted by the provider
    #[arg(long, env, default_value = "demo-dispatcher")]
    user_id: String,

    /// The user's display name
    #[arg(long, env, default_value = "Demo Dispatcher")]
    display_name: String,

    /// The user's email
    #[arg(long, env, default_value = "demo@pourline.example")]
    email: String,

    /// The path to request once signed in
    #[arg(short, long, env, default_value = "schedules/today")]
    path: String,
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

    let authority = HttpTokenAuthority::new(reqwest::Client::new(), opts.backend_url.clone());
    let manager = SessionManager::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(authority),
    );

    let mut states = manager.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            tracing::info!(?state, "session state changed");
        }
    });

    let identity = UserIdentity {
        user_id: UserId::from(opts.user_id),
        display_name: opts.display_name,
        email: opts.email,
    };

    let outcome = manager.sign_in(identity, opts.assertion.into()).await;
    if outcome.is_degraded() {
        tracing::warn!("signed in degraded; authenticated calls will fail fast");
    }

    let client = ApiClient::new(opts.backend_url, manager.clone());
    match client.get(&opts.path).await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await?;
            tracing::info!(
                status = status.as_u16(),
                body = %body,
                "authenticated call succeeded"
            );
        }
        Err(error) => {
            tracing::error!(
                error = (&error as &dyn std::error::Error),
                "authenticated call failed"
            );
        }
    }

    manager.sign_out().await;
    Ok(())
}
