use std::{net::SocketAddr, sync::Arc};

use competition_api::ApiContext;
use sequence::QuestionBank;
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod auth;
mod config;

use api::build_router;
use app_state::AppState;
use config::{load_settings, prepare_database_url, Settings, DEV_ADMIN_SECRET};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings()?;
    if settings.admin_jwt_secret == DEV_ADMIN_SECRET {
        warn!("APP__ADMIN_JWT_SECRET is not set; admin routes use the development secret");
    }

    let state = build_state(&settings).await?;
    let app = build_router(Arc::new(state), settings.max_code_bytes);

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_state(settings: &Settings) -> anyhow::Result<AppState> {
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let bank = match settings.question_bank_path.as_deref() {
        Some(path) => {
            info!(path, "loading question bank");
            QuestionBank::from_json_file(path)?
        }
        None => QuestionBank::default(),
    };

    let api = ApiContext::new(storage, Arc::new(bank), settings.max_code_bytes);
    let (events, _) = broadcast::channel(256);
    Ok(AppState {
        api,
        events,
        admin_jwt_secret: settings.admin_jwt_secret.clone(),
    })
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
