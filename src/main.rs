use std::sync::Arc;

use rollcall::config::Config;
use rollcall::db::memory::MemoryBackend;
use rollcall::db::postgres::PgBackend;
use rollcall::db::{self, Backend};
use rollcall::scan::qr::QrDetector;
use rollcall::scan::replay::ReplaySource;
use rollcall::services::{attendance, realtime, scanner::Scanner};
use rollcall::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let port = config.port;

    let backend: Arc<dyn Backend> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections).await?;
            Arc::new(PgBackend::new(pool, config.operator_id.clone()))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory backend");
            Arc::new(MemoryBackend::new(config.operator_id.clone()))
        }
    };

    let replay_path = config.scan_replay_path.clone();
    let frame_interval = config.scan_frame_interval;
    let state = AppState::new(config, backend);

    match attendance::load(&state).await {
        Ok(summary) => tracing::info!(
            attendees = summary.attendees,
            sessions = summary.sessions,
            records = summary.records,
            session_id = ?summary.session_id,
            "initial load complete"
        ),
        Err(e) => tracing::warn!(error = %e, "initial load failed; waiting for realtime backfill"),
    }

    let _realtime = realtime::spawn(state.clone());

    let _scanner = replay_path.map(|path| {
        tracing::info!(%path, "replaying scan frames");
        let mut scanner = Scanner::new(state.clone(), ReplaySource::from_path(path, frame_interval), QrDetector);
        scanner.start();
        scanner
    });

    let app = rollcall::routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    tracing::info!(%port, "rollcall listening");
    axum::serve(listener, app).await?;
    Ok(())
}
