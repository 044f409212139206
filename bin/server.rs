// Treasury management API server entrypoint

use anyhow::Result;
use clap::Parser;

use treasury::api::{build_router, AppState};
use treasury::config::{init_tracing, CliArgs, Config};
use treasury::db;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    let conn = db::open_database(std::path::Path::new(&config.database.path))?;
    db::seed_defaults(&conn)?;

    let state = AppState::new(conn, config.auth.session_ttl_minutes);
    let app = build_router(state);

    let addr = config.listen_addr();
    tracing::info!(%addr, database = %config.database.path, "treasury server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
