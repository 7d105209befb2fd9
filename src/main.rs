mod account;
mod admin;
mod catalog;
mod circulation;
mod config;
mod error;
mod extractor;
mod library;
mod models;
mod notice;
mod routes;
mod store;

use actix_web::{
    middleware::Logger,
    web::{route, Data},
    App, HttpResponse, HttpServer,
};
use config::Config;
use library::Library;
use serde_json::json;
use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::Arc,
};
use store::{MemoryStore, PgStore, Store};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgStore::new(url).await?),
        None => {
            tracing::warn!("DATABASE_URL is not set, data is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let library = Library::new(store, config.library.clone());

    if let Some(seed) = &config.admin {
        library.ensure_admin(seed).await?;
    }

    tracing::info!(%addr, "listening");
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(library.clone()))
            .wrap(Logger::default())
            .configure(routes::configure)
            .default_service(route().to(fallback))
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}

async fn fallback() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "message": "no such endpoint" }))
}
