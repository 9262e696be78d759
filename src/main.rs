// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use log::info;
use std::sync::Arc;

mod config;
mod errors;
mod handlers;
mod models;
mod services;

use crate::config::Config;
use crate::services::CollageService;

#[derive(Clone)]
pub struct AppState {
    collage: Arc<CollageService>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting collage-composer service...");

    let config = Config::from_env()?;
    let collage = Arc::new(CollageService::from_config(&config)?);
    info!(
        "Providers available: [{}], default: {}",
        collage.supported().join(", "),
        config.default_provider
    );

    let app_state = AppState { collage };

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
            .route("/health", web::get().to(health_check))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "collage-composer",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
