// src/main.rs
mod api;
mod auth;
mod cache;
mod coingecko;
mod config;
mod db;
mod error;
mod ledger;
mod mailer;
mod models;
mod newsdata;
mod symbols;

use std::sync::Arc;

use env_logger::Builder;
use log::{error, info, LevelFilter};
use warp::Filter;

use crate::api::AppState;
use crate::config::Config;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    Builder::new()
        .filter_level(LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let config = Config::from_env();

    let session = match db::init(&config.scylla_node).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let port = config.port;
    let state = match AppState::new(session, config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to build application state: {}", e);
            return;
        }
    };

    let routes = api::routes(state).recover(error::handle_rejection);

    info!("Server running on http://127.0.0.1:{}", port);
    warp::serve(routes).run(([127, 0, 0, 1], port)).await;
}
