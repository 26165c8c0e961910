//! # Sieve Core
//!
//! The sieve daemon: a filtering reverse proxy and rate limiter that sits in
//! front of a backend HTTP service. Incoming requests are evaluated against
//! an ordered rule tree; rules whose filters match are counted per
//! aggregation key over a sliding window, and once a counter exceeds the
//! rule's limit its actions fire (log the hit, serve a canned rejection, or
//! invoke an external command). Requests no action answered are forwarded
//! to the upstream target verbatim.
//!
//! ## Architecture
//!
//! One process hosts two HTTP servers sharing a single rule store:
//! - **Proxy listener**: the data plane; evaluates and forwards
//! - **Management API**: rule-state snapshots and rule reloads
//!
//! Reloads parse the rule file into a fresh tree and swap one pointer, so
//! traffic is never served from a half-built tree.

mod api;
mod app;
mod config;

use std::path::Path;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;

use api::ApiState;
use app::proxy::ProxyState;
use sieve_rules::RuleStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = config::Config::parse();

    let store = match RuleStore::from_file(Path::new(&config.rules)) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            log::error!("Cannot parse rules: {}", err);
            std::process::exit(1);
        }
    };
    log::info!(
        "{} rules loaded from {}",
        sieve_rules::count(&store.current()),
        config.rules
    );

    let proxy_state = web::Data::new(ProxyState {
        store: Arc::clone(&store),
        target: config.target.clone(),
        client: reqwest::Client::new(),
    });
    let api_state = web::Data::new(ApiState {
        store: Arc::clone(&store),
        rule_file: config.rules.clone(),
    });

    log::info!("Proxy listens on {}", config.listen);
    let proxy_server = HttpServer::new({
        let proxy_state = proxy_state.clone();
        move || {
            App::new()
                .app_data(proxy_state.clone())
                .default_service(web::to(app::proxy::handle))
        }
    })
    .bind(&config.listen)?
    .run();

    log::info!("API listens on {}", config.api);
    let api_server = HttpServer::new({
        let api_state = api_state.clone();
        move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600);

            App::new()
                .app_data(api_state.clone())
                .wrap(middleware::Logger::default())
                .wrap(cors)
                .configure(api::configure)
        }
    })
    .bind(&config.api)?
    .workers(2)
    .run();

    tokio::try_join!(proxy_server, api_server)?;
    Ok(())
}
