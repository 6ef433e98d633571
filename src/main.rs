mod auth;
mod booking;
mod catalog;
mod config;
mod contact;
mod coupon;
mod customer;
mod db;
mod error;
mod filters;
mod forms;
mod models;
mod pagination;
mod provider;
mod push;
mod routes;
mod settings;
mod state;
mod templates;
#[cfg(test)]
mod test_support;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use crate::{config::Config, state::AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

/// Loads `.env` and installs the logger, so `RUST_LOG` from the file applies
/// and warnings raised while reading the config are printed.
fn init_logging() {
    dotenv::dotenv().ok();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let config = Config::from_env();

    db::ensure_sqlite_dir(&config.database_url)?;

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool, &config.admin).await?;

    if config.push.enabled() {
        log::info!("Web push notifications enabled");
    } else {
        log::info!("VAPID keys not set; web push notifications are off");
    }

    let address = format!("{}:{}", config.host, config.port);
    let static_dir = config.static_dir.clone();
    let cors_origin = config.cors_origin.clone();
    let state = AppState::new(pool, config);

    log::info!("Starting VoltCare on http://{address}");

    HttpServer::new(move || {
        let cors = match cors_origin.as_deref() {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
                .max_age(3600),
            None => Cors::permissive(),
        };

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(routes::json_config())
            .app_data(routes::query_config())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", &static_dir).prefer_utf8(true))
            .configure(routes::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn warnings_are_enabled_once_logging_is_initialised() {
        super::init_logging();
        assert!(log::log_enabled!(log::Level::Warn));
    }
}
