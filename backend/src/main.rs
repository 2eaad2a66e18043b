use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use leafcare::classifier::Classifier;
use leafcare::config::AppConfig;
use leafcare::routes::{configure_routes, not_found};
use leafcare::storage::upload::UploadStore;
use std::env;
use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let device = config
        .device_preference()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let classifier = match Classifier::load(&config.model_path, device.explicit()) {
        Ok(classifier) => classifier,
        Err(e) => {
            log::error!("Failed to load plant disease model at startup: {}", e);
            return Err(io::Error::other(format!("Model loading failed: {}", e)));
        }
    };
    log::info!("Application: {} v{}", config.app_name, config.app_version);
    log::info!(
        "Device: {:?}, parameters: {}",
        classifier.device(),
        classifier.parameter_count()
    );
    log::info!(
        "Supported classes ({}): {:?}",
        classifier.num_classes(),
        classifier.class_names()
    );

    let uploads = UploadStore::from_config(&config);
    uploads.ensure_folder()?;
    log::info!("Upload folder: {}", uploads.folder().display());

    let bind_address = config.bind_address();
    let classifier = web::Data::new(classifier);
    let uploads = web::Data::new(uploads);
    let config = web::Data::new(config);

    log::info!("Starting server on {}", bind_address);
    log::info!("Health check: http://{}/api/health", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(classifier.clone())
            .app_data(uploads.clone())
            .app_data(config.clone())
            .configure(|cfg| configure_routes(cfg, &config))
            .default_service(web::to(not_found))
    })
    .bind(&bind_address)?
    .run()
    .await
}
