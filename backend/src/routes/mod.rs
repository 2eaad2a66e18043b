mod error;
mod meta;
mod predict;

use actix_files::{Files, NamedFile};
use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpResponse};
use chrono::Local;

use crate::config::AppConfig;

pub use error::ApiError;
pub use predict::decode_image_payload;

/// Timestamp carried by every JSON response.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, config: &AppConfig) {
    let max_mb = config.max_content_mb();
    let json_config = web::JsonConfig::default()
        .limit(config.max_content_length)
        .error_handler(move |err, _req| json_payload_error(err, max_mb).into());

    cfg.app_data(json_config)
        .service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/api/predict").route(web::post().to(predict::predict_upload)))
        .service(
            web::resource("/api/predict_base64").route(web::post().to(predict::predict_base64)),
        )
        .service(web::resource("/api/health").route(web::get().to(meta::health_check)))
        .service(web::resource("/api/classes").route(web::get().to(meta::get_classes)))
        .service(web::resource("/api/info").route(web::get().to(meta::get_app_info)))
        .service(Files::new("/static", config.static_dir.clone()));
}

fn json_payload_error(err: JsonPayloadError, max_mb: usize) -> ApiError {
    match err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            ApiError::PayloadTooLarge(max_mb)
        }
        JsonPayloadError::ContentType => ApiError::MissingImage,
        other => ApiError::InvalidUpload(other.to_string()),
    }
}

async fn index(config: web::Data<AppConfig>) -> Result<NamedFile, ApiError> {
    let page = config.static_dir.join("index.html");
    NamedFile::open_async(&page).await.map_err(|e| {
        log::error!("Static page {} unavailable: {}", page.display(), e);
        ApiError::Internal
    })
}

/// Fallback for unknown routes.
pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound)
}
