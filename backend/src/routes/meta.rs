use actix_web::{web, HttpResponse};
use shared::{AppInfoResponse, ClassesResponse, HealthResponse};

use super::timestamp;
use crate::classifier::Classifier;
use crate::config::AppConfig;

/// GET /api/health
pub async fn health_check(
    classifier: Option<web::Data<Classifier>>,
    config: web::Data<AppConfig>,
) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: classifier.is_some(),
        app_name: config.app_name.clone(),
        version: config.app_version.clone(),
        timestamp: timestamp(),
    })
}

/// GET /api/classes
pub async fn get_classes(classifier: web::Data<Classifier>) -> HttpResponse {
    HttpResponse::Ok().json(ClassesResponse {
        success: true,
        classes: classifier.class_names().to_vec(),
        num_classes: classifier.num_classes(),
        disease_info: classifier.disease_info().clone(),
        timestamp: timestamp(),
    })
}

/// GET /api/info
pub async fn get_app_info(
    classifier: web::Data<Classifier>,
    config: web::Data<AppConfig>,
) -> HttpResponse {
    HttpResponse::Ok().json(AppInfoResponse {
        app_name: config.app_name.clone(),
        description: config.app_description.clone(),
        version: config.app_version.clone(),
        supported_diseases: classifier.num_classes(),
        timestamp: timestamp(),
    })
}
