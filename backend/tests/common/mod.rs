#![allow(dead_code)]

use actix_web::web;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use leafcare::classifier::Classifier;
use leafcare::classifier::backbone::MobileNetV3Small;
use leafcare::classifier::checkpoint::CheckpointManifest;
use leafcare::config::AppConfig;
use leafcare::storage::upload::UploadStore;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tch::{Device, nn};
use tempfile::TempDir;

pub const CLASSES: [&str; 4] = ["健康", "白粉病", "锈病", "Tomato_healthy"];

/// A loaded classifier plus the upload folder it writes into, all living in
/// one temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub config: AppConfig,
    pub classifier: web::Data<Classifier>,
    pub uploads: web::Data<UploadStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let model_path = write_checkpoint(dir.path());

        let config = AppConfig {
            model_path: model_path.clone(),
            upload_folder: dir.path().join("uploads"),
            max_content_length: 1024 * 1024,
            ..AppConfig::default()
        };
        let classifier = Classifier::load(&model_path, Some(Device::Cpu)).unwrap();
        let uploads = UploadStore::from_config(&config);
        uploads.ensure_folder().unwrap();

        Self {
            dir,
            config,
            classifier: web::Data::new(classifier),
            uploads: web::Data::new(uploads),
        }
    }

    pub fn upload_folder(&self) -> &Path {
        self.uploads.folder()
    }

    pub fn uploads_left(&self) -> usize {
        std::fs::read_dir(self.upload_folder()).unwrap().count()
    }
}

/// Builds the full application around a [`Fixture`] and initialises it as a
/// test service.
macro_rules! test_app {
    ($fixture:expr) => {{
        let fixture = &$fixture;
        let config = fixture.config.clone();
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(fixture.classifier.clone())
                .app_data(fixture.uploads.clone())
                .app_data(actix_web::web::Data::new(config.clone()))
                .configure(|cfg| leafcare::routes::configure_routes(cfg, &config))
                .default_service(actix_web::web::to(leafcare::routes::not_found)),
        )
        .await
    }};
}

fn write_checkpoint(dir: &Path) -> PathBuf {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = MobileNetV3Small::new(&vs.root(), CLASSES.len() as i64);
    vs.save(dir.join("weights.safetensors")).unwrap();

    let manifest = CheckpointManifest {
        class_names: CLASSES.iter().map(|s| s.to_string()).collect(),
        num_classes: CLASSES.len(),
        disease_info: Some(HashMap::from([(
            "锈病".to_string(),
            serde_json::json!({"symptoms": "叶面出现锈色孢子堆"}),
        )])),
        weights: PathBuf::from("weights.safetensors"),
    };
    let path = dir.join("plant_disease_model.json");
    manifest.save(&path).unwrap();
    path
}

pub fn leaf_png() -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(300, 200, |x, y| {
        Rgb([(x % 200) as u8 + 20, 120 + (y % 100) as u8, ((x * y) % 90) as u8])
    }));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub const BOUNDARY: &str = "leafcare-test-boundary";

/// Encodes a single-part multipart body.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
