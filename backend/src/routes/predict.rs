use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use base64::prelude::*;
use futures::TryStreamExt;
use log::info;
use shared::{PredictBase64Request, PredictResponse};

use super::{timestamp, ApiError};
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::storage::upload::{sanitize_filename, UploadStore};

struct UploadedFile {
    filename: String,
    extension: String,
    data: Vec<u8>,
}

/// POST /api/predict - multipart upload in the `file` field
pub async fn predict_upload(
    classifier: web::Data<Classifier>,
    uploads: web::Data<UploadStore>,
    config: web::Data<AppConfig>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let max_mb = config.max_content_mb();
    let reject = |err| ApiError::from_upload(err, uploads.allowed_extensions(), max_mb);

    let mut upload: Option<UploadedFile> = None;
    let mut received = 0usize;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
    {
        let mut target = None;
        if upload.is_none() && field.name() == Some("file") {
            let filename = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .unwrap_or_default()
                .to_string();
            if filename.is_empty() {
                return Err(ApiError::EmptyFilename);
            }
            // rejected before anything is buffered or written
            let extension = uploads.extract_file_extension(&filename).map_err(reject)?;
            target = Some(UploadedFile {
                filename,
                extension,
                data: Vec::new(),
            });
        }

        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
        {
            received += chunk.len();
            uploads.validate_size(received).map_err(reject)?;
            if let Some(file) = target.as_mut() {
                file.data.extend_from_slice(&chunk);
            }
        }

        if target.is_some() {
            upload = target;
        }
    }

    let UploadedFile {
        filename,
        extension,
        data,
    } = upload.ok_or(ApiError::NoFile)?;

    let model = classifier.clone();
    let store = uploads.clone();
    let prediction = web::block(move || {
        let temp = store
            .persist(&data, &extension)
            .map_err(|e| ApiError::from_upload(e, store.allowed_extensions(), max_mb))?;
        model.predict(temp.path()).map_err(ApiError::from)
    })
    .await??;

    info!(
        "Predicted {} ({:.4}) for upload {}",
        prediction.predicted_class, prediction.confidence, filename
    );

    Ok(HttpResponse::Ok().json(PredictResponse {
        success: true,
        prediction,
        filename: Some(sanitize_filename(&filename)),
        timestamp: timestamp(),
    }))
}

/// POST /api/predict_base64 - JSON body `{"image": "<base64 or data URL>"}`
pub async fn predict_base64(
    classifier: web::Data<Classifier>,
    body: web::Json<PredictBase64Request>,
) -> Result<HttpResponse, ApiError> {
    let encoded = body
        .into_inner()
        .image
        .filter(|image| !image.trim().is_empty())
        .ok_or(ApiError::MissingImage)?;
    let bytes = decode_image_payload(&encoded)?;

    let model = classifier.clone();
    let prediction = web::block(move || {
        let image = image::load_from_memory(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        model.predict_from_image(&image).map_err(ApiError::from)
    })
    .await??;

    info!(
        "Predicted {} ({:.4}) for inline image",
        prediction.predicted_class, prediction.confidence
    );

    Ok(HttpResponse::Ok().json(PredictResponse {
        success: true,
        prediction,
        filename: None,
        timestamp: timestamp(),
    }))
}

/// Strips an optional `data:<mime>;base64,` prefix and decodes the segment
/// between the first and second commas.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ApiError> {
    let data = payload.split(',').nth(1).unwrap_or(payload);
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64_STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_base64_is_decoded() {
        assert_eq!(decode_image_payload("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        assert_eq!(
            decode_image_payload("data:image/png;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn text_after_second_comma_is_dropped() {
        assert_eq!(
            decode_image_payload("data:image/png;base64,aGVsbG8=,trailing").unwrap(),
            b"hello"
        );
        assert!(matches!(
            decode_image_payload("data:image/png;base64,"),
            Ok(bytes) if bytes.is_empty()
        ));
    }

    #[test]
    fn embedded_line_breaks_are_ignored() {
        assert_eq!(decode_image_payload("aGVs\nbG8=").unwrap(), b"hello");
    }

    #[test]
    fn invalid_base64_is_decode_error() {
        assert!(matches!(
            decode_image_payload("data:image/png;base64,@@@"),
            Err(ApiError::Decode(_))
        ));
    }
}
