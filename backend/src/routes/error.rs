use actix_web::http::StatusCode;
use actix_web::{error::BlockingError, HttpResponse, ResponseError};
use shared::ErrorResponse;

use super::timestamp;
use crate::classifier::ClassifierError;
use crate::storage::upload::UploadError;

/// Request-level failures. Each maps to a status code and the JSON error body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("没有上传叶片图片文件")]
    NoFile,
    #[error("没有选择文件")]
    EmptyFilename,
    #[error("不支持的文件格式，请上传植物叶片图片文件（{0}）")]
    UnsupportedFormat(String),
    #[error("上传数据无效: {0}")]
    InvalidUpload(String),
    #[error("没有提供叶片图片数据")]
    MissingImage,
    #[error("叶片图片解码失败: {0}")]
    Decode(String),
    #[error("文件大小超过限制（{0}MB）")]
    PayloadTooLarge(usize),
    #[error("接口不存在")]
    NotFound,
    #[error("病害预测过程中发生错误: {0}")]
    Prediction(String),
    #[error("服务器内部错误")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFile
            | ApiError::EmptyFilename
            | ApiError::UnsupportedFormat(_)
            | ApiError::InvalidUpload(_)
            | ApiError::MissingImage
            | ApiError::Decode(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Prediction(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("Rejected request: {}", self);
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            success: false,
            error: self.to_string(),
            timestamp: timestamp(),
        })
    }
}

impl From<ClassifierError> for ApiError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Decode(e) => ApiError::Decode(e.to_string()),
            other => ApiError::Prediction(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn from_upload(err: UploadError, allowed: &[String], max_mb: usize) -> Self {
        match err {
            UploadError::InvalidFormat => ApiError::UnsupportedFormat(allowed.join(", ")),
            UploadError::FileTooLarge => ApiError::PayloadTooLarge(max_mb),
            UploadError::Io(e) => ApiError::Prediction(e.to_string()),
        }
    }
}

impl From<BlockingError> for ApiError {
    fn from(err: BlockingError) -> Self {
        log::error!("Blocking inference task failed: {}", err);
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_4xx() {
        assert_eq!(ApiError::NoFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::UnsupportedFormat("png".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Decode("bad".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::PayloadTooLarge(16).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn classifier_errors_map_by_kind() {
        let decode = image::ImageError::IoError(std::io::Error::other("truncated"));
        assert!(matches!(
            ApiError::from(ClassifierError::Decode(decode)),
            ApiError::Decode(_)
        ));
        let inference = ApiError::from(ClassifierError::Inference("boom".into()));
        assert_eq!(inference.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(inference.to_string().contains("boom"));
    }

    #[test]
    fn error_message_names_max_size() {
        assert_eq!(ApiError::PayloadTooLarge(16).to_string(), "文件大小超过限制（16MB）");
    }
}
