//! API error type and its JSON rendering.
//!
//! Every failure becomes `{error, message, field?, value?}` with a stable
//! upper-case code clients can switch on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serial::SerialError;
use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Serial(e) => match e {
                SerialError::NotOpen | SerialError::AlreadyOpen => StatusCode::CONFLICT,
                SerialError::InvalidAddressFormat(_)
                | SerialError::InvalidValueFormat(_)
                | SerialError::InvalidSize(_)
                | SerialError::InvalidStopBits(_) => StatusCode::BAD_REQUEST,
                SerialError::ResponseTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                SerialError::MalformedResponse(_)
                | SerialError::TruncatedResponse { .. }
                | SerialError::DeviceError(_) => StatusCode::BAD_GATEWAY,
                SerialError::IoError(_) | SerialError::SerialportError(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Store(e) => match e {
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::AddressExists(_)
                | StoreError::InvalidHexFormat { .. }
                | StoreError::InvalidHexCharacters { .. } => StatusCode::BAD_REQUEST,
                StoreError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Serial(e) => match e {
                SerialError::NotOpen => "NOT_OPEN",
                SerialError::AlreadyOpen => "ALREADY_OPEN",
                SerialError::DeviceError(_) => "DEVICE_ERROR",
                SerialError::MalformedResponse(_) => "MALFORMED_RESPONSE",
                SerialError::TruncatedResponse { .. } => "TRUNCATED_RESPONSE",
                SerialError::ResponseTimeout { .. } => "RESPONSE_TIMEOUT",
                SerialError::InvalidAddressFormat(_) => "INVALID_ADDRESS_FORMAT",
                SerialError::InvalidValueFormat(_) => "INVALID_VALUE_FORMAT",
                SerialError::InvalidSize(_) => "INVALID_SIZE",
                SerialError::InvalidStopBits(_) => "INVALID_STOP_BITS",
                SerialError::IoError(_) | SerialError::SerialportError(_) => "IO_ERROR",
            },
            ApiError::Store(e) => match e {
                StoreError::NotFound { entity, .. } if *entity == "Saved register" => {
                    "REGISTER_NOT_FOUND"
                }
                StoreError::NotFound { .. } => "CONFIG_NOT_FOUND",
                StoreError::AddressExists(_) => "ADDRESS_EXISTS",
                StoreError::InvalidHexFormat { .. } => "INVALID_HEX_FORMAT",
                StoreError::InvalidHexCharacters { .. } => "INVALID_HEX_CHARACTERS",
                StoreError::Validation { .. } => "VALIDATION_ERROR",
                StoreError::Database(_) => "INTERNAL_ERROR",
            },
        }
    }

    fn field_and_value(&self) -> (Option<String>, Option<String>) {
        match self {
            ApiError::Store(StoreError::AddressExists(address)) => {
                (Some("address".to_string()), Some(address.clone()))
            }
            ApiError::Store(StoreError::InvalidHexFormat { field, value })
            | ApiError::Store(StoreError::InvalidHexCharacters { field, value }) => {
                (Some(field.to_string()), Some(value.clone()))
            }
            ApiError::Store(StoreError::Validation { field, .. }) => (Some(field.to_string()), None),
            ApiError::Store(StoreError::NotFound { id, .. }) => {
                (Some("id".to_string()), Some(id.to_string()))
            }
            _ => (None, None),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (field, value) = self.field_and_value();
        let message = match self {
            // Internals of database failures stay in the log.
            ApiError::Store(StoreError::Database(_)) => "Internal storage error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.error_code().to_string(),
            message,
            field,
            value,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{} ({}): {}", status, self.error_code(), self);
        } else {
            log::debug!("{} ({}): {}", status, self.error_code(), self);
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(SerialError::NotOpen).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SerialError::InvalidSize(9)).status_code(),
            StatusCode::BAD_REQUEST
        );
        let timeout = SerialError::ResponseTimeout {
            timeout: std::time::Duration::from_secs(1),
            partial: Vec::new(),
        };
        assert_eq!(ApiError::from(timeout).error_code(), "RESPONSE_TIMEOUT");
    }

    #[test]
    fn test_body_carries_field() {
        let err = ApiError::from(StoreError::AddressExists("0x10".into()));
        let body = err.body();
        assert_eq!(body.error, "ADDRESS_EXISTS");
        assert_eq!(body.field.as_deref(), Some("address"));
        assert_eq!(body.value.as_deref(), Some("0x10"));
    }
}
