use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

use crate::{booking::BookingError, coupon::CouponError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("coupon has been redeemed; code, discount and audience can no longer change")]
    CouponLocked,

    #[error("service '{0}' is not currently available")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::CouponLocked => "CouponLocked",
            AppError::ServiceUnavailable(_) => "ServiceUnavailable",
            AppError::Coupon(err) => err.code(),
            AppError::Booking(err) => err.code(),
            AppError::Database(_) | AppError::Internal(_) => "InternalError",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::CouponLocked | AppError::Booking(_) => {
                StatusCode::CONFLICT
            }
            AppError::ServiceUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Coupon(CouponError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Coupon(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Database(err) => {
                log::error!("Database error: {err}");
                "Something went wrong. Please try again.".to_string()
            }
            AppError::Internal(detail) => {
                log::error!("Internal error: {detail}");
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "message": message,
            "code": self.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coupon_not_found_is_404_other_rejections_400() {
        assert_eq!(
            AppError::from(CouponError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(CouponError::Expired).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::from(CouponError::NotEligible).code(), "NotEligible");
    }

    #[test]
    fn database_details_stay_out_of_the_body() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "InternalError");
    }
}
