use crate::error::{ErrorKind, MatchError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// 接口错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// 将 [`MatchError`] 映射为 HTTP 响应
#[derive(Debug)]
pub struct ApiError(pub MatchError);

impl From<MatchError> for ApiError {
    fn from(e: MatchError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(MatchError::InvalidRequest(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MatchError::DocumentNotFound { .. } | MatchError::MatchNotFound(_) => StatusCode::NOT_FOUND,
            MatchError::ConcurrentMatchExists { .. }
            | MatchError::InvalidTransition { .. }
            | MatchError::MatchSuperseded(_)
            | MatchError::CannotUnmatchResolved(_) => StatusCode::CONFLICT,
            MatchError::NoCandidateFound(_)
            | MatchError::CandidateStale(_)
            | MatchError::CurrencyMismatch { .. }
            | MatchError::MissingField { .. }
            | MatchError::DocumentNotOpen { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            e => match e.kind() {
                ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // 内部细节只写日志
            tracing::error!("request failed: {:?}", self.0);
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorResponse {
            error: self.0.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchStatus;
    use uuid::Uuid;

    #[test]
    fn statuses_follow_error_kind() {
        let id = Uuid::new_v4();
        let cases = [
            (MatchError::InvalidPolicy("x".into()), StatusCode::BAD_REQUEST),
            (MatchError::MatchNotFound(id), StatusCode::NOT_FOUND),
            (
                MatchError::ConcurrentMatchExists { order_id: id, invoice_id: id },
                StatusCode::CONFLICT,
            ),
            (
                MatchError::InvalidTransition {
                    from: MatchStatus::Resolved,
                    to: MatchStatus::Resolved,
                },
                StatusCode::CONFLICT,
            ),
            (MatchError::NoCandidateFound(id), StatusCode::UNPROCESSABLE_ENTITY),
            (MatchError::CandidateStale(id), StatusCode::UNPROCESSABLE_ENTITY),
            (MatchError::Timeout("get_match"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }
}
