//! HTTP responses for guard rejections.
//!
//! Boundary rejections deliberately share one response shape: the OAuth
//! error code from [`AuthError::oauth_error_code`] and a fixed description.
//! The specific failing check (signature, freshness, fingerprint, replay)
//! is visible only in the server-side logs.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use crate::error::AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        if self.is_security_signal() {
            error!(category = %self.category(), "request rejected: {self}");
        } else if self.is_server_error() {
            error!(category = %self.category(), "request failed: {self}");
        } else {
            warn!(category = %self.category(), "request rejected");
        }

        let body = json!({
            "error": self.oauth_error_code(),
            "error_description": "The request could not be processed.",
        });
        (status, Json(body)).into_response()
    }
}

fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidClient { .. } => StatusCode::UNAUTHORIZED,
        _ if error.is_rejection() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_rejections_share_one_body() {
        for error in [
            AuthError::verification_failed("bad header"),
            AuthError::FreshnessMissing,
            AuthError::FreshnessStale,
            AuthError::FingerprintMismatch,
        ] {
            let response = error.into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let json = body_json(response).await;
            assert_eq!(json["error"], "invalid_request");
            assert_eq!(
                json["error_description"],
                "The request could not be processed."
            );
        }
    }

    #[tokio::test]
    async fn test_replay_is_a_grant_error() {
        let response = AuthError::ConsumedCodeReplay.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_invalid_client_is_unauthorized() {
        let response = AuthError::invalid_client("unknown").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_server_faults_are_500_without_detail() {
        let response = AuthError::storage("pool exhausted").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "server_error");
        assert!(
            !json["error_description"]
                .as_str()
                .unwrap()
                .contains("pool")
        );
    }
}
