use reqwest::StatusCode;

/// Coarse failure classes shared by every remote client in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    Quota,
    Transient,
    NotFound,
    Permanent,
}

const QUOTA_MARKERS: [&str; 4] = [
    "RESOURCE_EXHAUSTED",
    "Quota exceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

pub(crate) fn mentions_quota(body: &str) -> bool {
    QUOTA_MARKERS.iter().any(|marker| body.contains(marker))
}

pub(crate) fn classify_api_status(status: StatusCode, body: &str) -> ApiErrorClass {
    if status == StatusCode::TOO_MANY_REQUESTS || mentions_quota(body) {
        ApiErrorClass::Quota
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

pub(crate) fn classify_request_error(err: &reqwest::Error) -> ApiErrorClass {
    if let Some(status) = err.status() {
        return classify_api_status(status, "");
    }
    if err.is_decode() || err.is_builder() {
        ApiErrorClass::Permanent
    } else {
        ApiErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_requests_is_quota() {
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiErrorClass::Quota
        );
    }

    #[test]
    fn forbidden_with_rate_limit_reason_is_quota() {
        let body = r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#;
        assert_eq!(
            classify_api_status(StatusCode::FORBIDDEN, body),
            ApiErrorClass::Quota
        );
        assert_eq!(
            classify_api_status(StatusCode::FORBIDDEN, "denied"),
            ApiErrorClass::Auth
        );
    }

    #[test]
    fn server_errors_are_transient_and_bad_requests_permanent() {
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY, ""),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND, ""),
            ApiErrorClass::NotFound
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_REQUEST, ""),
            ApiErrorClass::Permanent
        );
    }
}
