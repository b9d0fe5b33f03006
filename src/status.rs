//! Status and reason codes reported by the security service.
//!
//! Every open/update response carries a result context made of a status
//! class, a reason within that class and an opaque business status. Only a
//! handful of (class, reason) pairs describe transient conditions worth
//! another attempt.
use serde_json::Value;

/// The call succeeded.
pub const SUCCESS: i32 = 0;
/// DRM (license) failure class.
pub const DRM_FAILURE: i32 = 200;
/// Watermark failure class.
pub const WATERMARK_FAILURE: i32 = 300;

/// Unspecified failure.
pub const GENERAL_FAILURE: i32 = 1;
/// The service did not answer in time.
pub const SERVICE_TIMEOUT: i32 = 3;
/// The service could not be reached.
pub const SERVICE_CONNECTION_FAILURE: i32 = 4;
/// The service is busy serving other clients.
pub const SERVICE_BUSY: i32 = 5;
/// The access token presented has expired.
pub const ACCESS_TOKEN_EXPIRED: i32 = 8;
/// The account is not entitled to the content.
pub const ENTITLEMENT_FAILURE: i32 = 9;

/// Returns true when a failed attempt with these codes may be repeated.
#[must_use]
pub fn is_retryable(status_code: i32, reason_code: i32) -> bool {
    matches!(status_code, DRM_FAILURE | WATERMARK_FAILURE)
        && matches!(
            reason_code,
            SERVICE_TIMEOUT | SERVICE_CONNECTION_FAILURE | SERVICE_BUSY
        )
}

/// Codes extracted from a response's `resultContext` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultContext {
    pub status_code: i32,
    pub reason_code: i32,
    pub business_status: i32,
}

impl ResultContext {
    /// Generic DRM failure, used when no response codes are available.
    pub const GENERAL: Self = Self {
        status_code: DRM_FAILURE,
        reason_code: GENERAL_FAILURE,
        business_status: 0,
    };

    /// The call never produced a response.
    pub const NO_RESPONSE: Self = Self {
        status_code: DRM_FAILURE,
        reason_code: SERVICE_CONNECTION_FAILURE,
        business_status: 0,
    };

    /// Codes of a successful call.
    pub const OK: Self = Self {
        status_code: SUCCESS,
        reason_code: SUCCESS,
        business_status: 0,
    };

    /// Read `result.resultContext.{class,reason,businessStatus}`.
    ///
    /// Missing fields default to the generic failure codes so that a
    /// malformed response is never mistaken for success.
    #[must_use]
    pub fn from_result(result: &Value) -> Self {
        Self::from_result_or(result, Self::GENERAL)
    }

    /// Like [`from_result`](Self::from_result), taking missing fields from
    /// `default`.
    #[must_use]
    pub fn from_result_or(result: &Value, default: Self) -> Self {
        let context = &result["resultContext"];
        let field = |name: &str, default: i32| {
            context[name]
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(default)
        };
        Self {
            status_code: field("class", default.status_code),
            reason_code: field("reason", default.reason_code),
            business_status: field("businessStatus", default.business_status),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        is_retryable(self.status_code, self.reason_code)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn whitelist_requires_class_and_reason() {
        for reason in [SERVICE_TIMEOUT, SERVICE_CONNECTION_FAILURE, SERVICE_BUSY] {
            assert!(is_retryable(DRM_FAILURE, reason));
            assert!(is_retryable(WATERMARK_FAILURE, reason));
            assert!(!is_retryable(SUCCESS, reason));
        }
        assert!(!is_retryable(DRM_FAILURE, GENERAL_FAILURE));
        assert!(!is_retryable(DRM_FAILURE, ACCESS_TOKEN_EXPIRED));
        assert!(!is_retryable(DRM_FAILURE, ENTITLEMENT_FAILURE));
        assert!(!is_retryable(100, SERVICE_BUSY));
    }

    #[test]
    fn result_context_reads_codes() {
        let result = json!({
            "success": false,
            "resultContext": { "class": 300, "reason": 5, "businessStatus": 12 }
        });
        let context = ResultContext::from_result(&result);
        assert_eq!(context.status_code, WATERMARK_FAILURE);
        assert_eq!(context.reason_code, SERVICE_BUSY);
        assert_eq!(context.business_status, 12);
        assert!(context.is_retryable());
    }

    #[test]
    fn missing_result_context_is_general_failure() {
        let context = ResultContext::from_result(&json!({ "success": false }));
        assert_eq!(context, ResultContext::GENERAL);
        let context = ResultContext::from_result_or(&json!({ "success": true }), ResultContext::OK);
        assert_eq!(context, ResultContext::OK);
    }
}
