use std::collections::HashMap;

use crate::error::AppError;

/// Internal taxonomy for delivery failures. Retryability and severity are
/// static properties of the kind, never of the raw provider code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Provider throttled us; transient.
    RateLimited,
    /// Provider or network temporarily down; transient.
    UpstreamDown,
    /// Destination number cannot receive this message; permanent.
    InvalidRecipient,
    /// Template missing, rejected or paused; permanent.
    TemplateRejected,
    /// Access token expired or account locked; permanent, needs an operator.
    AuthExpired,
    /// Malformed request payload; permanent.
    PayloadInvalid,
    /// Anything we cannot classify; treated as transient.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamDown => "upstream_down",
            ErrorKind::InvalidRecipient => "invalid_recipient",
            ErrorKind::TemplateRejected => "template_rejected",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::PayloadInvalid => "payload_invalid",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Transient kinds are retried; permanent kinds fail on first sight.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::UpstreamDown | ErrorKind::Unknown
        )
    }

    /// Critical failures always produce an audit-log entry in the worker.
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::AuthExpired => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

lazy_static::lazy_static! {
    /// WhatsApp Cloud API error code -> internal kind.
    static ref PROVIDER_CODE_MAP: HashMap<i64, ErrorKind> = {
        let mut m = HashMap::new();
        // Throttling
        m.insert(4, ErrorKind::RateLimited); // app-level API call volume
        m.insert(80007, ErrorKind::RateLimited); // WABA throughput
        m.insert(130429, ErrorKind::RateLimited); // cloud API throughput
        m.insert(131048, ErrorKind::RateLimited); // spam rate limit
        m.insert(131056, ErrorKind::RateLimited); // pair rate limit
        m.insert(368, ErrorKind::RateLimited); // temporarily blocked for policy

        // Upstream availability
        m.insert(1, ErrorKind::UpstreamDown); // unknown API error
        m.insert(2, ErrorKind::UpstreamDown); // service temporarily unavailable
        m.insert(131016, ErrorKind::UpstreamDown); // service overloaded

        // Recipient problems
        m.insert(131026, ErrorKind::InvalidRecipient); // undeliverable
        m.insert(131021, ErrorKind::InvalidRecipient); // sending to self
        m.insert(131047, ErrorKind::InvalidRecipient); // 24h window closed

        // Template problems
        m.insert(132000, ErrorKind::TemplateRejected); // param count mismatch
        m.insert(132001, ErrorKind::TemplateRejected); // template does not exist
        m.insert(132005, ErrorKind::TemplateRejected); // hydrated text too long
        m.insert(132007, ErrorKind::TemplateRejected); // format policy violation
        m.insert(132012, ErrorKind::TemplateRejected); // param format mismatch
        m.insert(132015, ErrorKind::TemplateRejected); // template paused
        m.insert(132016, ErrorKind::TemplateRejected); // template disabled

        // Auth / account
        m.insert(0, ErrorKind::AuthExpired); // auth exception
        m.insert(190, ErrorKind::AuthExpired); // access token expired
        m.insert(131031, ErrorKind::AuthExpired); // account locked
        m.insert(133010, ErrorKind::AuthExpired); // phone not registered

        // Payload problems
        m.insert(100, ErrorKind::PayloadInvalid); // invalid parameter
        m.insert(131008, ErrorKind::PayloadInvalid); // required param missing
        m.insert(131009, ErrorKind::PayloadInvalid); // param value invalid
        m.insert(131051, ErrorKind::PayloadInvalid); // unsupported message type

        m
    };
}

/// Map a raw provider error code to the internal taxonomy.
pub fn classify_provider_code(code: i64) -> ErrorKind {
    PROVIDER_CODE_MAP
        .get(&code)
        .copied()
        .unwrap_or(ErrorKind::Unknown)
}

/// Classify any delivery-path error.
///
/// Transport failures and an open circuit both read as "upstream down": the
/// message stays retryable and gets picked up by a later worker invocation.
pub fn classify(error: &AppError) -> ErrorKind {
    match error {
        AppError::Provider { code, .. } => match code {
            Some(c) => classify_provider_code(*c),
            None => ErrorKind::Unknown,
        },
        AppError::Request(_) => ErrorKind::UpstreamDown,
        AppError::CircuitOpen => ErrorKind::UpstreamDown,
        AppError::RateLimited => ErrorKind::RateLimited,
        AppError::BadRequest(_) | AppError::Validation(_) => ErrorKind::PayloadInvalid,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_taxonomy() {
        assert_eq!(classify_provider_code(130429), ErrorKind::RateLimited);
        assert_eq!(classify_provider_code(131026), ErrorKind::InvalidRecipient);
        assert_eq!(classify_provider_code(132001), ErrorKind::TemplateRejected);
        assert_eq!(classify_provider_code(190), ErrorKind::AuthExpired);
        assert_eq!(classify_provider_code(131016), ErrorKind::UpstreamDown);
        assert_eq!(classify_provider_code(100), ErrorKind::PayloadInvalid);
    }

    #[test]
    fn unknown_codes_stay_retryable() {
        let kind = classify_provider_code(999_999);
        assert_eq!(kind, ErrorKind::Unknown);
        assert!(kind.is_retryable());
    }

    #[test]
    fn retryability_is_static_per_kind() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::UpstreamDown.is_retryable());
        assert!(!ErrorKind::InvalidRecipient.is_retryable());
        assert!(!ErrorKind::TemplateRejected.is_retryable());
        assert!(!ErrorKind::AuthExpired.is_retryable());
        assert!(!ErrorKind::PayloadInvalid.is_retryable());
    }

    #[test]
    fn auth_failures_are_critical() {
        assert_eq!(ErrorKind::AuthExpired.severity(), Severity::Critical);
        assert_eq!(ErrorKind::InvalidRecipient.severity(), Severity::Warning);
    }

    #[test]
    fn transport_errors_classify_as_upstream_down() {
        assert_eq!(classify(&AppError::CircuitOpen), ErrorKind::UpstreamDown);
        assert_eq!(
            classify(&AppError::provider(Some(131026), "undeliverable")),
            ErrorKind::InvalidRecipient
        );
        assert_eq!(
            classify(&AppError::provider(None, "no code")),
            ErrorKind::Unknown
        );
    }
}
