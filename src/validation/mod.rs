//! Inbound message validation.
//!
//! Every inbound message passes through an ordered [`ValidatorPipeline`]
//! before it reaches dispatch. Validators never raise; they hand back a
//! typed [`Rejection`] that the dispatch layer turns into a JSON-RPC error
//! response while keeping the session open.

pub mod method;
pub mod size;
pub mod throttle;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::protocol::{GatewayError, Message, MethodAllowList};
use crate::session::Session;

pub use method::MethodValidator;
pub use size::SizeValidator;
pub use throttle::{RateLimiterPair, ThrottleDimension, ThrottleValidator, TokenBucket};

/// Maximum request id length in bytes
pub const DEFAULT_MAX_ID_BYTES: usize = 256;

/// Maximum serialized `params` size in bytes (100 KB)
pub const DEFAULT_MAX_PARAMS_BYTES: usize = 100 * 1024;

/// Default requests-per-minute budget for a session
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 600;

/// Default requests-per-second budget for a session
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 60;

/// Reason a message was refused before dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    #[error("request id is {len} bytes, limit is {max}")]
    IdTooLong { len: usize, max: usize },

    #[error("params are {size} bytes, limit is {max}")]
    ParamsTooLarge { size: usize, max: usize },

    #[error("params could not be measured: {0}")]
    MalformedParams(String),

    #[error("{} rate limit exceeded", .dimension.as_str())]
    Throttled {
        dimension: ThrottleDimension,
        retry_after: Duration,
    },
}

impl Rejection {
    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::InvalidMethod(_) => "invalid_method",
            Rejection::IdTooLong { .. } => "id_too_long",
            Rejection::ParamsTooLarge { .. } => "params_too_large",
            Rejection::MalformedParams(_) => "malformed_params",
            Rejection::Throttled {
                dimension: ThrottleDimension::PerSecond,
                ..
            } => "throttled_per_second",
            Rejection::Throttled {
                dimension: ThrottleDimension::PerMinute,
                ..
            } => "throttled_per_minute",
        }
    }
}

impl From<Rejection> for GatewayError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::InvalidMethod(method) => GatewayError::MethodNotFound(method),
            Rejection::Throttled {
                dimension,
                retry_after,
            } => GatewayError::RateLimited {
                dimension: dimension.as_str(),
                retry_after_ms: retry_after.as_millis().max(1) as u64,
            },
            other => GatewayError::InvalidRequest(other.to_string()),
        }
    }
}

/// A single check applied to inbound messages.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, session: &Session, message: &Message) -> Result<(), Rejection>;
}

/// Limits consumed by the standard validator chain.
#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub allow_list: Arc<MethodAllowList>,
    pub max_id_bytes: usize,
    pub max_params_bytes: usize,
    pub default_requests_per_minute: u32,
    pub default_requests_per_second: u32,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            allow_list: Arc::new(MethodAllowList::standard()),
            max_id_bytes: DEFAULT_MAX_ID_BYTES,
            max_params_bytes: DEFAULT_MAX_PARAMS_BYTES,
            default_requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            default_requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
        }
    }
}

/// Ordered list of validators; the first rejection wins.
#[derive(Default)]
pub struct ValidatorPipeline {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method, then size, then throttling.
    pub fn standard(settings: &ValidationSettings) -> Self {
        Self::new()
            .with(MethodValidator::new(settings.allow_list.clone()))
            .with(SizeValidator::new(
                settings.max_id_bytes,
                settings.max_params_bytes,
            ))
            .with(ThrottleValidator::new(
                settings.default_requests_per_minute,
                settings.default_requests_per_second,
            ))
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn validate(&self, session: &Session, message: &Message) -> Result<(), Rejection> {
        for validator in &self.validators {
            if let Err(rejection) = validator.validate(session, message) {
                debug!(
                    "Session {} message {:?} rejected by {}: {}",
                    session.id(),
                    message.id,
                    validator.name(),
                    rejection
                );
                return Err(rejection);
            }
        }
        Ok(())
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionKind, SessionParams};

    fn test_session() -> Session {
        Session::detached("test-owner", SessionKind::Server, SessionParams::default())
    }

    struct RejectAll;

    impl Validator for RejectAll {
        fn name(&self) -> &'static str {
            "reject_all"
        }

        fn validate(&self, _session: &Session, message: &Message) -> Result<(), Rejection> {
            Err(Rejection::InvalidMethod(message.method_name().to_string()))
        }
    }

    #[test]
    fn test_standard_pipeline_order() {
        let pipeline = ValidatorPipeline::standard(&ValidationSettings::default());
        assert_eq!(pipeline.validator_names(), vec!["method", "size", "throttle"]);
    }

    #[test]
    fn test_empty_pipeline_accepts_everything() {
        let session = test_session();
        let pipeline = ValidatorPipeline::new();
        assert!(pipeline
            .validate(&session, &Message::request("1", "anything", None))
            .is_ok());
    }

    #[test]
    fn test_first_rejection_wins() {
        let session = test_session();
        let pipeline = ValidatorPipeline::standard(&ValidationSettings::default()).with(RejectAll);
        let message = Message::request("x".repeat(300), "tools/list", None);
        let rejection = pipeline.validate(&session, &message).unwrap_err();
        assert!(matches!(rejection, Rejection::IdTooLong { len: 300, max: 256 }));
    }

    #[test]
    fn test_rejection_maps_to_protocol_errors() {
        let err: GatewayError = Rejection::InvalidMethod("bogus".to_string()).into();
        assert_eq!(err.code(), -32601);
        assert!(err.message().contains("bogus"));

        let err: GatewayError = Rejection::ParamsTooLarge {
            size: 200_000,
            max: 102_400,
        }
        .into();
        assert_eq!(err.code(), -32600);

        let err: GatewayError = Rejection::Throttled {
            dimension: ThrottleDimension::PerMinute,
            retry_after: Duration::from_millis(250),
        }
        .into();
        assert_eq!(
            err,
            GatewayError::RateLimited {
                dimension: "per-minute",
                retry_after_ms: 250
            }
        );
    }

    #[test]
    fn test_rejection_reason_labels() {
        assert_eq!(
            Rejection::Throttled {
                dimension: ThrottleDimension::PerSecond,
                retry_after: Duration::ZERO
            }
            .reason(),
            "throttled_per_second"
        );
        assert_eq!(
            Rejection::IdTooLong { len: 1, max: 0 }.reason(),
            "id_too_long"
        );
    }
}
