//! Domain error types
//!
//! `EngineError` covers the semantic error kinds the core distinguishes between;
//! application edges (CLI, trading loop `run`) wrap these in `anyhow::Result`
//! with `.context(...)` for human-readable breadcrumbs.

use thiserror::Error;

use crate::oms::types::{OrderId, OrderStatus};

/// Domain-level error kinds.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed for {what}: {reason}")]
    Validation { what: String, reason: String },

    #[error("insufficient funds: need {required}, have {available} {currency}")]
    InsufficientFunds {
        currency: String,
        required: String,
        available: String,
    },

    #[error("exchange rejected order parameters: {reason}")]
    InvalidOrder { reason: String },

    #[error("order {order_id:?} not found on exchange")]
    OrderNotFound { order_id: Option<OrderId> },

    #[error("transient exchange error: {reason}")]
    Transient { reason: String },

    #[error("precision error: {reason}")]
    Precision { reason: String },

    #[error("state invariant breach: {reason}")]
    StateInvariantBreach { reason: String },

    #[error("order {order_id} is in state {status:?}, expected a different state for this operation")]
    InvalidOrderState {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the retry loop in the Order Service (§4.5) should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient { .. })
    }

    /// Whether an exchange rejection is fatal after the first attempt (§4.5, §7).
    pub fn is_fatal_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientFunds { .. } | EngineError::InvalidOrder { .. }
        )
    }

    pub fn validation(what: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn precision(reason: impl Into<String>) -> Self {
        EngineError::Precision {
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
