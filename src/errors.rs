use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by the HTTP layer that embeds this crate.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable code, see [`ServiceError::error_code`]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("Purchase order {order_id} is not editable in status {status}")]
    NotEditable { order_id: Uuid, status: String },

    #[error("Purchase order {0} would be left without lines")]
    EmptyOrder(Uuid),

    #[error(
        "Over-allocation on requisition line {requisition_line_id}: required {required}, processed {processed}, requested {requested}"
    )]
    OverAllocation {
        requisition_line_id: Uuid,
        required: Decimal,
        processed: Decimal,
        requested: Decimal,
    },

    #[error("Invalid quote grouping: {0}")]
    InvalidQuoteGrouping(String),

    #[error(
        "Insufficient stock for material {material_id} at {location_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        material_id: Uuid,
        location_id: Uuid,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Missing exchange rate for currency {0}")]
    MissingExchangeRate(String),

    #[error("No distribution base: {0}")]
    NoDistributionBase(String),

    #[error("Incremental cost order {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("{0} has already been reversed")]
    AlreadyReversed(Uuid),

    #[error("Reversing movement {movement_id} would drive {detail} below zero")]
    WouldGoNegative { movement_id: Uuid, detail: String },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Sequence {0} was created concurrently")]
    SequenceConflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    pub fn not_found(entity: &str, id: Uuid) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    pub fn invalid_transition(
        entity: &str,
        id: Uuid,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        ServiceError::InvalidTransition {
            entity: entity.to_string(),
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether re-running the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification(_) | Self::SequenceConflict(_) => true,
            Self::DatabaseError(DbErr::ConnectionAcquire(_)) | Self::DatabaseError(DbErr::Conn(_)) => {
                true
            }
            _ => false,
        }
    }

    /// Stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotEditable { .. } => "not_editable",
            Self::EmptyOrder(_) => "empty_order",
            Self::OverAllocation { .. } => "over_allocation",
            Self::InvalidQuoteGrouping(_) => "invalid_quote_grouping",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::MissingExchangeRate(_) => "missing_exchange_rate",
            Self::NoDistributionBase(_) => "no_distribution_base",
            Self::AlreadyClosed(_) => "already_closed",
            Self::AlreadyReversed(_) => "already_reversed",
            Self::WouldGoNegative { .. } => "would_go_negative",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::SequenceConflict(_) => "sequence_conflict",
            Self::EventError(_) => "event_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. }
            | Self::NotEditable { .. }
            | Self::AlreadyClosed(_)
            | Self::AlreadyReversed(_)
            | Self::ConcurrentModification(_)
            | Self::SequenceConflict(_) => StatusCode::CONFLICT,
            Self::EmptyOrder(_)
            | Self::OverAllocation { .. }
            | Self::InvalidQuoteGrouping(_)
            | Self::InsufficientStock { .. }
            | Self::MissingExchangeRate(_)
            | Self::NoDistributionBase(_)
            | Self::WouldGoNegative { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal_macros::dec;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(
            ServiceError::not_found("Purchase order", id).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::invalid_transition("Purchase order", id, "Approved", "Approved")
                .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                material_id: id,
                location_id: id,
                available: dec!(1),
                requested: dec!(2),
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::MissingExchangeRate("EUR".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_store_conflicts_are_retryable() {
        assert!(ServiceError::ConcurrentModification(Uuid::new_v4()).is_retryable());
        assert!(ServiceError::SequenceConflict("incremental_cost".into()).is_retryable());
        assert!(!ServiceError::EmptyOrder(Uuid::new_v4()).is_retryable());
        assert!(!ServiceError::DatabaseError(DbErr::Custom("boom".into())).is_retryable());
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("password=secret".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::AlreadyClosed(Uuid::nil()).response_message(),
            format!("Incremental cost order {} is already closed", Uuid::nil())
        );
    }

    #[tokio::test]
    async fn response_body_carries_error_code() {
        let response = ServiceError::NoDistributionBase("all lines are zero".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "no_distribution_base");
        assert_eq!(payload.error, "Unprocessable Entity");
    }
}
