use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use mongodb::bson::oid::ObjectId;
use serde_json::json;
use thiserror::Error;

use crate::checkout::CheckoutState;
use crate::store::StoreError;

/// Errors surfaced by the cart and checkout operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("a checkout is already in progress for user {0}")]
    CheckoutInProgress(ObjectId),

    /// An order was already recorded but a later checkout step failed.
    #[error("cannot update the purchase: order {order_id} recorded, stopped at {reached:?}: {source}")]
    PurchaseIncomplete {
        order_id: ObjectId,
        reached: CheckoutState,
        #[source]
        source: Box<CartError>,
    },
}

pub type Result<T> = std::result::Result<T, CartError>;

impl From<StoreError> for CartError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(after) => CartError::Timeout(after),
            StoreError::UserNotFound(id) => CartError::NotFound(format!("user {id}")),
            StoreError::OrderNotFound(id) => CartError::NotFound(format!("order {id}")),
            other => CartError::PersistenceFailure(other.to_string()),
        }
    }
}

pub fn parse_id(raw: &str, what: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw.trim())
        .map_err(|_| CartError::InvalidIdentifier(format!("{what} id {raw:?} is not a valid object id")))
}

impl ResponseError for CartError {
    fn status_code(&self) -> StatusCode {
        match self {
            CartError::NotFound(_) => StatusCode::NOT_FOUND,
            CartError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            CartError::CheckoutInProgress(_) => StatusCode::CONFLICT,
            CartError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CartError::ValidationFailure(_)
            | CartError::PersistenceFailure(_)
            | CartError::PurchaseIncomplete { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(json!({ "error": self.public_message() }))
    }
}

impl CartError {
    /// Message safe to hand to a client. Store and backend detail stays in
    /// the log; an incomplete purchase still names the recorded order.
    pub fn public_message(&self) -> String {
        match self {
            CartError::PersistenceFailure(detail) | CartError::ValidationFailure(detail) => {
                error!("request failed: {detail}");
                "internal error".to_string()
            }
            CartError::PurchaseIncomplete {
                order_id, reached, ..
            } => {
                error!("request failed: {self}");
                format!("cannot update the purchase: order {order_id} recorded, stopped at {reached:?}")
            }
            other => other.to_string(),
        }
    }
}
