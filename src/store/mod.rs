//! Persistence seams for the cart engine.
//!
//! Every method on [`UserStore`] is a single write or read against one user
//! document, and the document store guarantees each of those is atomic and
//! isolated. Nothing here spans more than one call; multi-step sequences are
//! composed (non-atomically) by the coordinators.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::Bson;
use thiserror::Error;

use crate::models::{CartItem, Order, Product};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::{MongoProductCatalog, MongoUserStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("failed to encode document: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    #[error("user {0} not found")]
    UserNotFound(ObjectId),

    #[error("order {0} not found")]
    OrderNotFound(ObjectId),

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
}

impl StoreError {
    /// Whether repeating the same idempotent read could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Mongo(_) | StoreError::Backend(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which orders receive the post-purchase item merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeScope {
    /// Only the order just appended, addressed by its id.
    NewestOrder,
    /// Every order the user has, including historical ones.
    #[default]
    AllOrders,
}

impl FromStr for MergeScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest_order" | "newest" => Ok(MergeScope::NewestOrder),
            "all_orders" | "all" => Ok(MergeScope::AllOrders),
            other => Err(format!("unknown merge scope {other:?}")),
        }
    }
}

impl fmt::Display for MergeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeScope::NewestOrder => write!(f, "newest_order"),
            MergeScope::AllOrders => write!(f, "all_orders"),
        }
    }
}

/// Read-only product lookup.
///
/// Identifiers are unique in production data, but a lookup returns every
/// matching snapshot so duplicated ids never break callers.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn lookup(&self, product_id: ObjectId) -> StoreResult<Vec<Product>>;

    async fn insert(&self, product: &Product) -> StoreResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `$push` all items onto the cart in one write.
    async fn append_cart_items(&self, user_id: ObjectId, items: &[CartItem]) -> StoreResult<()>;

    /// `$pull` every cart entry whose product id matches. Succeeds when
    /// nothing matched.
    async fn pull_cart_items_by_product_id(
        &self,
        user_id: ObjectId,
        product_id: ObjectId,
    ) -> StoreResult<()>;

    async fn clear_cart(&self, user_id: ObjectId) -> StoreResult<()>;

    async fn append_order(&self, user_id: ObjectId, order: &Order) -> StoreResult<()>;

    /// Appends `items` to the `order_cart` of the orders selected by `scope`.
    /// `order_id` identifies the newest order for [`MergeScope::NewestOrder`].
    async fn merge_order_history(
        &self,
        user_id: ObjectId,
        order_id: ObjectId,
        items: &[CartItem],
        scope: MergeScope,
    ) -> StoreResult<()>;

    async fn get_cart_snapshot(&self, user_id: ObjectId) -> StoreResult<Vec<CartItem>>;

    /// Raw `total` of the cart price aggregation, or `None` when the
    /// aggregation produced no group (empty cart). The value is returned
    /// unconverted; callers check its numeric type.
    async fn cart_price_total(&self, user_id: ObjectId) -> StoreResult<Option<Bson>>;
}
