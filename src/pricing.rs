use std::sync::Arc;

use log::{debug, error};
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};

use crate::deadline::Deadline;
use crate::error::{CartError, Result};
use crate::store::UserStore;

/// `$match` the user, expand the cart into one document per item and sum the
/// item prices per user.
pub fn cart_total_pipeline(user_id: ObjectId) -> Vec<Document> {
    vec![
        doc! { "$match": { "_id": user_id } },
        doc! { "$unwind": { "path": "$cart" } },
        doc! { "$group": { "_id": "$_id", "total": { "$sum": "$cart.price" } } },
    ]
}

/// Converts the aggregation's `total` into an integer price. Only integral
/// BSON types are accepted.
pub fn total_from_bson(value: Option<Bson>) -> Result<i64> {
    match value {
        None => Ok(0),
        Some(Bson::Int32(total)) => Ok(i64::from(total)),
        Some(Bson::Int64(total)) => Ok(total),
        Some(other) => Err(CartError::ValidationFailure(format!(
            "cart total has type {:?}, expected an integer",
            other.element_type()
        ))),
    }
}

#[derive(Clone)]
pub struct PricingAggregator {
    users: Arc<dyn UserStore>,
}

impl PricingAggregator {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        PricingAggregator { users }
    }

    pub async fn total_price(&self, deadline: &Deadline, user_id: ObjectId) -> Result<i64> {
        let raw = deadline.bound(self.users.cart_price_total(user_id)).await?;
        let total = total_from_bson(raw).map_err(|err| {
            error!("user {user_id}: cart aggregation returned unusable total: {err}");
            err
        })?;
        debug!("user {user_id}: cart total {total}");
        Ok(total)
    }
}
