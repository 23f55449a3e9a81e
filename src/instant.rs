use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{error, info, warn};
use mongodb::bson::oid::ObjectId;

use crate::checkout::{incomplete, CheckoutState};
use crate::deadline::Deadline;
use crate::error::{parse_id, CartError, Result};
use crate::models::{CartItem, Order};
use crate::store::{MergeScope, ProductCatalog, StoreError, UserStore};

/// What instant purchase does when the catalog cannot produce the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingProductPolicy {
    /// Refuse the purchase with `NotFound`.
    #[default]
    FailFast,
    /// Log and record a zero-priced order for the requested id.
    ZeroValue,
}

impl FromStr for MissingProductPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "strict" => Ok(MissingProductPolicy::FailFast),
            "zero_value" | "lenient" => Ok(MissingProductPolicy::ZeroValue),
            other => Err(format!("unknown missing product policy {other:?}")),
        }
    }
}

impl fmt::Display for MissingProductPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingProductPolicy::FailFast => write!(f, "fail_fast"),
            MissingProductPolicy::ZeroValue => write!(f, "zero_value"),
        }
    }
}

/// Single-product purchase that never reads or writes the cart.
#[derive(Clone)]
pub struct InstantPurchaseCoordinator {
    catalog: Arc<dyn ProductCatalog>,
    users: Arc<dyn UserStore>,
    merge_scope: MergeScope,
    missing_product: MissingProductPolicy,
    read_attempts: u32,
}

impl InstantPurchaseCoordinator {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserStore>,
        merge_scope: MergeScope,
        missing_product: MissingProductPolicy,
        read_attempts: u32,
    ) -> Self {
        InstantPurchaseCoordinator {
            catalog,
            users,
            merge_scope,
            missing_product,
            read_attempts,
        }
    }

    pub async fn buy_now(
        &self,
        deadline: &Deadline,
        user_id: &str,
        product_id: &str,
    ) -> Result<Order> {
        let product_id = parse_id(product_id, "product")?;
        let user_id = parse_id(user_id, "user")?;

        let snapshot = self.product_snapshot(deadline, user_id, product_id).await?;
        let mut order = Order::cash_on_delivery(snapshot.price);
        deadline
            .bound(self.users.append_order(user_id, &order))
            .await
            .map_err(|err| {
                error!("user {user_id}: instant buy of {product_id} failed, no order recorded: {err}");
                CartError::from(err)
            })?;

        let merged = std::slice::from_ref(&snapshot);
        deadline
            .bound(
                self.users
                    .merge_order_history(user_id, order.id, merged, self.merge_scope),
            )
            .await
            .map_err(|err| incomplete(user_id, order.id, CheckoutState::OrderAppended, err.into()))?;

        order.order_cart.push(snapshot);
        info!(
            "user {user_id}: instant buy of {product_id}, order {} priced {}",
            order.id, order.price
        );
        Ok(order)
    }

    async fn product_snapshot(
        &self,
        deadline: &Deadline,
        user_id: ObjectId,
        product_id: ObjectId,
    ) -> Result<CartItem> {
        let lookup = deadline
            .retry_read(self.read_attempts, || self.catalog.lookup(product_id))
            .await;
        let failure = match lookup {
            Ok(found) => match found.into_iter().next() {
                Some(product) => return Ok(product.into()),
                None => format!("product {product_id} not in catalog"),
            },
            Err(StoreError::Timeout(after)) => return Err(CartError::Timeout(after)),
            Err(err) => format!("catalog lookup for {product_id} failed: {err}"),
        };

        match self.missing_product {
            MissingProductPolicy::FailFast => {
                warn!("user {user_id}: instant buy refused, {failure}");
                Err(CartError::NotFound(format!("product {product_id}")))
            }
            MissingProductPolicy::ZeroValue => {
                warn!("user {user_id}: {failure}, continuing with a zero-value product");
                Ok(CartItem::zero_value(product_id))
            }
        }
    }
}
