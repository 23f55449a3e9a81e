//! Cart checkout.
//!
//! A checkout is four single-document writes issued in order:
//!
//! ```text
//! Pending -> Priced -> OrderAppended -> HistoryMerged -> CartCleared
//! ```
//!
//! The sequence as a whole is not atomic and nothing is rolled back. Once
//! `OrderAppended` is reached the order stays in the user's history even if a
//! later step fails; that case is reported as
//! [`CartError::PurchaseIncomplete`].
//!
//! Overlapping checkouts for one user are refused through [`CheckoutLeases`].
//! Cart additions are not serialized against a checkout: an item added after
//! the cart snapshot is read is wiped by the clear step without being ordered,
//! and an item added between pricing and the snapshot is shipped but not
//! charged.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info};
use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use crate::deadline::Deadline;
use crate::error::{parse_id, CartError, Result};
use crate::models::{CartItem, Order};
use crate::pricing::PricingAggregator;
use crate::store::{MergeScope, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckoutState {
    Pending,
    Priced,
    OrderAppended,
    HistoryMerged,
    CartCleared,
}

/// Users with a checkout currently running in this process.
#[derive(Clone, Default)]
pub struct CheckoutLeases {
    held: Arc<Mutex<HashSet<ObjectId>>>,
}

impl CheckoutLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for `user_id`, or fails when another checkout holds it.
    /// The lease is returned when the guard drops.
    pub fn acquire(&self, user_id: ObjectId) -> Result<LeaseGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(user_id) {
            return Err(CartError::CheckoutInProgress(user_id));
        }
        Ok(LeaseGuard {
            leases: self.held.clone(),
            user_id,
        })
    }

    pub fn is_held(&self, user_id: ObjectId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id)
    }
}

pub struct LeaseGuard {
    leases: Arc<Mutex<HashSet<ObjectId>>>,
    user_id: ObjectId,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

#[derive(Clone)]
pub struct CheckoutCoordinator {
    users: Arc<dyn UserStore>,
    pricing: PricingAggregator,
    leases: CheckoutLeases,
    merge_scope: MergeScope,
    read_attempts: u32,
}

impl CheckoutCoordinator {
    pub fn new(
        users: Arc<dyn UserStore>,
        leases: CheckoutLeases,
        merge_scope: MergeScope,
        read_attempts: u32,
    ) -> Self {
        CheckoutCoordinator {
            pricing: PricingAggregator::new(users.clone()),
            users,
            leases,
            merge_scope,
            read_attempts,
        }
    }

    /// Turns the user's cart into a cash-on-delivery order and empties the
    /// cart. Returns the order as recorded, with the merged items.
    pub async fn buy_from_cart(&self, deadline: &Deadline, user_id: &str) -> Result<Order> {
        let user_id = parse_id(user_id, "user")?;
        let _lease = self.leases.acquire(user_id)?;
        let mut state = CheckoutState::Pending;
        debug!("user {user_id}: checkout {state:?}");

        let total = self.pricing.total_price(deadline, user_id).await?;
        state = CheckoutState::Priced;
        debug!("user {user_id}: checkout {state:?}, total {total}");

        let mut order = Order::cash_on_delivery(total);
        deadline
            .bound(self.users.append_order(user_id, &order))
            .await
            .map_err(|err| {
                error!("user {user_id}: checkout failed at {state:?}, no order recorded: {err}");
                CartError::from(err)
            })?;
        state = CheckoutState::OrderAppended;
        debug!("user {user_id}: checkout {state:?}, order {}", order.id);

        let items = self
            .merge_cart_into_history(deadline, user_id, order.id)
            .await
            .map_err(|err| incomplete(user_id, order.id, state, err))?;
        state = CheckoutState::HistoryMerged;
        debug!("user {user_id}: checkout {state:?}, {} item(s)", items.len());

        deadline
            .bound(self.users.clear_cart(user_id))
            .await
            .map_err(|err| incomplete(user_id, order.id, state, err.into()))?;
        state = CheckoutState::CartCleared;

        order.order_cart = items;
        info!(
            "user {user_id}: checkout {state:?}, order {} priced {} with {} item(s)",
            order.id,
            order.price,
            order.order_cart.len()
        );
        Ok(order)
    }

    async fn merge_cart_into_history(
        &self,
        deadline: &Deadline,
        user_id: ObjectId,
        order_id: ObjectId,
    ) -> Result<Vec<CartItem>> {
        let items = deadline
            .retry_read(self.read_attempts, || self.users.get_cart_snapshot(user_id))
            .await?;
        deadline
            .bound(
                self.users
                    .merge_order_history(user_id, order_id, &items, self.merge_scope),
            )
            .await?;
        Ok(items)
    }
}

/// Wraps a failure that happened after the order was recorded, so callers
/// can tell it apart from a purchase that wrote nothing.
pub(crate) fn incomplete(
    user_id: ObjectId,
    order_id: ObjectId,
    reached: CheckoutState,
    err: CartError,
) -> CartError {
    error!(
        "user {user_id}: purchase stopped after {reached:?}, order {order_id} already recorded: {err}"
    );
    CartError::PurchaseIncomplete {
        order_id,
        reached,
        source: Box::new(err),
    }
}
