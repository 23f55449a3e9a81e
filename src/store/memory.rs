use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, Bson, DateTime};
use tokio::sync::RwLock;

use super::{MergeScope, ProductCatalog, StoreError, StoreResult, UserStore};
use crate::models::{CartItem, Order, Product, User};

/// In-memory user documents and catalog. Each trait method takes the write
/// lock once, which gives the same single-document atomicity as the real
/// store and nothing more.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<ObjectId, User>>>,
    products: Arc<RwLock<Vec<Product>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a user with empty cart, orders and addresses.
    pub async fn create_user(&self, email: &str) -> ObjectId {
        let now = DateTime::now();
        let user = User {
            id: ObjectId::new(),
            first_name: String::new(),
            last_name: String::new(),
            email: email.to_string(),
            phone: String::new(),
            password: String::new(),
            token: None,
            refresh_token: None,
            created_at: now,
            updated_at: now,
            cart: Vec::new(),
            orders: Vec::new(),
            addresses: Vec::new(),
        };
        let id = user.id;
        self.users.write().await.insert(id, user);
        id
    }

    pub async fn user(&self, user_id: ObjectId) -> Option<User> {
        self.users.read().await.get(&user_id).cloned()
    }

    /// Adds a catalog entry. Duplicate ids are kept side by side.
    pub async fn add_product(&self, product: Product) {
        self.products.write().await.push(product);
    }

    async fn with_user<T>(
        &self,
        user_id: ObjectId,
        apply: impl FnOnce(&mut User) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        apply(user)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryStore {
    async fn lookup(&self, product_id: ObjectId) -> StoreResult<Vec<Product>> {
        let products = self.products.read().await;
        Ok(products
            .iter()
            .filter(|p| p.id == product_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, product: &Product) -> StoreResult<()> {
        self.add_product(product.clone()).await;
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn append_cart_items(&self, user_id: ObjectId, items: &[CartItem]) -> StoreResult<()> {
        self.with_user(user_id, |user| {
            user.cart.extend_from_slice(items);
            Ok(())
        })
        .await
    }

    async fn pull_cart_items_by_product_id(
        &self,
        user_id: ObjectId,
        product_id: ObjectId,
    ) -> StoreResult<()> {
        self.with_user(user_id, |user| {
            user.cart.retain(|item| item.product_id != product_id);
            Ok(())
        })
        .await
    }

    async fn clear_cart(&self, user_id: ObjectId) -> StoreResult<()> {
        self.with_user(user_id, |user| {
            user.cart.clear();
            Ok(())
        })
        .await
    }

    async fn append_order(&self, user_id: ObjectId, order: &Order) -> StoreResult<()> {
        self.with_user(user_id, |user| {
            user.orders.push(order.clone());
            Ok(())
        })
        .await
    }

    async fn merge_order_history(
        &self,
        user_id: ObjectId,
        order_id: ObjectId,
        items: &[CartItem],
        scope: MergeScope,
    ) -> StoreResult<()> {
        self.with_user(user_id, |user| match scope {
            MergeScope::AllOrders => {
                for order in &mut user.orders {
                    order.order_cart.extend_from_slice(items);
                }
                Ok(())
            }
            MergeScope::NewestOrder => {
                let order = user
                    .orders
                    .iter_mut()
                    .find(|o| o.id == order_id)
                    .ok_or(StoreError::OrderNotFound(order_id))?;
                order.order_cart.extend_from_slice(items);
                Ok(())
            }
        })
        .await
    }

    async fn get_cart_snapshot(&self, user_id: ObjectId) -> StoreResult<Vec<CartItem>> {
        let users = self.users.read().await;
        users
            .get(&user_id)
            .map(|user| user.cart.clone())
            .ok_or(StoreError::UserNotFound(user_id))
    }

    async fn cart_price_total(&self, user_id: ObjectId) -> StoreResult<Option<Bson>> {
        let users = self.users.read().await;
        // $unwind drops documents with an empty array, so no group is emitted.
        Ok(users
            .get(&user_id)
            .filter(|user| !user.cart.is_empty())
            .map(|user| Bson::Int64(user.cart.iter().map(|item| item.price).sum())))
    }
}
