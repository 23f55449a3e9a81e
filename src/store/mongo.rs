use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::options::FindOneOptions;
use mongodb::{Collection, Database};
use serde::Deserialize;

use super::{MergeScope, ProductCatalog, StoreError, StoreResult, UserStore};
use crate::models::{CartItem, Order, Product, User};
use crate::pricing::cart_total_pipeline;

pub const USERS_COLLECTION: &str = "Users";
pub const PRODUCTS_COLLECTION: &str = "Products";

#[derive(Deserialize)]
struct CartOnly {
    #[serde(default)]
    cart: Vec<CartItem>,
}

#[derive(Clone)]
pub struct MongoUserStore {
    users: Collection<User>,
}

impl MongoUserStore {
    pub fn new(db: &Database) -> Self {
        MongoUserStore {
            users: db.collection(USERS_COLLECTION),
        }
    }

    pub fn collection(&self) -> &Collection<User> {
        &self.users
    }

    async fn update_user(&self, user_id: ObjectId, update: Document) -> StoreResult<()> {
        let result = self
            .users
            .update_one(doc! { "_id": user_id }, update, None)
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn append_cart_items(&self, user_id: ObjectId, items: &[CartItem]) -> StoreResult<()> {
        let items = bson::to_bson(items)?;
        self.update_user(user_id, doc! { "$push": { "cart": { "$each": items } } })
            .await
    }

    async fn pull_cart_items_by_product_id(
        &self,
        user_id: ObjectId,
        product_id: ObjectId,
    ) -> StoreResult<()> {
        self.update_user(user_id, doc! { "$pull": { "cart": { "_id": product_id } } })
            .await
    }

    async fn clear_cart(&self, user_id: ObjectId) -> StoreResult<()> {
        self.update_user(user_id, doc! { "$set": { "cart": [] } }).await
    }

    async fn append_order(&self, user_id: ObjectId, order: &Order) -> StoreResult<()> {
        let order = bson::to_bson(order)?;
        self.update_user(user_id, doc! { "$push": { "orders": order } })
            .await
    }

    async fn merge_order_history(
        &self,
        user_id: ObjectId,
        order_id: ObjectId,
        items: &[CartItem],
        scope: MergeScope,
    ) -> StoreResult<()> {
        let items = bson::to_bson(items)?;
        match scope {
            MergeScope::AllOrders => {
                self.update_user(
                    user_id,
                    doc! { "$push": { "orders.$[].order_cart": { "$each": items } } },
                )
                .await
            }
            MergeScope::NewestOrder => {
                let result = self
                    .users
                    .update_one(
                        doc! { "_id": user_id, "orders._id": order_id },
                        doc! { "$push": { "orders.$.order_cart": { "$each": items } } },
                        None,
                    )
                    .await?;
                if result.matched_count == 0 {
                    return Err(StoreError::OrderNotFound(order_id));
                }
                Ok(())
            }
        }
    }

    async fn get_cart_snapshot(&self, user_id: ObjectId) -> StoreResult<Vec<CartItem>> {
        let options = FindOneOptions::builder()
            .projection(doc! { "cart": 1 })
            .build();
        self.users
            .clone_with_type::<CartOnly>()
            .find_one(doc! { "_id": user_id }, options)
            .await?
            .map(|found| found.cart)
            .ok_or(StoreError::UserNotFound(user_id))
    }

    async fn cart_price_total(&self, user_id: ObjectId) -> StoreResult<Option<Bson>> {
        let cursor = self
            .users
            .aggregate(cart_total_pipeline(user_id), None)
            .await?;
        let groups: Vec<Document> = cursor.try_collect().await?;
        Ok(groups
            .into_iter()
            .next()
            .and_then(|group| group.get("total").cloned()))
    }
}

#[derive(Clone)]
pub struct MongoProductCatalog {
    products: Collection<Product>,
}

impl MongoProductCatalog {
    pub fn new(db: &Database) -> Self {
        MongoProductCatalog {
            products: db.collection(PRODUCTS_COLLECTION),
        }
    }
}

#[async_trait]
impl ProductCatalog for MongoProductCatalog {
    async fn lookup(&self, product_id: ObjectId) -> StoreResult<Vec<Product>> {
        let cursor = self.products.find(doc! { "_id": product_id }, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert(&self, product: &Product) -> StoreResult<()> {
        self.products.insert_one(product, None).await?;
        Ok(())
    }
}
