use std::sync::Arc;

use log::{error, info, warn};
use mongodb::bson::oid::ObjectId;

use crate::deadline::Deadline;
use crate::error::{parse_id, CartError, Result};
use crate::models::{CartItem, CartView};
use crate::pricing::PricingAggregator;
use crate::store::{ProductCatalog, StoreError, UserStore};

/// Add and remove mutations on the cart embedded in the user document.
#[derive(Clone)]
pub struct CartRepository {
    catalog: Arc<dyn ProductCatalog>,
    users: Arc<dyn UserStore>,
    pricing: PricingAggregator,
    read_attempts: u32,
}

impl CartRepository {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserStore>,
        read_attempts: u32,
    ) -> Self {
        CartRepository {
            catalog,
            pricing: PricingAggregator::new(users.clone()),
            users,
            read_attempts,
        }
    }

    /// Appends a snapshot of every catalog entry matching `product_id` and
    /// returns what was appended. A lookup with no match appends nothing.
    pub async fn add_item(
        &self,
        deadline: &Deadline,
        user_id: &str,
        product_id: &str,
    ) -> Result<Vec<CartItem>> {
        let product_id = parse_id(product_id, "product")?;
        let user_id = parse_id(user_id, "user")?;

        let found = deadline
            .retry_read(self.read_attempts, || self.catalog.lookup(product_id))
            .await
            .map_err(|err| match err {
                StoreError::Timeout(after) => CartError::Timeout(after),
                other => {
                    error!("user {user_id}: catalog lookup for {product_id} failed: {other}");
                    CartError::NotFound(format!("product {product_id}"))
                }
            })?;
        if found.is_empty() {
            warn!("user {user_id}: product {product_id} not in catalog, cart unchanged");
            return Ok(Vec::new());
        }
        if found.len() > 1 {
            warn!(
                "user {user_id}: product id {product_id} matched {} catalog entries, adding all",
                found.len()
            );
        }

        let snapshots: Vec<CartItem> = found.into_iter().map(CartItem::from).collect();
        deadline
            .bound(self.users.append_cart_items(user_id, &snapshots))
            .await?;
        info!("user {user_id}: added {} item(s) for product {product_id}", snapshots.len());
        Ok(snapshots)
    }

    /// Removes every cart entry for `product_id`. Removing an absent product
    /// is a successful no-op.
    pub async fn remove_item(
        &self,
        deadline: &Deadline,
        user_id: &str,
        product_id: &str,
    ) -> Result<()> {
        let product_id = parse_id(product_id, "product")?;
        let user_id = parse_id(user_id, "user")?;

        deadline
            .bound(self.users.pull_cart_items_by_product_id(user_id, product_id))
            .await
            .map_err(|err| match err {
                StoreError::Timeout(after) => CartError::Timeout(after),
                other => CartError::PersistenceFailure(format!(
                    "cannot remove product {product_id} from cart: {other}"
                )),
            })?;
        info!("user {user_id}: removed product {product_id} from cart");
        Ok(())
    }

    /// Current cart contents and their aggregated total.
    pub async fn list_items(&self, deadline: &Deadline, user_id: &str) -> Result<CartView> {
        let user_id = parse_id(user_id, "user")?;
        self.view(deadline, user_id).await
    }

    pub(crate) async fn view(&self, deadline: &Deadline, user_id: ObjectId) -> Result<CartView> {
        let items = deadline
            .retry_read(self.read_attempts, || self.users.get_cart_snapshot(user_id))
            .await?;
        let total = self.pricing.total_price(deadline, user_id).await?;
        Ok(CartView { items, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn product(name: &str, price: i64) -> Product {
        Product {
            id: ObjectId::new(),
            name: name.into(),
            price,
            image: format!("{name}.png"),
            rating: 4,
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, CartRepository, ObjectId) {
        let store = Arc::new(InMemoryStore::new());
        let user = store.create_user("cart@example.com").await;
        let repo = CartRepository::new(store.clone(), store.clone(), 2);
        (store, repo, user)
    }

    #[tokio::test]
    async fn add_item_appends_a_snapshot() {
        let (store, repo, user) = setup().await;
        let p1 = product("p1", 10);
        store.add_product(p1.clone()).await;

        let added = repo
            .add_item(&deadline(), &user.to_hex(), &p1.id.to_hex())
            .await
            .unwrap();
        assert_eq!(added, vec![CartItem::from(p1.clone())]);
        assert_eq!(store.user(user).await.unwrap().cart, added);
    }

    #[tokio::test]
    async fn cart_keeps_price_at_add_time() {
        let (store, repo, user) = setup().await;
        let p1 = product("p1", 10);
        store.add_product(p1.clone()).await;
        repo.add_item(&deadline(), &user.to_hex(), &p1.id.to_hex())
            .await
            .unwrap();

        store.add_product(Product { price: 99, ..p1.clone() }).await;
        let cart = store.user(user).await.unwrap().cart;
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].price, 10);
    }

    #[tokio::test]
    async fn duplicate_catalog_entries_are_all_appended() {
        let (store, repo, user) = setup().await;
        let p1 = product("p1", 10);
        store.add_product(p1.clone()).await;
        store
            .add_product(Product { name: "p1 (dup)".into(), price: 12, ..p1.clone() })
            .await;

        let added = repo
            .add_item(&deadline(), &user.to_hex(), &p1.id.to_hex())
            .await
            .unwrap();
        assert_eq!(added.len(), 2);
        let cart = store.user(user).await.unwrap().cart;
        assert_eq!(cart.len(), 2);
        assert!(cart.iter().all(|item| item.product_id == p1.id));
    }

    #[tokio::test]
    async fn unknown_product_leaves_cart_unchanged() {
        let (store, repo, user) = setup().await;
        let added = repo
            .add_item(&deadline(), &user.to_hex(), &ObjectId::new().to_hex())
            .await
            .unwrap();
        assert!(added.is_empty());
        assert!(store.user(user).await.unwrap().cart.is_empty());
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected() {
        let (_store, repo, user) = setup().await;
        let err = repo
            .add_item(&deadline(), "nope", &ObjectId::new().to_hex())
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::InvalidIdentifier(_)));
        let err = repo
            .remove_item(&deadline(), &user.to_hex(), "zzz")
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn add_for_missing_user_is_not_found() {
        let (store, repo, _user) = setup().await;
        let p1 = product("p1", 10);
        store.add_product(p1.clone()).await;
        let err = repo
            .add_item(&deadline(), &ObjectId::new().to_hex(), &p1.id.to_hex())
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_drops_every_entry_for_the_product() {
        let (store, repo, user) = setup().await;
        let p1 = product("p1", 10);
        let p2 = product("p2", 15);
        store
            .append_cart_items(
                user,
                &[p1.clone().into(), p1.clone().into(), p2.clone().into()],
            )
            .await
            .unwrap();

        repo.remove_item(&deadline(), &user.to_hex(), &p1.id.to_hex())
            .await
            .unwrap();
        assert_eq!(store.user(user).await.unwrap().cart, vec![CartItem::from(p2)]);
    }

    #[tokio::test]
    async fn remove_of_absent_product_is_a_no_op() {
        let (store, repo, user) = setup().await;
        let p2 = product("p2", 15);
        store.append_cart_items(user, &[p2.clone().into()]).await.unwrap();

        repo.remove_item(&deadline(), &user.to_hex(), &ObjectId::new().to_hex())
            .await
            .unwrap();
        assert_eq!(store.user(user).await.unwrap().cart, vec![CartItem::from(p2)]);
    }

    #[tokio::test]
    async fn interleaved_adds_and_removes_only_touch_the_removed_id() {
        let (store, repo, user) = setup().await;
        let products = [product("a", 1), product("b", 2), product("c", 3)];
        for p in &products {
            store.add_product(p.clone()).await;
        }
        let uid = user.to_hex();
        for p in products.iter().chain(products.iter()).chain(products[..1].iter()) {
            repo.add_item(&deadline(), &uid, &p.id.to_hex()).await.unwrap();
        }
        repo.remove_item(&deadline(), &uid, &products[0].id.to_hex())
            .await
            .unwrap();

        let cart = store.user(user).await.unwrap().cart;
        let expected: Vec<CartItem> = [&products[1], &products[2], &products[1], &products[2]]
            .into_iter()
            .cloned()
            .map(CartItem::from)
            .collect();
        assert_eq!(cart, expected);
    }

    #[tokio::test]
    async fn random_add_remove_sequences_match_a_retain_model() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        for seed in 0..32u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (store, repo, user) = setup().await;
            let uid = user.to_hex();
            let products: Vec<Product> = (0..4)
                .map(|i| product(&format!("p{i}"), rng.gen_range(1..50)))
                .collect();
            for p in &products {
                store.add_product(p.clone()).await;
            }

            let mut model: Vec<CartItem> = Vec::new();
            for _ in 0..rng.gen_range(1..40) {
                let p = &products[rng.gen_range(0..products.len())];
                if rng.gen_bool(0.6) {
                    repo.add_item(&deadline(), &uid, &p.id.to_hex()).await.unwrap();
                    model.push(p.clone().into());
                } else {
                    repo.remove_item(&deadline(), &uid, &p.id.to_hex())
                        .await
                        .unwrap();
                    model.retain(|item| item.product_id != p.id);
                }
            }

            assert_eq!(store.user(user).await.unwrap().cart, model, "seed {seed}");
        }
    }

    #[tokio::test]
    async fn list_items_reports_total() {
        let (store, repo, user) = setup().await;
        store
            .append_cart_items(user, &[product("a", 7).into(), product("b", 8).into()])
            .await
            .unwrap();
        let view = repo.list_items(&deadline(), &user.to_hex()).await.unwrap();
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.total, 15);
    }
}
