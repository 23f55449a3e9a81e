use std::sync::Arc;
use std::time::Duration;

use actix_web::error::ErrorUnauthorized;
use actix_web::{web, Error, HttpMessage, HttpRequest, HttpResponse};
use log::{error, info, warn};
use mongodb::bson::oid::ObjectId;
use mongodb::Collection;
use serde_json::json;

use crate::accounts::{self, AccountError};
use crate::cart::CartRepository;
use crate::checkout::CheckoutCoordinator;
use crate::deadline::Deadline;
use crate::error::CartError;
use crate::instant::InstantPurchaseCoordinator;
use crate::middleware::AuthenticatedUser;
use crate::models::{self, AuthResponse, Product};
use crate::store::ProductCatalog;

/// Shared by every worker. Components only hold handles to the store.
#[derive(Clone)]
pub struct AppState {
    pub cart: CartRepository,
    pub checkout: CheckoutCoordinator,
    pub instant: InstantPurchaseCoordinator,
    pub catalog: Arc<dyn ProductCatalog>,
    pub operation_timeout: Duration,
}

impl AppState {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }
}

#[derive(Clone)]
pub struct AccountState {
    pub users: Collection<models::User>,
    pub jwt_secret: String,
}

fn current_user(req: &HttpRequest) -> Result<String, Error> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone())
        .ok_or_else(|| ErrorUnauthorized("Login required"))
}

async fn add_to_cart(
    state: web::Data<AppState>,
    product_id: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    let user_id = current_user(&req)?;
    let deadline = state.deadline();
    let added = state.cart.add_item(&deadline, &user_id, &product_id).await?;
    Ok(cart_after_write(&state, &deadline, &user_id, json!({ "added": added })).await)
}

async fn remove_from_cart(
    state: web::Data<AppState>,
    product_id: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    let user_id = current_user(&req)?;
    let deadline = state.deadline();
    state
        .cart
        .remove_item(&deadline, &user_id, &product_id)
        .await?;
    let removed = json!({ "removed": product_id.as_str() });
    Ok(cart_after_write(&state, &deadline, &user_id, removed).await)
}

/// Responds with the cart as it stands after a committed write. If it cannot
/// be read back, the write's own result is returned so the client does not
/// repeat a mutation that already went through.
async fn cart_after_write(
    state: &AppState,
    deadline: &Deadline,
    user_id: &str,
    committed: serde_json::Value,
) -> HttpResponse {
    match state.cart.list_items(deadline, user_id).await {
        Ok(cart) => HttpResponse::Ok().json(cart),
        Err(err) => {
            warn!("user {user_id}: cart write committed but reading the cart back failed: {err}");
            HttpResponse::Ok().json(committed)
        }
    }
}

async fn list_cart(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let user_id = current_user(&req)?;
    let cart = state.cart.list_items(&state.deadline(), &user_id).await?;
    Ok(HttpResponse::Ok().json(cart))
}

async fn checkout(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let user_id = current_user(&req)?;
    let order = state
        .checkout
        .buy_from_cart(&state.deadline(), &user_id)
        .await?;
    Ok(HttpResponse::Created().json(order))
}

async fn instant_buy(
    state: web::Data<AppState>,
    product_id: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    let user_id = current_user(&req)?;
    let order = state
        .instant
        .buy_now(&state.deadline(), &user_id, &product_id)
        .await?;
    Ok(HttpResponse::Created().json(order))
}

async fn add_product(
    state: web::Data<AppState>,
    data: web::Json<models::NewProductInput>,
) -> Result<HttpResponse, Error> {
    let data = data.into_inner();
    let product = Product {
        id: ObjectId::new(),
        name: data.name,
        price: data.price,
        image: data.image,
        rating: data.rating,
    };
    state
        .deadline()
        .bound(state.catalog.insert(&product))
        .await
        .map_err(CartError::from)?;
    info!("added product {} to catalog", product.id);
    Ok(HttpResponse::Created().json(product))
}

async fn sign_up(
    accounts: web::Data<AccountState>,
    new_user: web::Json<models::SignUpInput>,
) -> HttpResponse {
    match accounts::sign_up(&accounts.users, new_user.into_inner()).await {
        Ok(user) => HttpResponse::Created().json(json!({
            "id": user.id.to_hex(),
            "email": user.email,
        })),
        Err(err @ (AccountError::EmailTaken | AccountError::PhoneTaken)) => {
            HttpResponse::BadRequest().json(json!({ "error": err.to_string() }))
        }
        Err(err) => {
            error!("account creation failed: {err}");
            HttpResponse::InternalServerError().json(json!({ "error": "the user did not get created" }))
        }
    }
}

async fn sign_in(
    accounts: web::Data<AccountState>,
    data: web::Json<models::SignInInput>,
) -> HttpResponse {
    match accounts::sign_in(&accounts.users, &data.email, &data.password, &accounts.jwt_secret).await
    {
        Ok((user, token, refresh_token)) => HttpResponse::Ok().json(AuthResponse {
            user_id: user.id.to_hex(),
            token,
            refresh_token,
        }),
        Err(AccountError::InvalidCredentials) => {
            HttpResponse::Unauthorized().json(json!({ "error": "Invalid credentials" }))
        }
        Err(err) => {
            error!("sign in failed: {err}");
            HttpResponse::InternalServerError().json(json!({ "error": "Internal Server Error" }))
        }
    }
}

/// Routes that need no token.
pub fn public_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/users/signup", web::post().to(sign_up))
        .route("/users/login", web::post().to(sign_in));
}

/// Cart, checkout and catalog routes. Mount behind `AuthMiddleware`.
pub fn cart_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/cart", web::get().to(list_cart))
        .route("/cart/{product_id}", web::post().to(add_to_cart))
        .route("/cart/{product_id}", web::delete().to(remove_from_cart))
        .route("/checkout", web::post().to(checkout))
        .route("/instant_buy/{product_id}", web::post().to(instant_buy))
        .route("/admin/add_product", web::post().to(add_product));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::issue_token;
    use crate::checkout::CheckoutLeases;
    use crate::instant::MissingProductPolicy;
    use crate::middleware::AuthMiddleware;
    use crate::models::{CartItem, Order};
    use crate::store::{InMemoryStore, MergeScope, StoreError, StoreResult, UserStore};
    use async_trait::async_trait;
    use mongodb::bson::Bson;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    const SECRET: &str = "test-secret";

    fn state<S>(store: &Arc<S>) -> AppState
    where
        S: UserStore + ProductCatalog + 'static,
    {
        AppState {
            cart: CartRepository::new(store.clone(), store.clone(), 2),
            checkout: CheckoutCoordinator::new(
                store.clone(),
                CheckoutLeases::new(),
                MergeScope::NewestOrder,
                2,
            ),
            instant: InstantPurchaseCoordinator::new(
                store.clone(),
                store.clone(),
                MergeScope::NewestOrder,
                MissingProductPolicy::FailFast,
                2,
            ),
            catalog: store.clone(),
            operation_timeout: Duration::from_secs(5),
        }
    }

    fn bearer(user: ObjectId) -> (&'static str, String) {
        let token = issue_token(user, "u@example.com", SECRET).unwrap();
        ("Authorization", format!("Bearer {token}"))
    }

    #[actix_web::test]
    async fn add_then_checkout_over_http() {
        let store = Arc::new(InMemoryStore::new());
        let user = store.create_user("u@example.com").await;
        let product = Product {
            id: ObjectId::new(),
            name: "mug".into(),
            price: 12,
            image: String::new(),
            rating: 5,
        };
        store.add_product(product.clone()).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&store)))
                .service(
                    web::scope("")
                        .wrap(AuthMiddleware::new(SECRET.to_string()))
                        .configure(cart_routes),
                ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/cart/{}", product.id.to_hex()))
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["total"], 12);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::post()
            .uri("/checkout")
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["price"], 12);
        assert_eq!(body["payment_method"]["cod"], true);
        assert!(store.user(user).await.unwrap().cart.is_empty());
    }

    #[actix_web::test]
    async fn malformed_product_id_is_bad_request() {
        let store = Arc::new(InMemoryStore::new());
        let user = store.create_user("u@example.com").await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&store)))
                .service(
                    web::scope("")
                        .wrap(AuthMiddleware::new(SECRET.to_string()))
                        .configure(cart_routes),
                ),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/cart/not-a-product")
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("invalid identifier"));
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let store = Arc::new(InMemoryStore::new());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&store)))
                .service(
                    web::scope("")
                        .wrap(AuthMiddleware::new(SECRET.to_string()))
                        .configure(cart_routes),
                ),
        )
        .await;

        let req = test::TestRequest::get().uri("/cart").to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[actix_web::test]
    async fn instant_buy_of_unknown_product_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let user = store.create_user("u@example.com").await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&store)))
                .service(
                    web::scope("")
                        .wrap(AuthMiddleware::new(SECRET.to_string()))
                        .configure(cart_routes),
                ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/instant_buy/{}", ObjectId::new().to_hex()))
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    /// Accepts writes but cannot read the cart back.
    struct UnreadableCart(InMemoryStore);

    #[async_trait]
    impl ProductCatalog for UnreadableCart {
        async fn lookup(&self, product_id: ObjectId) -> StoreResult<Vec<Product>> {
            self.0.lookup(product_id).await
        }
        async fn insert(&self, product: &Product) -> StoreResult<()> {
            self.0.insert(product).await
        }
    }

    #[async_trait]
    impl UserStore for UnreadableCart {
        async fn append_cart_items(&self, user_id: ObjectId, items: &[CartItem]) -> StoreResult<()> {
            self.0.append_cart_items(user_id, items).await
        }
        async fn pull_cart_items_by_product_id(&self, user_id: ObjectId, product_id: ObjectId) -> StoreResult<()> {
            self.0.pull_cart_items_by_product_id(user_id, product_id).await
        }
        async fn clear_cart(&self, user_id: ObjectId) -> StoreResult<()> {
            self.0.clear_cart(user_id).await
        }
        async fn append_order(&self, user_id: ObjectId, order: &Order) -> StoreResult<()> {
            self.0.append_order(user_id, order).await
        }
        async fn merge_order_history(
            &self,
            user_id: ObjectId,
            order_id: ObjectId,
            items: &[CartItem],
            scope: MergeScope,
        ) -> StoreResult<()> {
            self.0.merge_order_history(user_id, order_id, items, scope).await
        }
        async fn get_cart_snapshot(&self, _: ObjectId) -> StoreResult<Vec<CartItem>> {
            Err(StoreError::Backend("replica unavailable".into()))
        }
        async fn cart_price_total(&self, user_id: ObjectId) -> StoreResult<Option<Bson>> {
            self.0.cart_price_total(user_id).await
        }
    }

    #[actix_web::test]
    async fn committed_add_is_reported_when_cart_cannot_be_read_back() {
        let inner = InMemoryStore::new();
        let user = inner.create_user("u@example.com").await;
        let product = Product {
            id: ObjectId::new(),
            name: "mug".into(),
            price: 12,
            image: String::new(),
            rating: 5,
        };
        inner.add_product(product.clone()).await;
        let store = Arc::new(UnreadableCart(inner.clone()));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&store)))
                .service(
                    web::scope("")
                        .wrap(AuthMiddleware::new(SECRET.to_string()))
                        .configure(cart_routes),
                ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/cart/{}", product.id.to_hex()))
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["added"].as_array().unwrap().len(), 1);
        assert_eq!(inner.user(user).await.unwrap().cart.len(), 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/cart/{}", product.id.to_hex()))
            .insert_header(bearer(user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["removed"], product.id.to_hex());
        assert!(inner.user(user).await.unwrap().cart.is_empty());
    }
}
