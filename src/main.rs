use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use log::{error, info};

use e_com_cart::config::Config;
use e_com_cart::handlers::{self, AccountState, AppState};
use e_com_cart::middleware::AuthMiddleware;
use e_com_cart::store::{MongoProductCatalog, MongoUserStore};
use e_com_cart::{
    db, CartRepository, CheckoutCoordinator, CheckoutLeases, InstantPurchaseCoordinator,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok(); // Load environment variables from .env file
    env_logger::init();

    let config = Config::from_env().map_err(|err| {
        error!("invalid configuration: {err}");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;

    let db = db::connect(&config).await.map_err(|err| {
        error!("failed to connect to MongoDB: {err}");
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, err)
    })?;

    let users = MongoUserStore::new(&db);
    let accounts = AccountState {
        users: users.collection().clone(),
        jwt_secret: config.jwt_secret.clone(),
    };
    let users = Arc::new(users);
    let catalog = Arc::new(MongoProductCatalog::new(&db));

    let state = AppState {
        cart: CartRepository::new(catalog.clone(), users.clone(), config.read_attempts),
        checkout: CheckoutCoordinator::new(
            users.clone(),
            CheckoutLeases::new(),
            config.merge_scope,
            config.read_attempts,
        ),
        instant: InstantPurchaseCoordinator::new(
            catalog.clone(),
            users.clone(),
            config.merge_scope,
            config.missing_product,
            config.read_attempts,
        ),
        catalog,
        operation_timeout: config.operation_timeout,
    };

    info!(
        "order history merge: {}, instant buy missing product: {}",
        config.merge_scope, config.missing_product
    );
    info!("listening on {}", config.bind_addr);

    let jwt_secret = config.jwt_secret.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(accounts.clone()))
            .configure(handlers::public_routes)
            .service(
                web::scope("")
                    .wrap(AuthMiddleware::new(jwt_secret.clone()))
                    .configure(handlers::cart_routes),
            )
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
