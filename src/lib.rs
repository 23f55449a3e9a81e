//! Cart and checkout backend for a MongoDB-backed shop.
//!
//! A user's cart and order history live inside the user document. Cart
//! mutations are single atomic writes on that document; checkout is a
//! sequence of such writes (see [`checkout`]).

pub mod accounts;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod handlers;
pub mod instant;
pub mod middleware;
pub mod models;
pub mod pricing;
pub mod store;

pub use cart::CartRepository;
pub use checkout::{CheckoutCoordinator, CheckoutLeases, CheckoutState};
pub use deadline::Deadline;
pub use error::{CartError, Result};
pub use instant::{InstantPurchaseCoordinator, MissingProductPolicy};
pub use pricing::PricingAggregator;
pub use store::{InMemoryStore, MergeScope, ProductCatalog, UserStore};
