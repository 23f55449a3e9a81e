use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    #[serde(default)]
    pub cart: Vec<CartItem>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignUpInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id, hex ObjectId
    pub email: String,
    pub exp: usize,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub token: String,
    pub refresh_token: String,
}

/// Catalog entry. Authoritative for price; the cart only ever holds copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub rating: u8,
}

#[derive(Debug, Deserialize)]
pub struct NewProductInput {
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub rating: u8,
}

/// Point-in-time copy of a product's display and pricing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(rename = "_id")]
    pub product_id: ObjectId,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub image: String,
}

impl CartItem {
    /// Snapshot used by instant purchase when the catalog has nothing for the id.
    pub fn zero_value(product_id: ObjectId) -> Self {
        CartItem {
            product_id,
            name: String::new(),
            price: 0,
            rating: 0,
            image: String::new(),
        }
    }
}

impl From<Product> for CartItem {
    fn from(product: Product) -> Self {
        CartItem {
            product_id: product.id,
            name: product.name,
            price: product.price,
            rating: product.rating,
            image: product.image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub digital: bool,
    pub cod: bool,
}

impl Payment {
    pub fn cash_on_delivery() -> Self {
        Payment {
            digital: false,
            cod: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub ordered_at: DateTime,
    pub price: i64,
    pub payment_method: Payment,
    #[serde(default)]
    pub order_cart: Vec<CartItem>,
}

impl Order {
    /// New cash-on-delivery order with an empty item list. Items are merged
    /// into `order_cart` by a separate write.
    pub fn cash_on_delivery(price: i64) -> Self {
        Order {
            id: ObjectId::new(),
            ordered_at: DateTime::now(),
            price,
            payment_method: Payment::cash_on_delivery(),
            order_cart: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub house: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub pincode: Option<String>,
}

/// Cart contents together with their aggregated total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub total: i64,
}
