use argon2::{self, Config as ArgonConfig};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::Collection;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Claims, SignUpInput, User};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("user already exists")]
    EmailTaken,

    #[error("this phone number is already in use")]
    PhoneTaken,

    #[error("login or password is incorrect")]
    InvalidCredentials,

    #[error("password hashing failed: {0}")]
    Hashing(#[from] argon2::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

const TOKEN_TTL_HOURS: i64 = 1;

pub fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt: [u8; 16] = rand::thread_rng().gen();
    Ok(argon2::hash_encoded(
        password.as_bytes(),
        &salt,
        &ArgonConfig::default(),
    )?)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    argon2::verify_encoded(hash, password.as_bytes()).unwrap_or(false)
}

/// Signs an HS256 access token for `user_id` valid for one hour.
pub fn issue_token(user_id: ObjectId, email: &str, secret: &str) -> Result<String, AccountError> {
    let expiration = chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS);
    let claims = Claims {
        sub: user_id.to_hex(),
        email: email.to_string(),
        exp: expiration.timestamp().max(0) as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AccountError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

/// Opaque refresh token stored on the user record.
pub fn new_refresh_token() -> String {
    Uuid::new_v4().to_string()
}

/// Creates a user with an empty cart, no orders and no addresses.
pub async fn sign_up(users: &Collection<User>, input: SignUpInput) -> Result<User, AccountError> {
    if users
        .count_documents(doc! { "email": &input.email }, None)
        .await?
        > 0
    {
        return Err(AccountError::EmailTaken);
    }
    if users
        .count_documents(doc! { "phone": &input.phone }, None)
        .await?
        > 0
    {
        return Err(AccountError::PhoneTaken);
    }

    let now = DateTime::now();
    let user = User {
        id: ObjectId::new(),
        first_name: input.first_name,
        last_name: input.last_name,
        email: input.email,
        phone: input.phone,
        password: hash_password(&input.password)?,
        token: None,
        refresh_token: None,
        created_at: now,
        updated_at: now,
        cart: Vec::new(),
        orders: Vec::new(),
        addresses: Vec::new(),
    };
    users.insert_one(&user, None).await?;
    Ok(user)
}

/// Checks credentials, then stores and returns a fresh token pair.
pub async fn sign_in(
    users: &Collection<User>,
    email: &str,
    password: &str,
    secret: &str,
) -> Result<(User, String, String), AccountError> {
    let user = users
        .find_one(doc! { "email": email }, None)
        .await?
        .ok_or(AccountError::InvalidCredentials)?;
    if !verify_password(&user.password, password) {
        return Err(AccountError::InvalidCredentials);
    }

    let token = issue_token(user.id, &user.email, secret)?;
    let refresh_token = new_refresh_token();
    users
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "token": &token,
                "refresh_token": &refresh_token,
                "updated_at": DateTime::now(),
            } },
            None,
        )
        .await?;
    Ok((user, token, refresh_token))
}
