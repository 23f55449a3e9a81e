use actix_service::{forward_ready, Service};
use actix_web::dev::{ServiceRequest, ServiceResponse, Transform};
use actix_web::error::ErrorUnauthorized;
use actix_web::{Error, HttpMessage};
use futures::future::{ok, LocalBoxFuture, Ready};
use log::debug;
use std::rc::Rc;

use crate::accounts::validate_token;

/// Id of the user a validated bearer token was issued to.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Validates `Authorization: Bearer <jwt>` and stores the token subject as an
/// [`AuthenticatedUser`] request extension.
pub struct AuthMiddleware {
    secret: String,
}

impl AuthMiddleware {
    pub fn new(secret: String) -> Self {
        AuthMiddleware { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Rc::new(service),
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let secret = self.secret.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let header = req
                .headers()
                .get("Authorization")
                .ok_or_else(|| ErrorUnauthorized("Authorization header missing"))?;
            let value = header
                .to_str()
                .map_err(|_| ErrorUnauthorized("Invalid authorization header"))?;
            let token = value
                .strip_prefix("Bearer ")
                .ok_or_else(|| ErrorUnauthorized("Invalid authorization scheme"))?;

            match validate_token(token, &secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(AuthenticatedUser(claims.sub));
                    service.call(req).await
                }
                Err(err) => {
                    debug!("rejected bearer token: {err}");
                    Err(ErrorUnauthorized("Invalid token"))
                }
            }
        })
    }
}
