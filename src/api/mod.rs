mod addresses;
mod items;
mod orders;
mod users;

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};

use crate::engine::{OrderEngine, OrderError};
use crate::metrics::Metrics;
use crate::store::{Store, StoreError};

// ============================================================================
// HTTP Boundary
// ============================================================================
//
// Thin handlers over the engine and the store; all domain rules live below
// this layer. The route table mirrors the resource layout of the API:
// /users/, /items/, /addresses/, /orders/ plus the /{uuid} forms.
//
// ============================================================================

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub engine: OrderEngine,
    pub metrics: Arc<Metrics>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/users/")
            .route(web::get().to(users::list_users))
            .route(web::post().to(users::create_user)),
    )
    .service(
        web::resource("/users/{user_id}")
            .route(web::get().to(users::get_user))
            .route(web::put().to(users::update_user))
            .route(web::delete().to(users::delete_user)),
    )
    .service(
        web::resource("/items/")
            .route(web::get().to(items::list_items))
            .route(web::post().to(items::create_item)),
    )
    .service(
        web::resource("/items/{item_id}")
            .route(web::get().to(items::get_item))
            .route(web::put().to(items::update_item))
            .route(web::delete().to(items::delete_item)),
    )
    .service(
        web::resource("/addresses/")
            .route(web::get().to(addresses::list_addresses))
            .route(web::post().to(addresses::create_address)),
    )
    .service(
        web::resource("/addresses/{address_id}")
            .route(web::get().to(addresses::get_address))
            .route(web::put().to(addresses::update_address))
            .route(web::delete().to(addresses::delete_address)),
    )
    .service(
        web::resource("/orders/")
            .route(web::get().to(orders::list_orders))
            .route(web::post().to(orders::create_order)),
    )
    .service(
        web::resource("/orders/{order_id}")
            .route(web::get().to(orders::get_order))
            .route(web::put().to(orders::replace_order))
            .route(web::delete().to(orders::delete_order)),
    );
}

fn error_body(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

impl ResponseError for OrderError {
    fn status_code(&self) -> StatusCode {
        match self {
            OrderError::InvalidUser(_)
            | OrderError::InvalidItemList(_)
            | OrderError::InsufficientAvailability { .. }
            | OrderError::ImmutableFieldViolation(_) => StatusCode::BAD_REQUEST,
            OrderError::Unauthorized => StatusCode::UNAUTHORIZED,
            OrderError::NotFound => StatusCode::NOT_FOUND,
            OrderError::TransactionConflict => StatusCode::CONFLICT,
            OrderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let OrderError::Store(err) = self {
            tracing::error!(error = %err, "Order operation failed in storage");
            return error_body(self.status_code(), "storage failure");
        }
        error_body(self.status_code(), &self.to_string())
    }
}

/// Failures of the plain resource handlers (users, items, addresses).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("resource not found")]
    NotFound,

    #[error("storage failure")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RowNotFound => ApiError::NotFound,
            StoreError::DuplicateKey(key) => ApiError::Validation(format!("{key} already in use")),
            StoreError::Referenced => {
                ApiError::Validation("item is referenced by existing orders".into())
            }
            other => ApiError::Storage(other),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Storage(err) = self {
            tracing::error!(error = %err, "Resource operation failed in storage");
        }
        error_body(self.status_code(), &self.to_string())
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
