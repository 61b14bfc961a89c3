use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::engine::{DeclaredIdentity, OrderError};

use super::AppState;

// ============================================================================
// Orders Resource
// ============================================================================

/// Item lists arrive as JSON arrays of `[item_uuid, quantity]` pairs.
#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user: Uuid,
    pub items: Vec<(Uuid, i32)>,
}

#[derive(Deserialize)]
pub struct ReplaceOrderRequest {
    pub items: Vec<(Uuid, i32)>,
    /// Immutable fields may be restated verbatim but never changed.
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub user: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub async fn list_orders(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, OrderError> {
    let orders = state.engine.list(auth.0.user_id).await?;
    Ok(HttpResponse::Ok().json(orders))
}

pub async fn create_order(
    state: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, OrderError> {
    let result = state
        .engine
        .create(auth.0.user_id, payload.user, &payload.items)
        .await;
    state.metrics.record_order_operation("create", result.is_ok());
    Ok(HttpResponse::Created().json(result?))
}

pub async fn get_order(
    state: web::Data<AppState>,
    auth: AuthUser,
    order_id: web::Path<Uuid>,
) -> Result<HttpResponse, OrderError> {
    let order = state.engine.get(auth.0.user_id, *order_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn replace_order(
    state: web::Data<AppState>,
    auth: AuthUser,
    order_id: web::Path<Uuid>,
    payload: web::Json<ReplaceOrderRequest>,
) -> Result<HttpResponse, OrderError> {
    let declared = DeclaredIdentity {
        order_id: payload.order_id,
        user_id: payload.user,
        created_at: payload.created_at,
    };
    let result = state
        .engine
        .replace(auth.0.user_id, *order_id, &payload.items, &declared)
        .await;
    state.metrics.record_order_operation("replace", result.is_ok());
    Ok(HttpResponse::Ok().json(result?))
}

pub async fn delete_order(
    state: web::Data<AppState>,
    auth: AuthUser,
    order_id: web::Path<Uuid>,
) -> Result<HttpResponse, OrderError> {
    let result = state.engine.delete(auth.0.user_id, *order_id).await;
    state.metrics.record_order_operation("delete", result.is_ok());
    result?;
    Ok(HttpResponse::NoContent().finish())
}

// ============================================================================
// Handler Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use rust_decimal::Decimal;

    use crate::api::{configure, AppState};
    use crate::auth::hash_password;
    use crate::engine::OrderEngine;
    use crate::metrics::Metrics;
    use crate::models::{Item, User};
    use crate::store::{MemStore, Store};

    const PASSWORD: &str = "p4ssw0rd";

    async fn seeded_state() -> (web::Data<AppState>, User, Item) {
        let store = Arc::new(MemStore::new());
        let user = User {
            user_id: Uuid::new_v4(),
            first_name: "Anna".into(),
            last_name: "Markis".into(),
            email: "anna@markis.com".into(),
            password: hash_password(PASSWORD),
            created_at: Utc::now(),
        };
        store.insert_user(&user).await.unwrap();

        let item = Item {
            item_id: Uuid::new_v4(),
            name: "widget".into(),
            price: Decimal::new(1050, 2),
            description: "a widget".into(),
            availability: 5,
        };
        store.insert_item(&item).await.unwrap();

        let state = web::Data::new(AppState {
            engine: OrderEngine::new(store.clone()),
            store,
            metrics: Arc::new(Metrics::new().unwrap()),
        });
        (state, user, item)
    }

    fn basic_auth(email: &str, password: &str) -> (&'static str, String) {
        (
            "Authorization",
            format!("Basic {}", STANDARD.encode(format!("{email}:{password}"))),
        )
    }

    use super::*;

    #[actix_web::test]
    async fn test_create_order_requires_auth() {
        let (state, user, item) = seeded_state().await;
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/orders/")
            .set_json(serde_json::json!({
                "user": user.user_id,
                "items": [[item.item_id, 2]],
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_order_lifecycle_over_http() {
        let (state, user, item) = seeded_state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let auth = basic_auth(&user.email, PASSWORD);

        // Create.
        let req = test::TestRequest::post()
            .uri("/orders/")
            .insert_header(auth.clone())
            .set_json(serde_json::json!({
                "user": user.user_id,
                "items": [[item.item_id, 3]],
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: serde_json::Value = test::read_body_json(resp).await;
        let order_id = created["order_id"].as_str().unwrap().to_string();
        assert_eq!(created["total_price"], serde_json::json!("31.50"));

        // Replace with a larger quantity; the order's own units release first.
        let req = test::TestRequest::put()
            .uri(&format!("/orders/{order_id}"))
            .insert_header(auth.clone())
            .set_json(serde_json::json!({ "items": [[item.item_id, 5]] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(
            state
                .store
                .get_item(item.item_id)
                .await
                .unwrap()
                .unwrap()
                .availability,
            0
        );

        // Delete restores the stock.
        let req = test::TestRequest::delete()
            .uri(&format!("/orders/{order_id}"))
            .insert_header(auth.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{order_id}"))
            .insert_header(auth)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_foreign_order_reads_as_not_found() {
        let (state, user, item) = seeded_state().await;

        let other = User {
            user_id: Uuid::new_v4(),
            first_name: "Giovanni".into(),
            last_name: "Mariani".into(),
            email: "giovanni@mariani.com".into(),
            password: hash_password(PASSWORD),
            created_at: Utc::now(),
        };
        state.store.insert_user(&other).await.unwrap();
        let foreign = state
            .engine
            .create(other.user_id, other.user_id, &[(item.item_id, 1)])
            .await
            .unwrap();

        let app = test::init_service(App::new().app_data(state).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri(&format!("/orders/{}", foreign.order_id))
            .insert_header(basic_auth(&user.email, PASSWORD))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_insufficient_availability_maps_to_bad_request() {
        let (state, user, item) = seeded_state().await;
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/orders/")
            .insert_header(basic_auth(&user.email, PASSWORD))
            .set_json(serde_json::json!({
                "user": user.user_id,
                "items": [[item.item_id, 6]],
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
