use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::Item;

use super::{require_non_empty, ApiError, AppState};

// ============================================================================
// Items Resource
// ============================================================================
//
// Items carry no owner, so mutations need a valid caller but no ownership
// check. Availability edited here is the stock baseline; only the order
// engine moves it afterwards.
//
// ============================================================================

#[derive(Deserialize)]
pub struct ItemPayload {
    pub name: String,
    pub price: Decimal,
    pub description: String,
    pub availability: i32,
}

impl ItemPayload {
    fn validate(&self) -> Result<(), ApiError> {
        require_non_empty(&self.name, "name")?;
        if self.price < Decimal::ZERO {
            return Err(ApiError::Validation("price must not be negative".into()));
        }
        if self.availability < 0 {
            return Err(ApiError::Validation(
                "availability must not be negative".into(),
            ));
        }
        Ok(())
    }
}

pub async fn create_item(
    state: web::Data<AppState>,
    _auth: AuthUser,
    payload: web::Json<ItemPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let item = Item {
        item_id: Uuid::new_v4(),
        name: payload.name.clone(),
        price: payload.price,
        description: payload.description.clone(),
        availability: payload.availability,
    };
    state.store.insert_item(&item).await?;

    tracing::info!(item_id = %item.item_id, availability = item.availability, "Item created");
    Ok(HttpResponse::Created().json(item))
}

pub async fn list_items(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let items = state.store.list_items().await?;
    Ok(HttpResponse::Ok().json(items))
}

pub async fn get_item(
    state: web::Data<AppState>,
    item_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let item = state.store.get_item(*item_id).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn update_item(
    state: web::Data<AppState>,
    _auth: AuthUser,
    item_id: web::Path<Uuid>,
    payload: web::Json<ItemPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let item = Item {
        item_id: *item_id,
        name: payload.name.clone(),
        price: payload.price,
        description: payload.description.clone(),
        availability: payload.availability,
    };
    state.store.update_item(&item).await?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn delete_item(
    state: web::Data<AppState>,
    _auth: AuthUser,
    item_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state.store.delete_item(*item_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chrono::Utc;

    use crate::api::configure;
    use crate::auth::hash_password;
    use crate::engine::OrderEngine;
    use crate::metrics::Metrics;
    use crate::models::User;
    use crate::store::{MemStore, Store};

    use super::*;

    #[actix_web::test]
    async fn test_delete_item_referenced_by_order_is_bad_request() {
        let store = Arc::new(MemStore::new());
        let user = User {
            user_id: Uuid::new_v4(),
            first_name: "Anna".into(),
            last_name: "Markis".into(),
            email: "anna@markis.com".into(),
            password: hash_password("p4ssw0rd"),
            created_at: Utc::now(),
        };
        store.insert_user(&user).await.unwrap();
        let item = Item {
            item_id: Uuid::new_v4(),
            name: "widget".into(),
            price: Decimal::new(100, 2),
            description: "a widget".into(),
            availability: 5,
        };
        store.insert_item(&item).await.unwrap();

        let state = web::Data::new(AppState {
            engine: OrderEngine::new(store.clone()),
            store,
            metrics: Arc::new(Metrics::new().unwrap()),
        });
        state
            .engine
            .create(user.user_id, user.user_id, &[(item.item_id, 1)])
            .await
            .unwrap();

        let app = test::init_service(App::new().app_data(state).configure(configure)).await;
        let req = test::TestRequest::delete()
            .uri(&format!("/items/{}", item.item_id))
            .insert_header((
                "Authorization",
                format!("Basic {}", STANDARD.encode("anna@markis.com:p4ssw0rd")),
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[core::prelude::v1::test]
    fn test_item_payload_validation() {
        let payload = ItemPayload {
            name: "widget".into(),
            price: Decimal::new(-1, 2),
            description: "".into(),
            availability: 3,
        };
        assert!(payload.validate().is_err());

        let payload = ItemPayload {
            name: "widget".into(),
            price: Decimal::new(100, 2),
            description: "".into(),
            availability: -1,
        };
        assert!(payload.validate().is_err());

        let payload = ItemPayload {
            name: "widget".into(),
            price: Decimal::ZERO,
            description: "free sample".into(),
            availability: 0,
        };
        assert!(payload.validate().is_ok());
    }
}
