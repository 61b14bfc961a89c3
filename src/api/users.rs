use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{hash_password, AuthUser};
use crate::models::User;

use super::{require_non_empty, ApiError, AppState};

// ============================================================================
// Users Resource
// ============================================================================
//
// Registration and reads are open; updating or deleting a user requires Basic
// auth and is self-only. A valid caller targeting someone else's id gets the
// same 404 as a nonexistent id.
//
// ============================================================================

#[derive(Deserialize)]
pub struct UserPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl UserPayload {
    fn validate(&self) -> Result<(), ApiError> {
        require_non_empty(&self.first_name, "first_name")?;
        require_non_empty(&self.last_name, "last_name")?;
        require_non_empty(&self.email, "email")?;
        require_non_empty(&self.password, "password")?;
        Ok(())
    }
}

pub async fn create_user(
    state: web::Data<AppState>,
    payload: web::Json<UserPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let user = User {
        user_id: Uuid::new_v4(),
        first_name: payload.first_name.clone(),
        last_name: payload.last_name.clone(),
        email: payload.email.clone(),
        password: hash_password(&payload.password),
        created_at: Utc::now(),
    };
    state.store.insert_user(&user).await?;

    tracing::info!(user_id = %user.user_id, "User registered");
    Ok(HttpResponse::Created().json(user))
}

pub async fn list_users(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let users = state.store.list_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

pub async fn get_user(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = state.store.get_user(*user_id).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn update_user(
    state: web::Data<AppState>,
    auth: AuthUser,
    user_id: web::Path<Uuid>,
    payload: web::Json<UserPayload>,
) -> Result<HttpResponse, ApiError> {
    if auth.0.user_id != *user_id {
        return Err(ApiError::NotFound);
    }
    payload.validate()?;

    let user = User {
        user_id: *user_id,
        first_name: payload.first_name.clone(),
        last_name: payload.last_name.clone(),
        email: payload.email.clone(),
        password: hash_password(&payload.password),
        created_at: auth.0.created_at,
    };
    state.store.update_user(&user).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn delete_user(
    state: web::Data<AppState>,
    auth: AuthUser,
    user_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    if auth.0.user_id != *user_id {
        return Err(ApiError::NotFound);
    }
    state.store.delete_user(*user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use crate::api::configure;
    use crate::engine::OrderEngine;
    use crate::metrics::Metrics;
    use crate::store::{MemStore, Store};

    use super::*;

    fn state() -> web::Data<AppState> {
        let store = Arc::new(MemStore::new());
        web::Data::new(AppState {
            engine: OrderEngine::new(store.clone()),
            store,
            metrics: Arc::new(Metrics::new().unwrap()),
        })
    }

    #[actix_web::test]
    async fn test_register_then_authenticate() {
        let state = state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/users/")
            .set_json(serde_json::json!({
                "first_name": "Anna",
                "last_name": "Markis",
                "email": "anna@markis.com",
                "password": "p4ssw0rd",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body.get("password").is_none());
        let user_id = body["user_id"].as_str().unwrap().to_string();

        // The stored hash verifies against the submitted password: an
        // authenticated self-update succeeds.
        let req = test::TestRequest::put()
            .uri(&format!("/users/{user_id}"))
            .insert_header((
                "Authorization",
                format!("Basic {}", STANDARD.encode("anna@markis.com:p4ssw0rd")),
            ))
            .set_json(serde_json::json!({
                "first_name": "Anna",
                "last_name": "Marini",
                "email": "anna@markis.com",
                "password": "p4ssw0rd",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_register_rejects_empty_field_and_duplicate_email() {
        let state = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/users/")
            .set_json(serde_json::json!({
                "first_name": "",
                "last_name": "Markis",
                "email": "anna@markis.com",
                "password": "p4ssw0rd",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let payload = serde_json::json!({
            "first_name": "Anna",
            "last_name": "Markis",
            "email": "anna@markis.com",
            "password": "p4ssw0rd",
        });
        let req = test::TestRequest::post()
            .uri("/users/")
            .set_json(payload.clone())
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::CREATED
        );
        let req = test::TestRequest::post()
            .uri("/users/")
            .set_json(payload)
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[actix_web::test]
    async fn test_update_other_user_is_not_found() {
        let state = state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        for email in ["anna@markis.com", "giovanni@mariani.com"] {
            let req = test::TestRequest::post()
                .uri("/users/")
                .set_json(serde_json::json!({
                    "first_name": "X",
                    "last_name": "Y",
                    "email": email,
                    "password": "p4ssw0rd",
                }))
                .to_request();
            test::call_service(&app, req).await;
        }
        let other = state
            .store
            .get_user_by_email("giovanni@mariani.com")
            .await
            .unwrap()
            .unwrap();

        let req = test::TestRequest::delete()
            .uri(&format!("/users/{}", other.user_id))
            .insert_header((
                "Authorization",
                format!("Basic {}", STANDARD.encode("anna@markis.com:p4ssw0rd")),
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
