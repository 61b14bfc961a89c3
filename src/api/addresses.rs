use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::Address;

use super::{require_non_empty, ApiError, AppState};

// ============================================================================
// Addresses Resource
// ============================================================================
//
// Addresses belong to the authenticated user. The owner is taken from the
// credentials, never from the payload, and lookups follow the same
// ownership-blind 404 rule as orders.
//
// ============================================================================

#[derive(Deserialize)]
pub struct AddressPayload {
    pub country: String,
    pub city: String,
    pub post_code: String,
    pub address: String,
    pub phone: String,
}

impl AddressPayload {
    fn validate(&self) -> Result<(), ApiError> {
        require_non_empty(&self.country, "country")?;
        require_non_empty(&self.city, "city")?;
        require_non_empty(&self.post_code, "post_code")?;
        require_non_empty(&self.address, "address")?;
        require_non_empty(&self.phone, "phone")?;
        Ok(())
    }
}

pub async fn create_address(
    state: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<AddressPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let address = Address {
        address_id: Uuid::new_v4(),
        user_id: auth.0.user_id,
        country: payload.country.clone(),
        city: payload.city.clone(),
        post_code: payload.post_code.clone(),
        address: payload.address.clone(),
        phone: payload.phone.clone(),
    };
    state.store.insert_address(&address).await?;
    Ok(HttpResponse::Created().json(address))
}

pub async fn list_addresses(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let addresses = state.store.list_addresses(auth.0.user_id).await?;
    Ok(HttpResponse::Ok().json(addresses))
}

pub async fn get_address(
    state: web::Data<AppState>,
    auth: AuthUser,
    address_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let address = owned_address(&state, &auth, *address_id).await?;
    Ok(HttpResponse::Ok().json(address))
}

pub async fn update_address(
    state: web::Data<AppState>,
    auth: AuthUser,
    address_id: web::Path<Uuid>,
    payload: web::Json<AddressPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let current = owned_address(&state, &auth, *address_id).await?;

    let address = Address {
        address_id: current.address_id,
        user_id: current.user_id,
        country: payload.country.clone(),
        city: payload.city.clone(),
        post_code: payload.post_code.clone(),
        address: payload.address.clone(),
        phone: payload.phone.clone(),
    };
    state.store.update_address(&address).await?;
    Ok(HttpResponse::Ok().json(address))
}

pub async fn delete_address(
    state: web::Data<AppState>,
    auth: AuthUser,
    address_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let current = owned_address(&state, &auth, *address_id).await?;
    state.store.delete_address(current.address_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn owned_address(
    state: &AppState,
    auth: &AuthUser,
    address_id: Uuid,
) -> Result<Address, ApiError> {
    state
        .store
        .get_address(address_id)
        .await?
        .filter(|address| address.user_id == auth.0.user_id)
        .ok_or(ApiError::NotFound)
}
