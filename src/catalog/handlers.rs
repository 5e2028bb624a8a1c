use std::collections::HashMap;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{CreateLaptop, LaptopResponse, UpdateLaptop};
use super::services::{self, UploadImage, MAX_IMAGES};
use crate::{
    auth::extractors::StaffUser,
    error::ApiError,
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/laptops", get(list_laptops))
        .route("/laptops/:id", get(get_laptop))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/laptops", post(create_laptop))
        .route("/laptops/:id", patch(update_laptop).delete(delete_laptop))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

#[instrument(skip(state))]
pub async fn list_laptops(
    State(state): State<AppState>,
) -> Result<Json<Vec<LaptopResponse>>, ApiError> {
    let laptops = services::list_laptops(&state).await?;
    Ok(Json(laptops))
}

#[instrument(skip(state))]
pub async fn get_laptop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LaptopResponse>, ApiError> {
    match services::get_laptop(&state, id).await? {
        Some(laptop) => Ok(Json(laptop)),
        None => Err(ApiError::NotFound("Laptop not found".to_string())),
    }
}

/// POST /laptops (multipart): field values plus one to four `images`
/// file parts.
#[instrument(skip(state, multipart))]
pub async fn create_laptop(
    State(state): State<AppState>,
    StaffUser(user): StaffUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, HeaderMap, Json<LaptopResponse>), ApiError> {
    let (fields, images) = collect_multipart(&mut multipart).await?;
    if images.is_empty() {
        return Err(ApiError::Validation(
            "At least one image is required".to_string(),
        ));
    }

    let create = CreateLaptop::from_fields(fields)?;
    let laptop = services::create_laptop(&state, create, images).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&format!("/api/laptops/{}", laptop.id))
            .context("location header")?,
    );

    info!(laptop_id = %laptop.id, user_id = %user.id, "catalog entry created");
    Ok((StatusCode::CREATED, headers, Json(laptop)))
}

/// PATCH /laptops/:id accepts either a multipart form (fields plus an
/// optional replacement gallery) or a plain JSON body of fields.
#[instrument(skip(state, request))]
pub async fn update_laptop(
    State(state): State<AppState>,
    StaffUser(user): StaffUser,
    Path(id): Path<Uuid>,
    request: Request,
) -> Result<Json<LaptopResponse>, ApiError> {
    let (changes, images) = parse_update_request(&state, request).await?;
    changes.validate()?;

    match services::update_laptop(&state, id, changes, images).await? {
        Some(laptop) => {
            info!(laptop_id = %laptop.id, user_id = %user.id, "catalog entry updated");
            Ok(Json(laptop))
        }
        None => Err(ApiError::NotFound("Laptop not found".to_string())),
    }
}

#[instrument(skip(state))]
pub async fn delete_laptop(
    State(state): State<AppState>,
    StaffUser(user): StaffUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !services::delete_laptop(&state, id).await? {
        return Err(ApiError::NotFound("Laptop not found to delete".to_string()));
    }
    info!(laptop_id = %id, user_id = %user.id, "catalog entry deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn parse_update_request(
    state: &AppState,
    request: Request,
) -> Result<(UpdateLaptop, Vec<UploadImage>), ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state).await.map_err(|err| {
            warn!(error = %err, "multipart body rejected");
            ApiError::Validation("Malformed multipart body".to_string())
        })?;
        let (fields, images) = collect_multipart(&mut multipart).await?;
        let changes = UpdateLaptop::from_fields(fields)?;
        Ok((changes, images))
    } else {
        let Json(changes) = Json::<UpdateLaptop>::from_request(request, state)
            .await
            .map_err(|err| {
                warn!(error = %err, "json body rejected");
                ApiError::Validation("Malformed JSON body".to_string())
            })?;
        Ok((changes, Vec::new()))
    }
}

/// Splits a multipart form into text fields and `images` file parts.
async fn collect_multipart(
    multipart: &mut Multipart,
) -> Result<(HashMap<String, String>, Vec<UploadImage>), ApiError> {
    let mut fields = HashMap::new();
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(|name| name.to_string()) else {
            continue;
        };
        if name == "images" || name == "images[]" {
            if images.len() == MAX_IMAGES {
                return Err(ApiError::Validation(format!(
                    "At most {MAX_IMAGES} images are allowed"
                )));
            }
            let content_type = field
                .content_type()
                .map(|value| value.to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let body = field.bytes().await.map_err(malformed)?;
            images.push(UploadImage { body, content_type });
        } else {
            let value = field.text().await.map_err(malformed)?;
            fields.insert(name, value);
        }
    }

    Ok((fields, images))
}

fn malformed(err: axum::extract::multipart::MultipartError) -> ApiError {
    warn!(error = %err, "malformed multipart body");
    ApiError::Validation("Malformed multipart body".to_string())
}
