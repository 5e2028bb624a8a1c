use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::Laptop;
use crate::error::ApiError;

/// A stored image as clients see it: stable id plus a presigned URL.
#[derive(Debug, Serialize)]
pub struct ImageRef {
    pub id: Uuid,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct LaptopResponse {
    pub id: Uuid,
    pub brand: String,
    pub model: String,
    pub processor: String,
    pub ram: String,
    pub storage: String,
    pub graphics: String,
    pub display: String,
    pub os: String,
    pub price: Decimal,
    pub stock: i32,
    pub description: Option<String>,
    pub images: Vec<ImageRef>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl LaptopResponse {
    pub fn from_parts(laptop: Laptop, images: Vec<ImageRef>) -> Self {
        Self {
            id: laptop.id,
            brand: laptop.brand,
            model: laptop.model,
            processor: laptop.processor,
            ram: laptop.ram,
            storage: laptop.storage,
            graphics: laptop.graphics,
            display: laptop.display,
            os: laptop.os,
            price: laptop.price,
            stock: laptop.stock,
            description: laptop.description,
            images,
            created_at: laptop.created_at,
            updated_at: laptop.updated_at,
        }
    }
}

/// Fields for a new catalog entry, parsed out of the multipart form.
#[derive(Debug)]
pub struct CreateLaptop {
    pub brand: String,
    pub model: String,
    pub processor: String,
    pub ram: String,
    pub storage: String,
    pub graphics: String,
    pub display: String,
    pub os: String,
    pub price: Decimal,
    pub stock: i32,
    pub description: Option<String>,
}

impl CreateLaptop {
    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, ApiError> {
        let laptop = Self {
            brand: required(&mut fields, "brand")?,
            model: required(&mut fields, "model")?,
            processor: required(&mut fields, "processor")?,
            ram: required(&mut fields, "ram")?,
            storage: required(&mut fields, "storage")?,
            graphics: required(&mut fields, "graphics")?,
            display: required(&mut fields, "display")?,
            os: required(&mut fields, "os")?,
            price: parse_price(required(&mut fields, "price")?)?,
            stock: match optional(&mut fields, "stock") {
                Some(raw) => parse_stock(raw)?,
                None => 0,
            },
            description: optional(&mut fields, "description"),
        };
        Ok(laptop)
    }
}

/// Partial update; absent fields keep their stored value. Accepted both
/// as multipart form fields and as a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateLaptop {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub processor: Option<String>,
    pub ram: Option<String>,
    pub storage: Option<String>,
    pub graphics: Option<String>,
    pub display: Option<String>,
    pub os: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
    pub description: Option<String>,
}

impl UpdateLaptop {
    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, ApiError> {
        let changes = Self {
            brand: optional(&mut fields, "brand"),
            model: optional(&mut fields, "model"),
            processor: optional(&mut fields, "processor"),
            ram: optional(&mut fields, "ram"),
            storage: optional(&mut fields, "storage"),
            graphics: optional(&mut fields, "graphics"),
            display: optional(&mut fields, "display"),
            os: optional(&mut fields, "os"),
            price: match optional(&mut fields, "price") {
                Some(raw) => Some(parse_price(raw)?),
                None => None,
            },
            stock: match optional(&mut fields, "stock") {
                Some(raw) => Some(parse_stock(raw)?),
                None => None,
            },
            description: optional(&mut fields, "description"),
        };
        Ok(changes)
    }

    /// Bounds checks for the JSON path, where serde has already done the
    /// type conversion.
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(price) = self.price {
            check_price(price)?;
        }
        if let Some(stock) = self.stock {
            if stock < 0 {
                return Err(ApiError::Validation(
                    "stock must be non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn required(fields: &mut HashMap<String, String>, name: &str) -> Result<String, ApiError> {
    optional(fields, name).ok_or_else(|| ApiError::Validation(format!("{name} is required")))
}

fn optional(fields: &mut HashMap<String, String>, name: &str) -> Option<String> {
    fields
        .remove(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_price(raw: String) -> Result<Decimal, ApiError> {
    let price: Decimal = raw
        .parse()
        .map_err(|_| ApiError::Validation("price must be a decimal number".to_string()))?;
    check_price(price)?;
    Ok(price)
}

/// The column is NUMERIC(10, 2), so anything at or above 10^8 has to be
/// refused here rather than surface as a database error.
fn check_price(price: Decimal) -> Result<(), ApiError> {
    if price < Decimal::ZERO {
        return Err(ApiError::Validation(
            "price must be non-negative".to_string(),
        ));
    }
    if price >= Decimal::from(100_000_000_u32) {
        return Err(ApiError::Validation("price is too large".to_string()));
    }
    Ok(())
}

fn parse_stock(raw: String) -> Result<i32, ApiError> {
    let stock: i32 = raw
        .parse()
        .map_err(|_| ApiError::Validation("stock must be an integer".to_string()))?;
    if stock < 0 {
        return Err(ApiError::Validation(
            "stock must be non-negative".to_string(),
        ));
    }
    Ok(stock)
}
