use anyhow::Context;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Executor, FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::dto::{CreateLaptop, UpdateLaptop};

const LAPTOP_COLUMNS: &str = "id, brand, model, processor, ram, storage, graphics, display, os, \
                              price, stock, description, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Laptop {
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
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct LaptopImage {
    pub id: Uuid,
    pub laptop_id: Uuid,
    pub s3_key: String,
    pub position: i32,
}

pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Laptop>> {
    let rows = sqlx::query_as::<_, Laptop>(&format!(
        "SELECT {LAPTOP_COLUMNS} FROM laptops ORDER BY created_at DESC"
    ))
    .fetch_all(db)
    .await
    .context("list laptops")?;
    Ok(rows)
}

pub async fn get(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Laptop>> {
    let row = sqlx::query_as::<_, Laptop>(&format!(
        "SELECT {LAPTOP_COLUMNS} FROM laptops WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await
    .context("get laptop")?;
    Ok(row)
}

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    fields: &CreateLaptop,
) -> anyhow::Result<Laptop> {
    let laptop = sqlx::query_as::<_, Laptop>(&format!(
        r#"
        INSERT INTO laptops (id, brand, model, processor, ram, storage, graphics, display, os,
                             price, stock, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {LAPTOP_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&fields.brand)
    .bind(&fields.model)
    .bind(&fields.processor)
    .bind(&fields.ram)
    .bind(&fields.storage)
    .bind(&fields.graphics)
    .bind(&fields.display)
    .bind(&fields.os)
    .bind(fields.price)
    .bind(fields.stock)
    .bind(&fields.description)
    .fetch_one(&mut **tx)
    .await
    .context("insert laptop")?;
    Ok(laptop)
}

/// Merges the provided fields into the row; absent fields keep their
/// stored value. Returns None when the laptop does not exist.
pub async fn update_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    changes: &UpdateLaptop,
) -> anyhow::Result<Option<Laptop>> {
    let laptop = sqlx::query_as::<_, Laptop>(&format!(
        r#"
        UPDATE laptops SET
            brand = COALESCE($2, brand),
            model = COALESCE($3, model),
            processor = COALESCE($4, processor),
            ram = COALESCE($5, ram),
            storage = COALESCE($6, storage),
            graphics = COALESCE($7, graphics),
            display = COALESCE($8, display),
            os = COALESCE($9, os),
            price = COALESCE($10, price),
            stock = COALESCE($11, stock),
            description = COALESCE($12, description),
            updated_at = now()
        WHERE id = $1
        RETURNING {LAPTOP_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&changes.brand)
    .bind(&changes.model)
    .bind(&changes.processor)
    .bind(&changes.ram)
    .bind(&changes.storage)
    .bind(&changes.graphics)
    .bind(&changes.display)
    .bind(&changes.os)
    .bind(changes.price)
    .bind(changes.stock)
    .bind(&changes.description)
    .fetch_optional(&mut **tx)
    .await
    .context("update laptop")?;
    Ok(laptop)
}

/// Deletes the row; image rows go with it via ON DELETE CASCADE.
pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM laptops WHERE id = $1")
        .bind(id)
        .execute(db)
        .await
        .context("delete laptop")?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_image_tx(
    tx: &mut Transaction<'_, Postgres>,
    image_id: Uuid,
    laptop_id: Uuid,
    s3_key: &str,
    position: i32,
) -> anyhow::Result<()> {
    tx.execute(
        sqlx::query(
            r#"
            INSERT INTO laptop_images (id, laptop_id, s3_key, position)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(image_id)
        .bind(laptop_id)
        .bind(s3_key)
        .bind(position),
    )
    .await
    .context("insert laptop image")?;
    Ok(())
}

pub async fn list_images(db: &PgPool, laptop_id: Uuid) -> anyhow::Result<Vec<LaptopImage>> {
    let rows = sqlx::query_as::<_, LaptopImage>(
        r#"
        SELECT id, laptop_id, s3_key, position
          FROM laptop_images
         WHERE laptop_id = $1
         ORDER BY position ASC
        "#,
    )
    .bind(laptop_id)
    .fetch_all(db)
    .await
    .context("list laptop images")?;
    Ok(rows)
}

/// Images for a batch of laptops in one round trip, for the list endpoint.
pub async fn list_images_for(db: &PgPool, laptop_ids: &[Uuid]) -> anyhow::Result<Vec<LaptopImage>> {
    if laptop_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, LaptopImage>(
        r#"
        SELECT id, laptop_id, s3_key, position
          FROM laptop_images
         WHERE laptop_id = ANY($1)
         ORDER BY laptop_id, position ASC
        "#,
    )
    .bind(laptop_ids)
    .fetch_all(db)
    .await
    .context("list laptop images batch")?;
    Ok(rows)
}

/// Clears a laptop's image rows, returning the stored keys so the caller
/// can clean up the objects after commit.
pub async fn delete_images_tx(
    tx: &mut Transaction<'_, Postgres>,
    laptop_id: Uuid,
) -> anyhow::Result<Vec<String>> {
    let keys: Vec<(String,)> =
        sqlx::query_as::<_, (String,)>("DELETE FROM laptop_images WHERE laptop_id = $1 RETURNING s3_key")
            .bind(laptop_id)
            .fetch_all(&mut **tx)
            .await
            .context("delete laptop images")?;
    Ok(keys.into_iter().map(|(key,)| key).collect())
}
