use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{CreateLaptop, ImageRef, LaptopResponse, UpdateLaptop};
use super::repo::{self, LaptopImage};
use crate::state::AppState;

/// Mirrors the storefront client, which submits up to four gallery shots.
pub const MAX_IMAGES: usize = 4;

const PRESIGN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
pub struct UploadImage {
    pub body: Bytes,
    pub content_type: String,
}

struct StoredObject {
    id: Uuid,
    key: String,
}

/// Uploads the gallery to object storage, then persists the laptop and
/// its image rows in one transaction.
pub async fn create_laptop(
    st: &AppState,
    fields: CreateLaptop,
    images: Vec<UploadImage>,
) -> anyhow::Result<LaptopResponse> {
    anyhow::ensure!(!images.is_empty(), "no images provided");

    let laptop_id = Uuid::new_v4();
    let objects = upload_images(st, laptop_id, images).await?;

    let mut tx = st.db.begin().await.context("begin tx")?;
    let laptop = repo::insert_tx(&mut tx, laptop_id, &fields).await?;
    for (position, object) in objects.iter().enumerate() {
        repo::insert_image_tx(&mut tx, object.id, laptop_id, &object.key, position as i32).await?;
    }
    tx.commit().await.context("commit tx")?;

    info!(laptop_id = %laptop.id, images = objects.len(), "laptop created");
    let images = presign_objects(st, objects).await?;
    Ok(LaptopResponse::from_parts(laptop, images))
}

/// Partial update. A non-empty upload replaces the whole gallery; the old
/// objects are removed from storage only after the commit, so a failed
/// update never loses images.
pub async fn update_laptop(
    st: &AppState,
    id: Uuid,
    changes: UpdateLaptop,
    new_images: Vec<UploadImage>,
) -> anyhow::Result<Option<LaptopResponse>> {
    if repo::get(&st.db, id).await?.is_none() {
        return Ok(None);
    }

    let objects = if new_images.is_empty() {
        Vec::new()
    } else {
        upload_images(st, id, new_images).await?
    };

    let mut tx = st.db.begin().await.context("begin tx")?;
    let Some(laptop) = repo::update_tx(&mut tx, id, &changes).await? else {
        return Ok(None);
    };
    let old_keys = if objects.is_empty() {
        Vec::new()
    } else {
        let old_keys = repo::delete_images_tx(&mut tx, id).await?;
        for (position, object) in objects.iter().enumerate() {
            repo::insert_image_tx(&mut tx, object.id, id, &object.key, position as i32).await?;
        }
        old_keys
    };
    tx.commit().await.context("commit tx")?;

    for key in &old_keys {
        if let Err(err) = st.storage.delete_object(key).await {
            warn!(error = %err, key = %key, "replaced image cleanup failed");
        }
    }

    info!(laptop_id = %laptop.id, replaced_images = old_keys.len(), "laptop updated");
    let images = if objects.is_empty() {
        presign_images(st, repo::list_images(&st.db, id).await?).await?
    } else {
        presign_objects(st, objects).await?
    };
    Ok(Some(LaptopResponse::from_parts(laptop, images)))
}

/// Removes the record, then clears its stored objects best effort; a
/// failed object delete is logged, not surfaced.
pub async fn delete_laptop(st: &AppState, id: Uuid) -> anyhow::Result<bool> {
    let images = repo::list_images(&st.db, id).await?;
    if !repo::delete(&st.db, id).await? {
        return Ok(false);
    }

    for image in &images {
        if let Err(err) = st.storage.delete_object(&image.s3_key).await {
            warn!(error = %err, key = %image.s3_key, "laptop image cleanup failed");
        }
    }
    info!(laptop_id = %id, images = images.len(), "laptop deleted");
    Ok(true)
}

pub async fn list_laptops(st: &AppState) -> anyhow::Result<Vec<LaptopResponse>> {
    let laptops = repo::list(&st.db).await?;
    let ids: Vec<Uuid> = laptops.iter().map(|laptop| laptop.id).collect();

    let mut grouped: HashMap<Uuid, Vec<LaptopImage>> = HashMap::new();
    for image in repo::list_images_for(&st.db, &ids).await? {
        grouped.entry(image.laptop_id).or_default().push(image);
    }

    let mut out = Vec::with_capacity(laptops.len());
    for laptop in laptops {
        let images = grouped.remove(&laptop.id).unwrap_or_default();
        let images = presign_images(st, images).await?;
        out.push(LaptopResponse::from_parts(laptop, images));
    }
    Ok(out)
}

pub async fn get_laptop(st: &AppState, id: Uuid) -> anyhow::Result<Option<LaptopResponse>> {
    let Some(laptop) = repo::get(&st.db, id).await? else {
        return Ok(None);
    };
    let images = presign_images(st, repo::list_images(&st.db, id).await?).await?;
    Ok(Some(LaptopResponse::from_parts(laptop, images)))
}

async fn upload_images(
    st: &AppState,
    laptop_id: Uuid,
    images: Vec<UploadImage>,
) -> anyhow::Result<Vec<StoredObject>> {
    let mut objects = Vec::with_capacity(images.len());
    for image in images {
        let id = Uuid::new_v4();
        let key = object_key(laptop_id, id, &image.content_type);
        st.storage
            .put_object(&key, image.body, &image.content_type)
            .await
            .with_context(|| format!("put_object {}", key))?;
        objects.push(StoredObject { id, key });
    }
    Ok(objects)
}

fn object_key(laptop_id: Uuid, image_id: Uuid, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("laptops/{}/{}.{}", laptop_id, image_id, ext)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

async fn presign_objects(st: &AppState, objects: Vec<StoredObject>) -> anyhow::Result<Vec<ImageRef>> {
    let mut out = Vec::with_capacity(objects.len());
    for object in objects {
        let url = st.storage.presign_get(&object.key, PRESIGN_TTL).await?;
        out.push(ImageRef { id: object.id, url });
    }
    Ok(out)
}

async fn presign_images(st: &AppState, images: Vec<LaptopImage>) -> anyhow::Result<Vec<ImageRef>> {
    let mut out = Vec::with_capacity(images.len());
    for image in images {
        let url = st
            .storage
            .presign_get(&image.s3_key, PRESIGN_TTL)
            .await
            .with_context(|| format!("presign url for s3_key {}", image.s3_key))?;
        out.push(ImageRef { id: image.id, url });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
        assert_eq!(ext_from_mime("whatever/else"), None);
    }

    #[test]
    fn object_keys_group_by_laptop() {
        let laptop_id = Uuid::new_v4();
        let image_id = Uuid::new_v4();

        let key = object_key(laptop_id, image_id, "image/png");
        assert_eq!(key, format!("laptops/{}/{}.png", laptop_id, image_id));

        let fallback = object_key(laptop_id, image_id, "application/pdf");
        assert!(fallback.ends_with(".bin"));
    }

    #[tokio::test]
    async fn presigns_stored_images() {
        let state = AppState::fake();
        let laptop_id = Uuid::new_v4();
        let images = vec![
            LaptopImage {
                id: Uuid::new_v4(),
                laptop_id,
                s3_key: format!("laptops/{}/a.jpg", laptop_id),
                position: 0,
            },
            LaptopImage {
                id: Uuid::new_v4(),
                laptop_id,
                s3_key: format!("laptops/{}/b.png", laptop_id),
                position: 1,
            },
        ];

        let refs = presign_images(&state, images).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs[0].url.contains("a.jpg"));
        assert!(refs[1].url.contains("b.png"));
    }
}
