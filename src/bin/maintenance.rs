use std::collections::{HashMap, HashSet};
use std::env;

use anyhow::{Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use propdesk::{
    attachments::EntityType,
    config::AppConfig,
    db,
    models::Document,
    s3,
    schema::documents,
    storage::{ObjectStorage, S3Storage},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("prune-profile-images") => prune_profile_images().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance prune-profile-images");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance prune-profile-images");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Removes every profile image except the newest one per user.
async fn prune_profile_images() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;

    let s3_client = s3::build_client(&config).await?;
    let storage = S3Storage::new(s3_client, config.s3_bucket.clone());

    let mut conn = pool.get().context("failed to get database connection")?;

    let profile_images: Vec<Document> = documents::table
        .filter(documents::entity_type.eq(EntityType::User.as_str()))
        .filter(documents::is_profile_image.eq(true))
        .order((
            documents::entity_id.asc(),
            documents::uploaded_at.desc(),
            documents::id.desc(),
        ))
        .load(&mut conn)
        .context("failed to load profile images")?;

    let mut current: HashMap<Uuid, &Document> = HashMap::new();
    let mut stale: Vec<&Document> = Vec::new();
    for document in &profile_images {
        if current.contains_key(&document.entity_id) {
            stale.push(document);
        } else {
            current.insert(document.entity_id, document);
        }
    }

    if stale.is_empty() {
        println!("No superseded profile images found.");
        return Ok(());
    }

    println!("Pruning {} superseded profile images…", stale.len());

    // Profile keys are reused per user, so a stale row may point at the live blob.
    let live_keys: HashSet<&str> = current.values().map(|doc| doc.s3_key.as_str()).collect();
    for document in &stale {
        if live_keys.contains(document.s3_key.as_str()) {
            continue;
        }
        if let Err(err) = storage.delete_object(&document.s3_key).await {
            eprintln!(
                "Failed to delete object {} from storage: {err}",
                document.s3_key
            );
        }
    }

    let stale_ids: Vec<Uuid> = stale.iter().map(|doc| doc.id).collect();
    let removed = diesel::delete(documents::table.filter(documents::id.eq_any(stale_ids)))
        .execute(&mut conn)
        .context("failed to remove profile image records")?;

    println!("Removed {removed} profile image records.");
    Ok(())
}
