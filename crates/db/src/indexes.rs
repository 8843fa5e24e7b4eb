use std::time::Duration;

use mongodb::{Database, IndexModel, options::IndexOptions};
use tracing::info;

use crate::models::Notification;

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Notifications
    create_indexes(
        db,
        Notification::COLLECTION,
        vec![
            index(bson::doc! { "user_id": 1, "created_at": -1 }),
            index(bson::doc! { "user_id": 1, "notification_type": 1, "created_at": -1 }),
            index(bson::doc! { "user_id": 1, "read_status": 1, "created_at": -1 }),
            index(bson::doc! { "user_id": 1, "status": 1, "created_at": -1 }),
            index_ttl(bson::doc! { "expires_at": 1 }),
            index(bson::doc! { "grouping.group_id": 1 }),
            index(bson::doc! { "grouping.batch_id": 1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

/// Documents are removed by the server once `expires_at` has passed; the
/// retention sweeper still runs because TTL monitors only wake once a minute.
fn index_ttl(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .expire_after(Duration::from_secs(0))
                .build(),
        )
        .build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    db.collection::<bson::Document>(collection)
        .create_indexes(indexes)
        .await?;
    info!(collection, "Indexes created");
    Ok(())
}
