use std::time::Duration;

use bson::doc;
use courier_config::Settings;
use mongodb::{Client, Database, options::ClientOptions};
use tracing::info;

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens the pool and pings the notification database.
pub async fn connect(settings: &Settings) -> Result<Database, mongodb::error::Error> {
    let db_settings = &settings.database;
    let mut options = ClientOptions::parse(&db_settings.url).await?;
    options.max_pool_size = db_settings.max_pool_size.or(options.max_pool_size);
    options.min_pool_size = db_settings.min_pool_size.or(options.min_pool_size);
    options.app_name = Some(settings.app.name.clone());
    options
        .server_selection_timeout
        .get_or_insert(SERVER_SELECTION_TIMEOUT);

    let database = Client::with_options(options)?.database(&db_settings.name);
    database.run_command(doc! { "ping": 1 }).await?;

    info!(
        db = %db_settings.name,
        max_pool_size = ?db_settings.max_pool_size,
        "Connected to MongoDB"
    );
    Ok(database)
}
