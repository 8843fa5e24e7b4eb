use async_trait::async_trait;
use bson::doc;
use courier_db::models::UserPreferences;
use mongodb::Database;

use super::base::{BaseDao, DaoResult};
use crate::store::PreferenceSource;

/// Read-only view of the settings store's `user_preferences` collection.
pub struct PreferenceDao {
    pub base: BaseDao<UserPreferences>,
}

impl PreferenceDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, UserPreferences::COLLECTION),
        }
    }
}

#[async_trait]
impl PreferenceSource for PreferenceDao {
    async fn fetch(&self, user_id: &str) -> DaoResult<Option<UserPreferences>> {
        self.base.find_one(doc! { "_id": user_id }).await
    }
}
