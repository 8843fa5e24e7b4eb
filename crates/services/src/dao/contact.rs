use async_trait::async_trait;
use bson::doc;
use courier_db::models::UserContact;
use mongodb::Database;

use super::base::{BaseDao, DaoResult};
use crate::store::ContactBook;

pub struct ContactDao {
    pub base: BaseDao<UserContact>,
}

impl ContactDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, UserContact::COLLECTION),
        }
    }
}

#[async_trait]
impl ContactBook for ContactDao {
    async fn lookup(&self, user_id: &str) -> DaoResult<Option<UserContact>> {
        self.base.find_one(doc! { "_id": user_id }).await
    }
}
