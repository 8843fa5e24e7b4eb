use serde::{Deserialize, Serialize};

/// Delivery addresses for a user, read from the user directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserContact {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl UserContact {
    pub const COLLECTION: &'static str = "users";
}
