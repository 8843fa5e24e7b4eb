pub mod base;
pub mod contact;
pub mod notification;
pub mod preference;

pub use base::BaseDao;
pub use contact::ContactDao;
pub use notification::NotificationDao;
pub use preference::PreferenceDao;
