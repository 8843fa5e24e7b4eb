pub mod contact;
pub mod notification;
pub mod preference;

pub use contact::UserContact;
pub use notification::*;
pub use preference::*;
