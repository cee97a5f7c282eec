pub mod identity;

pub use identity::{IdentityError, ServiceIdentity};
