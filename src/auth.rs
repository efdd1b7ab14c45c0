//! Credentials, the service catalog, and single-flight token ownership.

pub mod authority;
pub mod catalog;
pub mod credential;
pub mod keystone;
pub mod secret;

pub use authority::*;
pub use catalog::*;
pub use credential::*;
pub use keystone::*;
pub use secret::*;
