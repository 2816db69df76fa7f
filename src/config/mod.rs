pub mod consts;
pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{CliOverrides, load};
pub use models::*;
pub use validation::{AppConfigValidator, ValidationError, ValidationResult};
