pub mod resolver;
pub mod types;

pub use resolver::{installed_versions, ManifestResolver, ResolveError};
pub use types::*;
