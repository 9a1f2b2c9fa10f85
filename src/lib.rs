//! Resolves locally installed Binding of Isaac mods against their workshop
//! catalog pages into a deduplicated dependency graph with a load order.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod dates;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod model;
pub mod page;
pub mod paths;
pub mod registry;

pub use catalog::{CancelToken, CatalogClient, CatalogSource};
pub use error::{CatalogError, ResolveError};
pub use graph::{LoadOrder, ModGraph};
pub use model::{Author, Mod, ModId, ModRef, ModWarning};
pub use registry::{ModRegistry, RegistryOptions};
