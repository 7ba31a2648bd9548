// Configuration module
// Profile model, inheritance resolution and config-file loading

mod loader;
pub mod profile;
mod resolve;

pub use loader::{load_profiles, parse_profiles, seed_from_state, Paths, ProfileSet};
pub use profile::{Profile, PropertyKind, Value, PROPERTIES};
pub use resolve::{resolve_inheritance, ResolveError};
