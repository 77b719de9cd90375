//! Platform resolution: OS family, GPU driver discovery and build variant selection.

pub mod gpu;
pub mod os;
pub mod paths;
pub mod search_path;
pub mod variant;

pub use os::Os;
pub use variant::{BuildVariant, PostLinkFixup, Resolution, VariantRecipe, resolve_variant};
