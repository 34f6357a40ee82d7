pub mod delivery;
pub mod error;
pub mod policy;

pub use delivery::*;
pub use error::*;
pub use policy::*;

/// Matches any service origin or channel in a configuration row
pub const WILDCARD: &str = "*";
