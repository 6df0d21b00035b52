//! Data model and host capability traits shared by the callscope crates.

mod capability;
mod primitives;
mod record;

pub use facet_value;

pub use capability::*;
pub use primitives::*;
pub use record::*;
