//! In-memory storage module
//!
//! The dictionary backing each logical database and the glob matcher used to
//! scan it. Independent of protocol and command handling.

mod dict;
mod wildcard;

pub use dict::Dict;
pub use wildcard::Pattern;
