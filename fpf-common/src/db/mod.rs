//! Database initialization and schema introspection

pub mod init;
pub mod introspect;

pub use init::*;
pub use introspect::*;
