//! Common test utilities and fixtures.

pub mod fake;
pub mod fixtures;

#[allow(unused_imports)]
pub use fake::*;
#[allow(unused_imports)]
pub use fixtures::*;
