//! histdb Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the histdb workspace:
//!
//! - **Error Handling**: the base error and result types
//! - **Logging**: tracing subscriber configuration and initialization
//! - **Types**: shared domain types (asset identity, assets-modified set)

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HistdbError, Result};
pub use types::{Asset, AssetsModified};
