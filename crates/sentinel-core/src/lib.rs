//! # sentinel-core
//!
//! Credential resolution and trial-key lifecycle for the Sentinel Signal
//! connector.
//!
//! Every proxied call asks a [`CredentialResolver`] for a bearer token. The
//! resolver prefers an explicitly configured key, then a cached trial key
//! that is still valid for the configured endpoints, and otherwise mints a
//! fresh trial key through a [`TrialKeyMinter`] and persists it in a
//! [`CredentialCache`]. Call outcomes go through [`classify`] so that every
//! failure reaches the caller as a structured [`ToolResponse`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sentinel_core::{CredentialResolver, Settings, ToolFailure};
//!
//! # async fn example() -> sentinel_core::Result<()> {
//! let settings = Arc::new(Settings::from_env()?);
//! let resolver = CredentialResolver::from_settings(settings)?;
//!
//! match resolver.resolve().await {
//!     Ok(credential) => println!("using {} credential", credential.source),
//!     Err(e) => println!("{:?}", ToolFailure::from(&e).action),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod minter;
pub mod paths;
pub mod record;
pub mod resolver;

pub use cache::{CredentialCache, FileCredentialCache, MemoryCredentialCache};
pub use classify::{
    Action, ErrorCode, Outcome, ToolFailure, ToolResponse, classify, classify_status,
    parse_retry_after,
};
pub use config::Settings;
pub use error::{Error, Result};
pub use minter::{HttpTrialKeyMinter, TrialKeyMinter};
pub use record::{CredentialRecord, Limits};
pub use resolver::{
    CacheState, CredentialResolver, CredentialSource, CredentialStatus, ResolvedCredential,
};
