//! Academic guidance portal core: who needs an advisor, when they can meet,
//! and who is allowed to change either.

pub mod auth;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod guidance;
pub mod identity;
pub mod locks;
pub mod models;
pub mod portal;
pub mod report;
pub mod retry;
pub mod roster;
pub mod scheduler;
pub mod store;

pub use config::PortalConfig;
pub use error::{PortalError, PortalResult};
pub use portal::Portal;
