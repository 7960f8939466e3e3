//! lanchat-core: shared value types, error kinds, and configuration.
//! All other LanChat crates depend on this one.

pub mod config;
pub mod error;
pub mod host;

pub use config::{ConfigError, LanchatConfig};
pub use error::{ResolveError, TransportError};
pub use host::{Host, HostParseError, ServiceRecord, ServiceType, SERVICE_DOMAIN, SERVICE_TYPE};
