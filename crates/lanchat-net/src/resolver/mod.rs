//! One-shot address resolution.
//!
//! `ServiceAddressResolver` turns a browse result into the IPv4 endpoint a
//! peer can dial. `LocalListenerAddressResolver` works out the endpoint at
//! which this host's own listener can be reached.

pub mod local;
pub mod service;

pub use local::LocalListenerAddressResolver;
pub use service::{resolve_all, ServiceAddressResolver, DEFAULT_RESOLVE_TIMEOUT};
