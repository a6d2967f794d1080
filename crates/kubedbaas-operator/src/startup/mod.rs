//! Startup sequence for the kubedbaas operator
//!
//! Configuration is loaded, every configured endpoint is looked up and
//! registered, and only then is the controller started. Each stage runs to
//! completion before the next begins; any fatal error ends the process.

mod bootstrap;
mod endpoints;
mod lookup;

pub use bootstrap::{
    Bootstrap, BootstrapError, BootstrapPhase, CONFIG_LOAD_ERROR, CONFIG_PARSE_ERROR,
    DBMS_CONN_OPEN_ERROR, MANAGER_RUN_ERROR,
};
pub use endpoints::{register_endpoints, RegistrationError, RegistrationReport, SkippedEntry};
pub use lookup::{DatabaseClassLookup, KubeClassLookup};
