//! Secret handling re-exports, so callers need not depend on secrecy
//! directly.

pub use secrecy::{ExposeSecret, SecretString};
