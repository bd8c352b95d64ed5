//! Credential transport and storage for the admin session layer
//!
//! Leaf crate with no session logic: it knows how to talk to the credential
//! endpoints and how to persist the session material, nothing more.
//!
//! - `api::AuthApi` performs login, refresh and logout against the API
//! - `credentials::CredentialStore` persists the token pair and principal
//!   over a pluggable `KeyValueStore` (memory or JSON file)
//! - `principal` defines the identity record and its role

pub mod api;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod principal;

pub use api::{ApiEnvelope, AuthApi, LoginResponse, TokenPair, decode_envelope, error_message};
pub use constants::*;
pub use credentials::{CredentialPair, CredentialStore, FileStore, KeyValueStore, MemoryStore};
pub use error::{Error, Result};
pub use principal::{Principal, Role};
