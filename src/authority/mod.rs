//! Session management and API access for the external certificate-issuing authority.

pub mod client;
pub mod credentials;
pub mod endpoints;
pub mod serializers;

pub use client::AuthorityClient;
pub use credentials::Credentials;
