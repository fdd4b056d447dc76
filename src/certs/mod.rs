pub mod authority;
pub mod serial;

pub use authority::CertificateAuthority;
