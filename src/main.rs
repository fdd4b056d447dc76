// src/main.rs

//! # VASP Directory - Main Entry Point
//!
//! Initializes the directory components and starts the API server.
//!
//! ## Architecture Overview
//! 1. **Storage Layer**: `Store` backend selected by the `database` DSN
//! 2. **Certificate Layer**: local certificate authority that signs identity certificates
//! 3. **Authority Layer**: authenticated client for the external issuing authority
//! 4. **Services Layer**: directory orchestration and HTTP/JSON endpoints
//!
//! ## Environment Variables
//! - `VASPDIR_DATABASE`: store connection string (required), e.g. `file:///var/lib/vaspdir`
//! - `VASPDIR_BIND_ADDR`: listen address (default: 127.0.0.1:4433)
//! - `VASPDIR_CA__CERT_PATH` / `VASPDIR_CA__KEY_PATH`: signing certificate and key
//! - `VASPDIR_CA__INIT`: generate a root CA when the files are missing
//! - `AUTHORITY_USERNAME` / `AUTHORITY_PASSWORD`: external authority credentials
//! - `RUST_LOG`: log filter (default: info)

use crate::authority::AuthorityClient;
use crate::certs::CertificateAuthority;
use crate::config::Settings;
use crate::error::Error;
use crate::services::api_server::ApiServer;
use crate::services::directory::DirectoryService;
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod authority; // external certificate authority client
mod certs; // local certificate authority
mod config; // runtime settings
mod error; // error taxonomy
mod models; // data structures
mod services; // business logic and API
mod storage; // directory store backends
mod utils; // helper functions

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment configuration
/// 2. Open the directory store
/// 3. Load (or bootstrap) the certificate authority
/// 4. Connect the external authority client
/// 5. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load()?;
    let store = storage::open(&settings.database).await?;

    if settings.ca.init && !settings.ca.cert_path.exists() && !settings.ca.key_path.exists() {
        CertificateAuthority::generate_root(&settings.ca.cert_path, &settings.ca.key_path, false)?;
    }

    // Verification is disabled, not fatal, when no signing material is available
    let ca = match CertificateAuthority::load(&settings.ca.cert_path, &settings.ca.key_path) {
        Ok(ca) => Some(Arc::new(ca)),
        Err(e) => {
            error!("certificate authority not loaded, verify is disabled: {}", e);
            None
        }
    };

    let authority = match AuthorityClient::connect(
        &settings.authority.base_url,
        settings.request_timeout(),
        &settings.authority.username,
        &settings.authority.password,
    ) {
        Ok(client) => {
            info!("authority client ready for {}", settings.authority.base_url);
            Some(client)
        }
        Err(Error::Configuration(reason)) => {
            warn!("authority routes disabled: {}", reason);
            None
        }
        Err(e) => return Err(e.into()),
    };

    let directory = DirectoryService::new(store, ca);
    let api_server = ApiServer::new(directory, authority, settings.request_timeout());

    api_server.run(settings.bind_addr()?).await?;
    Ok(())
}
