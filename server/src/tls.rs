//! TLS material loading, kept thin: parsing and cert/key loading only,
//! no certificate generation or rotation (§1 Non-goals: "TLS certificate
//! loading" is an external collaborator; we still need *something* to
//! build a `rustls::ServerConfig` from operator-supplied files).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read TLS material at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

pub fn load_server_config(cert_path: &str, key_path: &str) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let cert_file = File::open(cert_path).map_err(|e| TlsError::Io {
        path: cert_path.to_string(),
        source: e,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Io {
            path: cert_path.to_string(),
            source: e,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_string()));
    }

    let key_file = File::open(key_path).map_err(|e| TlsError::Io {
        path: key_path.to_string(),
        source: e,
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| TlsError::Io {
            path: key_path.to_string(),
            source: e,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}
