use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use super::{Error, Result};

/// Client TLS material for a TCP Docker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA bundle the daemon certificate is verified against.
    pub ca: PathBuf,
    /// Client certificate chain.
    pub certificate: PathBuf,
    /// Private key of the client certificate.
    pub key: PathBuf,
}

impl TlsConfig {
    /// Uses the `ca.pem`, `cert.pem` and `key.pem` files in `dir`, the layout
    /// of `DOCKER_CERT_PATH`.
    pub fn from_cert_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            ca: dir.join("ca.pem"),
            certificate: dir.join("cert.pem"),
            key: dir.join("key.pem"),
        }
    }

    /// Loads and validates all files into a rustls client configuration.
    ///
    /// # Errors
    ///
    /// Fails if any file cannot be opened, contains no usable PEM entries, or
    /// the certificate and key do not form a valid client identity.
    pub(crate) fn load(&self) -> Result<Arc<rustls::ClientConfig>> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&self.ca)? {
            roots.add(cert).map_err(|source| Error::TlsCa {
                path: self.ca.clone(),
                source,
            })?;
        }
        let certs = load_certs(&self.certificate)?;
        let key = load_key(&self.key)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(Error::TlsSetup)?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(Error::TlsSetup)?;

        Ok(Arc::new(config))
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|source| Error::PemRead {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(Error::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| Error::PemRead {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| Error::NoPrivateKey {
            path: path.to_path_buf(),
        })
}
