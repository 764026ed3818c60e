use crate::config::Config;
use crate::error::ServerError;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Builds the acceptor from the PEM files named in `config`.
pub(crate) fn acceptor(config: &Config) -> Result<TlsAcceptor, ServerError> {
    let (Some(cert_file), Some(key_file)) = (&config.cert_file, &config.key_file) else {
        return Err(ServerError::tls("tls is enabled but cert_file or key_file is missing"));
    };

    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let mut tls_config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(ServerError::tls)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(ServerError::tls)?;
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn open(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path).map(BufReader::new).map_err(|e| ServerError::tls(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ServerError::tls(format!("no certificate found in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| ServerError::tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| ServerError::tls(format!("no private key found in {}", path.display())))
}
