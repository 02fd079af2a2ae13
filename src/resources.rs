//! Asset downloads and certificate installation.
//!
//! Both are reached through small traits so the lifecycle manager can be
//! driven in tests without network access. Every failure is an
//! [`Error::Retrieval`] carrying the classified outcome that ends up in the
//! persisted state.

use crate::error::{Error, Result};
use crate::state::{AssetDetail, CertificateDetail, ResourceRetrievalResult};
use base64::Engine;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Timeout for a single asset download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fetches an asset archive to a local file.
pub trait AssetRetriever: Send + Sync {
    /// Download `asset` to `destination`.
    fn download(&self, asset: &AssetDetail, destination: &Path) -> Result<()>;
}

/// Installs certificates into a folder game servers can read.
pub trait CertificateInstaller: Send + Sync {
    /// Write every certificate into `folder`.
    fn install(&self, certificates: &[CertificateDetail], folder: &Path) -> Result<()>;
}

/// File a certificate is installed as. PEM wins over PKCS#12.
pub fn certificate_file_name(cert: &CertificateDetail) -> String {
    if cert.pem_contents.is_some() {
        format!("{}.pem", cert.name)
    } else {
        format!("{}.pfx", cert.name)
    }
}

/// [`AssetRetriever`] over HTTP(S), with local paths and `file://` URIs
/// copied directly.
pub struct HttpAssetRetriever {
    client: reqwest::blocking::Client,
}

impl HttpAssetRetriever {
    /// Create a retriever.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| Error::retrieval("asset", ResourceRetrievalResult::Other, e.to_string()))?;
        Ok(Self { client })
    }

    fn copy_local(source: &Path, destination: &Path) -> Result<()> {
        match std::fs::copy(source, destination) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::retrieval(
                "asset",
                ResourceRetrievalResult::ResourceNotFound,
                format!("{} does not exist", source.display()),
            )),
            Err(e) => Err(Error::retrieval(
                "asset",
                ResourceRetrievalResult::Other,
                e.to_string(),
            )),
        }
    }
}

impl AssetRetriever for HttpAssetRetriever {
    fn download(&self, asset: &AssetDetail, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let uri = asset.download_uri.as_str();
        if let Some(local) = uri.strip_prefix("file://") {
            return Self::copy_local(Path::new(local), destination);
        }
        if !uri.starts_with("http://") && !uri.starts_with("https://") {
            return Self::copy_local(Path::new(uri), destination);
        }

        // Log the URI without its SAS token.
        tracing::info!(uri = %asset.download_uri, "downloading asset");
        let mut response = self.client.get(asset.authorized_uri()).send().map_err(|e| {
            let outcome = if e.is_timeout() || e.is_connect() {
                ResourceRetrievalResult::ResourceNotAvailable
            } else {
                ResourceRetrievalResult::Other
            };
            // reqwest errors embed the full URL; strip it so the token never
            // reaches a log line.
            Error::retrieval("asset", outcome, e.without_url().to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::retrieval(
                "asset",
                ResourceRetrievalResult::from_http_status(status.as_u16()),
                format!("{} returned {}", asset.download_uri, status),
            ));
        }

        let mut file = std::fs::File::create(destination)?;
        response
            .copy_to(&mut file)
            .map_err(|e| Error::retrieval("asset", ResourceRetrievalResult::Other, e.without_url().to_string()))?;
        file.flush()?;
        Ok(())
    }
}

/// [`CertificateInstaller`] writing PEM and PKCS#12 files to disk.
#[derive(Debug, Default, Clone)]
pub struct LocalCertificateInstaller;

impl LocalCertificateInstaller {
    /// Create an installer.
    pub fn new() -> Self {
        Self
    }
}

impl CertificateInstaller for LocalCertificateInstaller {
    fn install(&self, certificates: &[CertificateDetail], folder: &Path) -> Result<()> {
        std::fs::create_dir_all(folder)?;

        for cert in certificates {
            let contents = match (&cert.pem_contents, &cert.pfx_contents) {
                (Some(pem), _) => pem.as_bytes().to_vec(),
                (None, Some(pfx)) => base64::engine::general_purpose::STANDARD
                    .decode(pfx.trim())
                    .map_err(|e| {
                        Error::retrieval(
                            "certificate",
                            ResourceRetrievalResult::Other,
                            format!("certificate {} is not valid base64: {}", cert.name, e),
                        )
                    })?,
                (None, None) => {
                    return Err(Error::retrieval(
                        "certificate",
                        ResourceRetrievalResult::ResourceNotFound,
                        format!("certificate {} has no contents", cert.name),
                    ))
                }
            };

            let path = folder.join(certificate_file_name(cert));
            std::fs::write(&path, contents).map_err(|e| {
                Error::retrieval(
                    "certificate",
                    ResourceRetrievalResult::Other,
                    format!("write {}: {}", path.display(), e),
                )
            })?;
            tracing::debug!(name = %cert.name, thumbprint = %cert.thumbprint, "installed certificate");
        }
        Ok(())
    }
}
