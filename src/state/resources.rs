//! Assignment payload: everything needed to run session hosts for a workload.

use super::SessionHostType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use vmagent_protocol::PortMapping;

/// Outcome of retrieving one kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum ResourceRetrievalResult {
    /// Not attempted.
    #[default]
    Unknown,
    /// Retrieved.
    Success,
    /// Credentials rejected.
    AuthenticationFailure,
    /// Source temporarily unavailable.
    ResourceNotAvailable,
    /// Source does not exist.
    ResourceNotFound,
    /// Source throttled the request.
    TooManyRequests,
    /// Anything else.
    Other,
}

impl ResourceRetrievalResult {
    /// Whether retrieval failed.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Unknown | Self::Success)
    }

    /// Classify an HTTP status code from a download source.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            401 | 403 => Self::AuthenticationFailure,
            404 => Self::ResourceNotFound,
            429 => Self::TooManyRequests,
            500..=599 => Self::ResourceNotAvailable,
            _ => Self::Other,
        }
    }
}

/// Everything the control plane sends with an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionHostsStartInfo {
    /// `{titleId}:{buildId}:{region}`.
    pub assignment_id: String,
    /// Execution backend.
    pub session_host_type: SessionHostType,
    /// Number of session hosts to keep running.
    pub count: u32,
    /// Container image (container hosts).
    #[serde(default)]
    pub image_details: Option<ContainerImageDetails>,
    /// Command line to start the game server (process hosts).
    #[serde(default)]
    pub start_game_command: Option<String>,
    /// Assets downloaded and extracted before start.
    #[serde(default)]
    pub asset_details: Vec<AssetDetail>,
    /// Certificates installed into the shared certificate folder.
    #[serde(default)]
    pub game_certificates: Vec<CertificateDetail>,
    /// Secrets handed to the game server through its config file.
    #[serde(default)]
    pub game_secrets: Vec<GameSecret>,
    /// One list of port mappings per instance slot.
    #[serde(default)]
    pub port_mappings_list: Vec<Vec<PortMapping>>,
    /// Customer-supplied build metadata.
    #[serde(default)]
    pub deployment_metadata: HashMap<String, String>,
    /// Extra environment variables for every session host.
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    /// Overrides the bounded per-state duration limits, in seconds.
    #[serde(default)]
    pub session_host_max_state_duration_secs: Option<u64>,
    /// Script run once on the VM before any session host starts.
    #[serde(default)]
    pub vm_startup_script: Option<String>,
}

impl SessionHostsStartInfo {
    /// Split the assignment id into `(title, build, region)`.
    pub fn assignment_parts(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.assignment_id.splitn(3, ':');
        let title = parts.next()?;
        let build = parts.next()?;
        let region = parts.next()?;
        if title.is_empty() || build.is_empty() || region.is_empty() {
            return None;
        }
        Some((title, build, region))
    }

    /// Port mappings for one instance slot.
    pub fn port_mappings_for(&self, instance_number: u32) -> &[PortMapping] {
        self.port_mappings_list
            .get(instance_number as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Copy with every secret-bearing field nulled.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(image) = copy.image_details.as_mut() {
            image.username = None;
            image.password = None;
        }
        for asset in &mut copy.asset_details {
            asset.sas_token = None;
        }
        for cert in &mut copy.game_certificates {
            cert.pfx_contents = None;
            cert.pem_contents = None;
            cert.password = None;
        }
        for secret in &mut copy.game_secrets {
            secret.value = None;
        }
        copy
    }
}

/// Container image to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImageDetails {
    /// Registry host, e.g. `myregistry.azurecr.io`. Empty for Docker Hub.
    #[serde(default)]
    pub registry: String,
    /// Repository name.
    pub image_name: String,
    /// Tag.
    #[serde(default = "default_tag")]
    pub image_tag: String,
    /// Registry username.
    #[serde(default)]
    pub username: Option<String>,
    /// Registry password.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ContainerImageDetails {
    /// Full image reference, e.g. `registry/name:tag`.
    pub fn reference(&self) -> String {
        if self.registry.is_empty() {
            format!("{}:{}", self.image_name, self.image_tag)
        } else {
            format!("{}/{}:{}", self.registry, self.image_name, self.image_tag)
        }
    }

    /// Whether registry credentials were supplied.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// An asset archive to download and extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetDetail {
    /// Where the extracted contents appear to the game server.
    pub mount_path: String,
    /// Download location without credentials; a URL or a local path.
    pub download_uri: String,
    /// Shared access signature appended to the URI as its query string.
    #[serde(default)]
    pub sas_token: Option<String>,
}

impl AssetDetail {
    /// File name of the archive, taken from the URI path.
    pub fn file_name(&self) -> &str {
        let path = self.download_uri.split('?').next().unwrap_or_default();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// URI with the SAS token appended. Never log this.
    pub fn authorized_uri(&self) -> String {
        match self.sas_token.as_deref() {
            Some(token) if !token.is_empty() => {
                let token = token.trim_start_matches('?');
                let separator = if self.download_uri.contains('?') { '&' } else { '?' };
                format!("{}{}{}", self.download_uri, separator, token)
            }
            _ => self.download_uri.clone(),
        }
    }
}

/// A certificate to install for the game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDetail {
    /// Name the game server looks the certificate up by.
    pub name: String,
    /// Certificate thumbprint.
    pub thumbprint: String,
    /// Base64 PKCS#12 contents.
    #[serde(default)]
    pub pfx_contents: Option<String>,
    /// PEM contents.
    #[serde(default)]
    pub pem_contents: Option<String>,
    /// PKCS#12 password.
    #[serde(default)]
    pub password: Option<String>,
}

/// A named secret for the game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameSecret {
    /// Secret name.
    pub name: String,
    /// Secret value.
    #[serde(default)]
    pub value: Option<String>,
}
