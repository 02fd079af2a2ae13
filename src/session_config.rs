//! Per-instance configuration handed to a game server.
//!
//! Every session host gets environment variables and a `gsdkConfig.json`
//! describing where to heartbeat, where its folders are and which ports it
//! owns. Containers see fixed paths under `/data`; processes see the VM
//! paths directly.

use crate::config::{AgentSettings, VmConfiguration};
use crate::error::{Error, Result};
use crate::resources::certificate_file_name;
use crate::runner::{LaunchSpec, VolumeMount};
use crate::state::{AssetDetail, SessionHostType, SessionHostsStartInfo};
use crate::system::SystemOperations;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the config file the game server SDK reads at startup.
pub const GSDK_CONFIG_FILE_NAME: &str = "gsdkConfig.json";

/// Environment variable pointing at the config file.
pub const GSDK_CONFIG_FILE_ENV: &str = "GSDK_CONFIG_FILE";

const CONTAINER_LOGS: &str = "/data/GameLogs";
const CONTAINER_CERTIFICATES: &str = "/data/GameCertificates";
const CONTAINER_SHARED_CONTENT: &str = "/data/GameSharedContent";
const CONTAINER_CONFIG: &str = "/data/Config";

/// Contents of `gsdkConfig.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GsdkConfiguration {
    /// `host:port` of the heartbeat endpoint.
    pub heartbeat_endpoint: String,
    /// Heartbeat identity.
    pub session_host_id: String,
    /// VM id.
    pub vm_id: String,
    /// Folder the game server writes logs to.
    pub log_folder: String,
    /// Read-shared content folder.
    pub shared_content_folder: String,
    /// Folder holding installed certificates.
    pub certificate_folder: String,
    /// Certificate name to file path.
    pub game_certificates: BTreeMap<String, String>,
    /// Customer build metadata.
    pub build_metadata: BTreeMap<String, String>,
    /// Port name to the port the game server should bind.
    pub game_ports: BTreeMap<String, String>,
    /// Public address of the VM.
    #[serde(default)]
    pub public_ip_v4_address: Option<String>,
    /// Fully qualified domain name of the VM.
    #[serde(default)]
    pub fully_qualified_domain_name: Option<String>,
    /// Title id.
    pub title_id: String,
    /// Build id.
    pub build_id: String,
    /// Region.
    pub region: String,
    /// Slot on the VM.
    pub server_instance_number: u32,
    /// Secret name to value.
    pub game_secrets: BTreeMap<String, String>,
}

/// Folders as the game server sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GuestPaths {
    logs: String,
    certificates: String,
    shared_content: String,
    config_dir: String,
}

/// Builds everything one session host needs to start.
pub struct SessionHostConfiguration<'a> {
    vm: &'a VmConfiguration,
    settings: &'a AgentSettings,
    start_info: &'a SessionHostsStartInfo,
}

impl<'a> SessionHostConfiguration<'a> {
    /// Configuration for hosts of `start_info` on `vm`.
    pub fn new(
        vm: &'a VmConfiguration,
        settings: &'a AgentSettings,
        start_info: &'a SessionHostsStartInfo,
    ) -> Self {
        Self {
            vm,
            settings,
            start_info,
        }
    }

    fn host_type(&self) -> SessionHostType {
        self.start_info.session_host_type
    }

    fn guest_paths(&self, instance_number: u32, log_folder_id: &str) -> GuestPaths {
        let dirs = &self.vm.directories;
        match self.host_type() {
            SessionHostType::Container => GuestPaths {
                logs: CONTAINER_LOGS.to_string(),
                certificates: CONTAINER_CERTIFICATES.to_string(),
                shared_content: CONTAINER_SHARED_CONTENT.to_string(),
                config_dir: CONTAINER_CONFIG.to_string(),
            },
            SessionHostType::Process => GuestPaths {
                logs: path_string(&dirs.logs(log_folder_id)),
                certificates: path_string(&dirs.certificates()),
                shared_content: path_string(&dirs.shared_content()),
                config_dir: path_string(&dirs.instance_config(instance_number)),
            },
        }
    }

    fn heartbeat_endpoint(&self) -> String {
        let host = match self.host_type() {
            SessionHostType::Container => self.settings.container_heartbeat_host.as_str(),
            SessionHostType::Process => "localhost",
        };
        format!("{}:{}", host, self.vm.agent_port)
    }

    /// Folder a process host's copy of `asset` is extracted into.
    pub fn process_asset_dir(&self, instance_number: u32, asset: &AssetDetail) -> PathBuf {
        self.vm
            .directories
            .instance(instance_number)
            .join(asset.mount_path.trim_start_matches('/'))
    }

    /// The `gsdkConfig.json` contents for one host.
    pub fn gsdk_config(
        &self,
        unique_id: &str,
        instance_number: u32,
        log_folder_id: &str,
    ) -> Result<GsdkConfiguration> {
        let (title_id, build_id, region) = self.start_info.assignment_parts().ok_or_else(|| {
            Error::InvalidStartInfo(format!(
                "malformed assignment id '{}'",
                self.start_info.assignment_id
            ))
        })?;
        let paths = self.guest_paths(instance_number, log_folder_id);

        let game_certificates = self
            .start_info
            .game_certificates
            .iter()
            .map(|cert| {
                let file = format!("{}/{}", paths.certificates, certificate_file_name(cert));
                (cert.name.clone(), file)
            })
            .collect();

        let game_ports = self
            .start_info
            .port_mappings_for(instance_number)
            .iter()
            .map(|mapping| {
                // Processes bind the VM port directly; containers bind their
                // own port behind the published one.
                let port = match self.host_type() {
                    SessionHostType::Container => mapping.game_port.number,
                    SessionHostType::Process => mapping.node_port,
                };
                (mapping.game_port.name.clone(), port.to_string())
            })
            .collect();

        let game_secrets = self
            .start_info
            .game_secrets
            .iter()
            .map(|s| (s.name.clone(), s.value.clone().unwrap_or_default()))
            .collect();

        Ok(GsdkConfiguration {
            heartbeat_endpoint: self.heartbeat_endpoint(),
            session_host_id: unique_id.to_string(),
            vm_id: self.vm.vm_id.clone(),
            log_folder: paths.logs,
            shared_content_folder: paths.shared_content,
            certificate_folder: paths.certificates,
            game_certificates,
            build_metadata: self
                .start_info
                .deployment_metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            game_ports,
            public_ip_v4_address: self.vm.public_ipv4_address.clone(),
            fully_qualified_domain_name: self.vm.fqdn.clone(),
            title_id: title_id.to_string(),
            build_id: build_id.to_string(),
            region: region.to_string(),
            server_instance_number: instance_number,
            game_secrets,
        })
    }

    /// Environment variables for one host.
    ///
    /// Assignment-supplied variables come first so the agent's own values
    /// win on a name clash.
    pub fn environment(
        &self,
        unique_id: &str,
        instance_number: u32,
        log_folder_id: &str,
    ) -> Vec<(String, String)> {
        let paths = self.guest_paths(instance_number, log_folder_id);
        let mut env: Vec<(String, String)> = self
            .start_info
            .environment_variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        let (title, build, region) = self.start_info.assignment_parts().unwrap_or_default();
        let config_file = format!("{}/{}", paths.config_dir, GSDK_CONFIG_FILE_NAME);

        env.extend([
            (GSDK_CONFIG_FILE_ENV.to_string(), config_file),
            ("PF_VM_ID".to_string(), self.vm.vm_id.clone()),
            ("PF_TITLE_ID".to_string(), title.to_string()),
            ("PF_BUILD_ID".to_string(), build.to_string()),
            ("PF_REGION".to_string(), region.to_string()),
            ("PF_SERVER_INSTANCE_NUMBER".to_string(), instance_number.to_string()),
            ("PF_SESSION_HOST_ID".to_string(), unique_id.to_string()),
            ("CERTIFICATE_FOLDER".to_string(), paths.certificates),
            ("PF_SHARED_CONTENT_FOLDER".to_string(), paths.shared_content),
            ("PF_SERVER_LOG_DIRECTORY".to_string(), paths.logs),
        ]);
        if let Some(ip) = &self.vm.public_ipv4_address {
            env.push(("PUBLIC_IPV4_ADDRESS".to_string(), ip.clone()));
        }
        env
    }

    fn mounts(&self, instance_number: u32, log_folder_id: &str) -> Vec<VolumeMount> {
        if self.host_type() != SessionHostType::Container {
            return Vec::new();
        }
        let dirs = &self.vm.directories;
        let mut mounts = vec![
            VolumeMount {
                host_path: dirs.logs(log_folder_id),
                guest_path: CONTAINER_LOGS.to_string(),
                read_only: false,
            },
            VolumeMount {
                host_path: dirs.certificates(),
                guest_path: CONTAINER_CERTIFICATES.to_string(),
                read_only: true,
            },
            VolumeMount {
                host_path: dirs.shared_content(),
                guest_path: CONTAINER_SHARED_CONTENT.to_string(),
                read_only: true,
            },
            VolumeMount {
                host_path: dirs.instance_config(instance_number),
                guest_path: CONTAINER_CONFIG.to_string(),
                read_only: true,
            },
        ];
        for (index, asset) in self.start_info.asset_details.iter().enumerate() {
            mounts.push(VolumeMount {
                host_path: dirs.asset(index),
                guest_path: asset.mount_path.clone(),
                read_only: true,
            });
        }
        mounts
    }

    /// Write the config file and assemble the launch spec for one host.
    pub fn prepare_launch(
        &self,
        system: &dyn SystemOperations,
        unique_id: &str,
        instance_number: u32,
        log_folder_id: &str,
    ) -> Result<LaunchSpec> {
        let dirs = &self.vm.directories;
        let config = self.gsdk_config(unique_id, instance_number, log_folder_id)?;
        let json = serde_json::to_vec_pretty(&config)
            .map_err(|e| Error::runner("write config", e.to_string()))?;

        system.create_dir(&dirs.logs(log_folder_id))?;
        system.create_dir(&dirs.dumps(log_folder_id))?;
        system.write_file(
            &dirs.instance_config(instance_number).join(GSDK_CONFIG_FILE_NAME),
            &json,
        )?;

        Ok(LaunchSpec {
            unique_id: unique_id.to_string(),
            assignment_id: self.start_info.assignment_id.clone(),
            instance_number,
            image: self.start_info.image_details.as_ref().map(|i| i.reference()),
            start_command: self.start_info.start_game_command.clone(),
            environment: self.environment(unique_id, instance_number, log_folder_id),
            port_mappings: self.start_info.port_mappings_for(instance_number).to_vec(),
            mounts: self.mounts(instance_number, log_folder_id),
            working_dir: dirs.instance(instance_number),
            log_folder: dirs.logs(log_folder_id),
        })
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmDirectories;
    use crate::state::{CertificateDetail, ContainerImageDetails, GameSecret};
    use crate::system::LocalSystemOperations;
    use std::collections::HashMap;
    use vmagent_protocol::{GamePort, PortMapping};

    fn vm(root: &Path) -> VmConfiguration {
        VmConfiguration {
            vm_id: "vm-7".into(),
            public_ipv4_address: Some("20.1.2.3".into()),
            fqdn: None,
            agent_port: 56001,
            directories: VmDirectories::new(root),
        }
    }

    fn start_info(host_type: SessionHostType) -> SessionHostsStartInfo {
        SessionHostsStartInfo {
            assignment_id: "title1:build1:westus".into(),
            session_host_type: host_type,
            count: 2,
            image_details: Some(ContainerImageDetails {
                registry: "registry.example.com".into(),
                image_name: "game".into(),
                image_tag: "v1".into(),
                username: None,
                password: None,
            }),
            start_game_command: Some("./server".into()),
            asset_details: vec![AssetDetail {
                mount_path: "/data/assets".into(),
                download_uri: "https://acct.blob.core.windows.net/a/assets.zip".into(),
                sas_token: None,
            }],
            game_certificates: vec![CertificateDetail {
                name: "tls".into(),
                thumbprint: "AB".into(),
                pfx_contents: None,
                pem_contents: Some("-----BEGIN CERTIFICATE-----".into()),
                password: None,
            }],
            game_secrets: vec![GameSecret {
                name: "apiKey".into(),
                value: Some("s3cr3t".into()),
            }],
            port_mappings_list: vec![
                vec![],
                vec![PortMapping {
                    public_port: 30000,
                    node_port: 30001,
                    game_port: GamePort {
                        name: "game".into(),
                        number: 7777,
                        protocol: "UDP".into(),
                    },
                }],
            ],
            deployment_metadata: HashMap::from([("mode".to_string(), "ranked".to_string())]),
            environment_variables: HashMap::from([
                ("MAP".to_string(), "dust".to_string()),
                ("PF_VM_ID".to_string(), "spoofed".to_string()),
            ]),
            session_host_max_state_duration_secs: None,
            vm_startup_script: None,
        }
    }

    #[test]
    fn test_container_config_uses_guest_paths() {
        let vm = vm(Path::new("/agent"));
        let settings = AgentSettings::default();
        let info = start_info(SessionHostType::Container);
        let config = SessionHostConfiguration::new(&vm, &settings, &info);

        let gsdk = config.gsdk_config("host-1", 1, "log-1").unwrap();
        assert_eq!(gsdk.heartbeat_endpoint, "172.17.0.1:56001");
        assert_eq!(gsdk.log_folder, "/data/GameLogs");
        assert_eq!(gsdk.game_certificates["tls"], "/data/GameCertificates/tls.pem");
        assert_eq!(gsdk.game_ports["game"], "7777");
        assert_eq!(gsdk.title_id, "title1");
        assert_eq!(gsdk.region, "westus");
        assert_eq!(gsdk.game_secrets["apiKey"], "s3cr3t");
    }

    #[test]
    fn test_process_config_uses_vm_paths_and_node_ports() {
        let vm = vm(Path::new("/agent"));
        let settings = AgentSettings::default();
        let info = start_info(SessionHostType::Process);
        let config = SessionHostConfiguration::new(&vm, &settings, &info);

        let gsdk = config.gsdk_config("host-1", 1, "log-1").unwrap();
        assert_eq!(gsdk.heartbeat_endpoint, "localhost:56001");
        assert_eq!(gsdk.log_folder, "/agent/logs/log-1");
        assert_eq!(gsdk.game_ports["game"], "30001");
        assert_eq!(
            config.process_asset_dir(1, &info.asset_details[0]),
            PathBuf::from("/agent/instances/1/data/assets")
        );
    }

    #[test]
    fn test_agent_environment_wins() {
        let vm = vm(Path::new("/agent"));
        let settings = AgentSettings::default();
        let info = start_info(SessionHostType::Container);
        let config = SessionHostConfiguration::new(&vm, &settings, &info);

        let env: HashMap<_, _> = config.environment("host-1", 0, "log-1").into_iter().collect();
        assert_eq!(env["PF_VM_ID"], "vm-7");
        assert_eq!(env["MAP"], "dust");
        assert_eq!(env["PF_SESSION_HOST_ID"], "host-1");
        assert_eq!(env["PUBLIC_IPV4_ADDRESS"], "20.1.2.3");
        assert_eq!(env[GSDK_CONFIG_FILE_ENV], "/data/Config/gsdkConfig.json");
    }

    #[test]
    fn test_prepare_launch_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let vm = vm(dir.path());
        let settings = AgentSettings::default();
        let info = start_info(SessionHostType::Container);
        let config = SessionHostConfiguration::new(&vm, &settings, &info);

        let launch = config
            .prepare_launch(&LocalSystemOperations::new(), "host-1", 1, "log-1")
            .unwrap();
        assert_eq!(launch.image.as_deref(), Some("registry.example.com/game:v1"));
        assert_eq!(launch.port_mappings.len(), 1);
        assert!(launch
            .mounts
            .iter()
            .any(|m| m.guest_path == "/data/assets" && m.read_only));

        let written = std::fs::read(
            vm.directories
                .instance_config(1)
                .join(GSDK_CONFIG_FILE_NAME),
        )
        .unwrap();
        let parsed: GsdkConfiguration = serde_json::from_slice(&written).unwrap();
        assert_eq!(parsed.session_host_id, "host-1");
        assert!(vm.directories.dumps("log-1").is_dir());
    }

    #[test]
    fn test_malformed_assignment_id_is_rejected() {
        let vm = vm(Path::new("/agent"));
        let settings = AgentSettings::default();
        let mut info = start_info(SessionHostType::Process);
        info.assignment_id = "only-title".into();
        let config = SessionHostConfiguration::new(&vm, &settings, &info);
        assert!(matches!(
            config.gsdk_config("h", 0, "l"),
            Err(Error::InvalidStartInfo(_))
        ));
    }
}
