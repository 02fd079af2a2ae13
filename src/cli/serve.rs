//! Agent server command.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use vmagent::api::state::ApiState;
use vmagent::api::supervisor::Supervisor;
use vmagent::config::{AgentSettings, VmConfiguration};
use vmagent::lifecycle::{AgentContext, SessionHostsManager};
use vmagent::resources::{HttpAssetRetriever, LocalCertificateInstaller};
use vmagent::runner::{ContainerRunner, ProcessRunner, Runners};
use vmagent::system::LocalSystemOperations;
use vmagent::{Error, Result};

use super::parsers::{parse_duration, parse_listen};

/// Run the agent: HTTP API, session host supervision and persistence.
#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Settings file (TOML). Defaults to the platform config directory.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides the settings file.
    #[arg(short, long, value_parser = parse_listen)]
    listen: Option<String>,

    /// Root folder for state, assets and logs, overrides the settings file.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// VM identifier reported to game servers. Defaults to the hostname.
    #[arg(long)]
    vm_id: Option<String>,

    /// Public IPv4 address of the VM.
    #[arg(long)]
    public_ip: Option<String>,

    /// Fully qualified domain name of the VM.
    #[arg(long)]
    fqdn: Option<String>,

    /// Sweep interval (e.g., "5s"), overrides the settings file.
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    sweep_interval: Option<Duration>,

    /// Heartbeat interval handed to game servers (e.g., "1s").
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    heartbeat_interval: Option<Duration>,
}

impl ServeCmd {
    /// Run the serve command.
    pub fn run(self) -> Result<()> {
        let settings = self.settings()?;
        let addr: SocketAddr = settings.listen.parse().map_err(|e| {
            Error::config("parse", format!("invalid listen address '{}': {}", settings.listen, e))
        })?;

        let vm_id = self.vm_id.clone().unwrap_or_else(default_vm_id);
        let mut vm = VmConfiguration::from_settings(&settings, vm_id)?;
        vm.public_ipv4_address = self.public_ip.clone();
        vm.fqdn = self.fqdn.clone();

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(run_server(settings, vm, addr))
    }

    /// Settings file with command-line overrides applied.
    fn settings(&self) -> Result<AgentSettings> {
        let mut settings = super::load_settings(self.config.as_deref())?;
        if let Some(listen) = &self.listen {
            settings.listen = listen.clone();
        }
        if let Some(root) = &self.root {
            settings.root_dir = root.display().to_string();
        }
        if let Some(interval) = self.sweep_interval {
            settings.sweep_interval_secs = interval.as_secs().max(1);
        }
        if let Some(interval) = self.heartbeat_interval {
            settings.heartbeat_interval_ms = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
        }
        settings.validate()?;
        Ok(settings)
    }
}

async fn run_server(settings: AgentSettings, vm: VmConfiguration, addr: SocketAddr) -> Result<()> {
    tracing::info!(
        vm_id = %vm.vm_id,
        root = %vm.directories.root.display(),
        "starting vmagent"
    );

    let stop_timeout = settings.stop_timeout();
    let runners = Runners {
        process: Arc::new(ProcessRunner::new(stop_timeout)),
        container: Arc::new(ContainerRunner::new(settings.docker_binary.clone(), stop_timeout)),
    };
    let ctx = Arc::new(AgentContext {
        settings,
        vm,
        system: Arc::new(LocalSystemOperations::new()),
        runners,
        assets: Arc::new(HttpAssetRetriever::new()?),
        certificates: Arc::new(LocalCertificateInstaller::new()),
    });

    // Restoring checks every recorded host
    let manager = tokio::task::spawn_blocking(move || SessionHostsManager::restore(ctx))
        .await
        .map_err(|e| Error::persistence("restore", e.to_string()))??;
    let manager = Arc::new(manager);
    manager.resume();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = tokio::spawn(Supervisor::new(manager.clone(), shutdown_rx).run());

    let app = vmagent::api::create_router(Arc::new(ApiState::new(manager)));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "starting HTTP API server");
    println!("vmagent listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor.await {
        tracing::warn!(error = %e, "supervisor task failed");
    }
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Hostname, or a random id when it cannot be read.
fn default_vm_id() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(vmagent::util::new_id)
}
