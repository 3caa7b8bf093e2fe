use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{ClusterConfig, IngressConfig, ProvisionConfig};
use crate::error::Result;
use crate::readiness::{wait_until_ready, Readiness};
use crate::runner::{run_check, run_step, ExecOutcome, Runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    AlreadyPresent,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    AlreadyInstalled,
    Installed,
    /// A leftover release in a non-deployed state was upgraded in place.
    Repaired,
}

/// The part of `helm status -o json` the pre-check looks at.
#[derive(Debug, Deserialize)]
struct HelmStatus {
    info: HelmStatusInfo,
}

#[derive(Debug, Deserialize)]
struct HelmStatusInfo {
    status: String,
}

const DEPLOYED: &str = "deployed";

/// Helm's status string for a release the check found, or `None` when no
/// release exists.
fn release_status(outcome: &ExecOutcome) -> Option<String> {
    if !outcome.succeeded() {
        return None;
    }
    match serde_json::from_str::<HelmStatus>(&outcome.stdout) {
        Ok(parsed) => Some(parsed.info.status),
        Err(e) => {
            warn!(error = %e, "unreadable helm status output");
            Some("unknown".to_string())
        }
    }
}

/// What a provisioning run actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionReport {
    pub cluster: ClusterState,
    pub ingress: ReleaseState,
}

/// Brings up the cluster and the ingress controller. Stops at the first
/// failing step; nothing already applied is rolled back.
pub async fn provision<R: Runner + ?Sized>(
    runner: &R,
    config: &ProvisionConfig,
) -> Result<ProvisionReport> {
    let cluster = ensure_cluster(runner, &config.cluster, &config.readiness).await?;
    let ingress = install_ingress(runner, &config.ingress).await?;
    Ok(ProvisionReport { cluster, ingress })
}

/// Creates the cluster unless one with the same name already exists.
pub async fn ensure_cluster<R: Runner + ?Sized>(
    runner: &R,
    cluster: &ClusterConfig,
    readiness: &Readiness,
) -> Result<ClusterState> {
    println!("\n--- Creating k3d cluster '{}' ---", cluster.name);

    let existing = run_check(runner, &cluster.get_command()).await?;
    if existing.succeeded() {
        println!(
            "✅ Cluster '{}' already exists. Skipping creation.",
            cluster.name
        );
        return Ok(ClusterState::AlreadyPresent);
    }

    println!("Cluster '{}' not found. Creating a new one...", cluster.name);
    run_step(runner, &cluster.create_command()).await?;
    info!(cluster = %cluster.name, "cluster created");

    wait_until_ready(runner, cluster, readiness).await?;
    Ok(ClusterState::Created)
}

/// Registers the chart repository and installs the ingress controller
/// release if it is not installed yet.
pub async fn install_ingress<R: Runner + ?Sized>(
    runner: &R,
    ingress: &IngressConfig,
) -> Result<ReleaseState> {
    println!("\n--- Installing {} ---", ingress.release);

    run_step(runner, &ingress.repo_add_command()).await?;
    run_step(runner, &ingress.repo_update_command()).await?;

    let status = run_check(runner, &ingress.status_command()).await?;
    match release_status(&status).as_deref() {
        Some(DEPLOYED) => {
            println!(
                "✅ Release '{}' already installed in namespace '{}'. Skipping install.",
                ingress.release, ingress.namespace
            );
            Ok(ReleaseState::AlreadyInstalled)
        }
        Some(other) => {
            println!(
                "Release '{}' is in state '{}'. Upgrading it in place...",
                ingress.release, other
            );
            run_step(runner, &ingress.upgrade_install_command()).await?;
            info!(release = %ingress.release, previous = other, "release repaired");
            Ok(ReleaseState::Repaired)
        }
        None => {
            run_step(runner, &ingress.install_command()).await?;
            info!(release = %ingress.release, namespace = %ingress.namespace, "release installed");
            Ok(ReleaseState::Installed)
        }
    }
}
