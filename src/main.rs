// main.rs
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;

mod command;
mod config;
mod error;
mod provisioner;
mod readiness;
mod runner;
#[cfg(test)]
mod testing;

use config::{ClusterConfig, IngressConfig, ProvisionConfig};
use provisioner::{ClusterState, ProvisionReport, ReleaseState};
use readiness::{PollPolicy, Readiness};
use runner::SystemRunner;

#[derive(Parser, Debug)]
#[command(name = "setup-local-env")]
#[command(about = "Bootstrap a local k3d cluster with the NGINX ingress controller", long_about = None)]
struct Cli {
    /// Cluster name
    #[arg(long, default_value = config::DEFAULT_CLUSTER_NAME)]
    cluster_name: String,

    /// Port the Kubernetes API is exposed on
    #[arg(long, default_value_t = config::DEFAULT_API_PORT)]
    api_port: u16,

    /// Host port forwarded to port 80 of the cluster load balancer
    #[arg(long, default_value_t = config::DEFAULT_HOST_PORT)]
    host_port: u16,

    /// Namespace the ingress controller is installed into
    #[arg(long, default_value = config::DEFAULT_NAMESPACE)]
    ingress_namespace: String,

    /// Helm release name of the ingress controller
    #[arg(long, default_value = config::DEFAULT_RELEASE)]
    ingress_release: String,

    /// Seconds to sleep after creating the cluster
    #[arg(long, value_name = "SECS")]
    settle_secs: Option<u64>,

    /// Poll the cluster API with kubectl instead of sleeping
    #[arg(long, conflicts_with = "settle_secs")]
    wait_ready: bool,

    /// Give up polling the cluster API after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    ready_timeout_secs: u64,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn provision_config(&self) -> ProvisionConfig {
        let readiness = if self.wait_ready {
            Readiness::Poll(PollPolicy {
                timeout: Duration::from_secs(self.ready_timeout_secs),
                ..PollPolicy::default()
            })
        } else {
            Readiness::Settle(
                self.settle_secs
                    .map(Duration::from_secs)
                    .unwrap_or(readiness::DEFAULT_SETTLE),
            )
        };

        ProvisionConfig {
            cluster: ClusterConfig {
                name: self.cluster_name.clone(),
                api_port: self.api_port,
                host_port: self.host_port,
                ..ClusterConfig::default()
            },
            ingress: IngressConfig {
                release: self.ingress_release.clone(),
                namespace: self.ingress_namespace.clone(),
                ..IngressConfig::default()
            },
            readiness,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = report_failure(&mut io::stdout().lock(), &e);
            ExitCode::FAILURE
        }
    }
}

fn report_failure<W: Write>(out: &mut W, err: &anyhow::Error) -> io::Result<()> {
    writeln!(out, "❌ {:#}", err)?;
    out.flush()
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.provision_config();
    println!("Starting local environment setup...");

    let report = provisioner::provision(&SystemRunner, &config)
        .await
        .with_context(|| format!("failed to set up cluster '{}'", config.cluster.name))?;

    print_access_info(&config, &report);
    Ok(())
}

fn print_access_info(config: &ProvisionConfig, report: &ProvisionReport) {
    let rule = "=".repeat(50);
    println!("\n{}", rule);
    println!("🎉 Local environment is ready!");
    println!("{}", rule);

    if report.cluster == ClusterState::AlreadyPresent {
        println!("♻️  Reused existing cluster '{}'", config.cluster.name);
    }
    match report.ingress {
        ReleaseState::AlreadyInstalled => {
            println!("♻️  Reused existing release '{}'", config.ingress.release)
        }
        ReleaseState::Repaired => {
            println!("🔧 Upgraded leftover release '{}'", config.ingress.release)
        }
        ReleaseState::Installed => {}
    }

    println!("You can verify the cluster status with:");
    println!("  kubectl get nodes");
    println!("\nAnd check the ingress controller with:");
    println!("  kubectl get pods -n {}", config.ingress.namespace);
    println!(
        "\nAccess services via http://localhost:{}",
        config.cluster.host_port
    );
}
