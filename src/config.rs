use crate::command::CommandLine;
use crate::readiness::Readiness;

pub const DEFAULT_CLUSTER_NAME: &str = "redeploy-hub-local";
pub const DEFAULT_API_PORT: u16 = 6550;
/// Host port forwarded to the cluster load balancer.
pub const DEFAULT_HOST_PORT: u16 = 8080;
pub const DEFAULT_LOADBALANCER_PORT: u16 = 80;
/// Bundled k3s ingress, disabled so it does not fight ingress-nginx.
pub const DEFAULT_DISABLED_COMPONENT: &str = "traefik";

pub const DEFAULT_REPO_NAME: &str = "ingress-nginx";
pub const DEFAULT_REPO_URL: &str = "https://kubernetes.github.io/ingress-nginx";
pub const DEFAULT_CHART: &str = "ingress-nginx/ingress-nginx";
pub const DEFAULT_RELEASE: &str = "ingress-nginx";
pub const DEFAULT_NAMESPACE: &str = "ingress-nginx";

#[derive(Debug, Clone, Default)]
pub struct ProvisionConfig {
    pub cluster: ClusterConfig,
    pub ingress: IngressConfig,
    pub readiness: Readiness,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub api_port: u16,
    pub host_port: u16,
    pub loadbalancer_port: u16,
    /// k3s components switched off on the first server node.
    pub disabled_components: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            api_port: DEFAULT_API_PORT,
            host_port: DEFAULT_HOST_PORT,
            loadbalancer_port: DEFAULT_LOADBALANCER_PORT,
            disabled_components: vec![DEFAULT_DISABLED_COMPONENT.to_string()],
        }
    }
}

impl ClusterConfig {
    /// kubeconfig context k3d registers for the cluster.
    pub fn kube_context(&self) -> String {
        format!("k3d-{}", self.name)
    }

    pub fn get_command(&self) -> CommandLine {
        CommandLine::new("k3d").args(["cluster", "get", self.name.as_str()])
    }

    pub fn create_command(&self) -> CommandLine {
        let mut cmd = CommandLine::new("k3d")
            .args(["cluster", "create", self.name.as_str()])
            .arg("--api-port")
            .arg(self.api_port.to_string())
            .arg("-p")
            .arg(format!(
                "{}:{}@loadbalancer",
                self.host_port, self.loadbalancer_port
            ));
        for component in &self.disabled_components {
            cmd = cmd
                .arg("--k3s-arg")
                .arg(format!("--disable={}@server:0", component));
        }
        cmd
    }

    pub fn readiness_probe(&self) -> CommandLine {
        CommandLine::new("kubectl")
            .arg("--context")
            .arg(self.kube_context())
            .args(["get", "--raw", "/readyz"])
    }
}

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub repo_name: String,
    pub repo_url: String,
    pub chart: String,
    pub release: String,
    pub namespace: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            repo_name: DEFAULT_REPO_NAME.to_string(),
            repo_url: DEFAULT_REPO_URL.to_string(),
            chart: DEFAULT_CHART.to_string(),
            release: DEFAULT_RELEASE.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl IngressConfig {
    pub fn repo_add_command(&self) -> CommandLine {
        CommandLine::new("helm").args([
            "repo",
            "add",
            self.repo_name.as_str(),
            self.repo_url.as_str(),
        ])
    }

    pub fn repo_update_command(&self) -> CommandLine {
        CommandLine::new("helm").args(["repo", "update"])
    }

    pub fn status_command(&self) -> CommandLine {
        CommandLine::new("helm").args([
            "status",
            self.release.as_str(),
            "--namespace",
            self.namespace.as_str(),
            "-o",
            "json",
        ])
    }

    pub fn install_command(&self) -> CommandLine {
        CommandLine::new("helm").args([
            "install",
            self.release.as_str(),
            self.chart.as_str(),
            "--namespace",
            self.namespace.as_str(),
            "--create-namespace",
            "--wait",
        ])
    }

    /// Replaces a release that exists but never reached `deployed`.
    pub fn upgrade_install_command(&self) -> CommandLine {
        CommandLine::new("helm").args([
            "upgrade",
            "--install",
            self.release.as_str(),
            self.chart.as_str(),
            "--namespace",
            self.namespace.as_str(),
            "--create-namespace",
            "--wait",
        ])
    }
}
