use std::env;
use std::path::PathBuf;

/// Harness settings sourced from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Directory holding the k8ssandra, backup and restore charts.
    pub charts_dir: PathBuf,
    /// Base URL of the Reaper REST API, routed through the ingress.
    pub reaper_base_url: String,
    /// Host endpoint behind the ingress for Prometheus and Grafana paths.
    pub ingress_base_url: String,
    pub release_name: String,
    pub datacenter_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            charts_dir: PathBuf::from(from_env_default(
                "K8SSANDRA_CHARTS_DIR",
                "../k8ssandra/charts",
            )),
            reaper_base_url: from_env_default("REAPER_BASE_URL", "http://repair.localhost:8080"),
            ingress_base_url: from_env_default("INGRESS_BASE_URL", "http://127.0.0.1:8080"),
            release_name: from_env_default("RELEASE_NAME", "k8ssandra"),
            datacenter_name: from_env_default("DATACENTER_NAME", "dc1"),
        }
    }
}

impl Settings {
    pub fn cluster_chart(&self) -> PathBuf {
        self.charts_dir.join("k8ssandra")
    }

    pub fn backup_chart(&self) -> PathBuf {
        self.charts_dir.join("backup")
    }

    pub fn restore_chart(&self) -> PathBuf {
        self.charts_dir.join("restore")
    }

    /// Superuser secret created by the operator for the release.
    pub fn superuser_secret(&self) -> String {
        format!("{}-superuser", self.release_name)
    }

    /// First pod of the Cassandra statefulset for the datacenter.
    pub fn cassandra_pod(&self) -> String {
        format!(
            "{}-{}-default-sts-0",
            self.release_name, self.datacenter_name
        )
    }

    /// Stargate deployment for the datacenter.
    pub fn stargate_deployment(&self) -> String {
        format!("{}-{}-stargate", self.release_name, self.datacenter_name)
    }
}

/// Repo-owned scenario values file under testdata/values.
pub fn values_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("values")
        .join(name)
}

/// Repo-owned manifest or values file under testdata.
pub fn testdata_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
}

// Source the variable from the env - use default if not set
fn from_env_default(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_owned())
}
