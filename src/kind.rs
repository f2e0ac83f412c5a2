use crate::kubectl::run_command;
use crate::Result;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Worker layout of the ephemeral cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterTopology {
    OneWorker,
    ThreeWorkers,
}

impl ClusterTopology {
    pub fn workers(self) -> usize {
        match self {
            ClusterTopology::OneWorker => 1,
            ClusterTopology::ThreeWorkers => 3,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindConfig {
    kind: String,
    api_version: String,
    nodes: Vec<Node>,
}

#[derive(Serialize)]
struct Node {
    role: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(rename = "extraPortMappings", skip_serializing_if = "Vec::is_empty")]
    extra_port_mappings: Vec<PortMapping>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortMapping {
    container_port: u16,
    host_port: u16,
}

/// Render the cluster config: a control-plane node exposing the ingress
/// node ports on localhost (32080 -> 8080, 32443 -> 8443) plus the workers.
pub fn cluster_config(topology: ClusterTopology) -> Result<String> {
    let control_plane = Node {
        role: "control-plane".to_string(),
        labels: BTreeMap::from([("ingress-ready".to_string(), "true".to_string())]),
        extra_port_mappings: vec![
            PortMapping {
                container_port: 32080,
                host_port: 8080,
            },
            PortMapping {
                container_port: 32443,
                host_port: 8443,
            },
        ],
    };
    let mut nodes = vec![control_plane];
    for _ in 0..topology.workers() {
        nodes.push(Node {
            role: "worker".to_string(),
            labels: BTreeMap::new(),
            extra_port_mappings: Vec::new(),
        });
    }
    let config = KindConfig {
        kind: "Cluster".to_string(),
        api_version: "kind.x-k8s.io/v1alpha4".to_string(),
        nodes,
    };
    Ok(serde_yaml::to_string(&config)?)
}

pub struct Kind {}

impl Kind {
    pub async fn delete_cluster() -> Result<()> {
        info!("Deleting the kind cluster");
        run_command("kind", &["delete".to_string(), "cluster".to_string()]).await?;
        Ok(())
    }

    /// Tear down any leftover cluster and bring up a fresh one.
    pub async fn recreate_cluster(topology: ClusterTopology) -> Result<()> {
        Self::delete_cluster().await?;

        let config = cluster_config(topology)?;
        let config_path = std::env::temp_dir().join(format!(
            "kind-config-{}.yaml",
            rand::thread_rng().gen_range(0..100000)
        ));
        tokio::fs::write(&config_path, config).await?;

        info!(
            "Creating a kind cluster with {} worker(s)",
            topology.workers()
        );
        run_command(
            "kind",
            &[
                "create".to_string(),
                "cluster".to_string(),
                "--config".to_string(),
                config_path.to_string_lossy().into_owned(),
            ],
        )
        .await?;
        Ok(())
    }
}
