use crate::cassandra::Cqlsh;
use crate::cluster::{
    self, NamespacePhase, CASS_MANAGED_POD_LABEL, CASS_OPERATOR_POD_LABEL,
};
use crate::config::{self, Settings};
use crate::helm::{Helm, InstallOptions};
use crate::kubectl::{self, Kubectl};
use crate::medusa;
use crate::monitoring::{self, MonitoringClient};
use crate::poller::{poll_until, poll_until_eq, PollSettings};
use crate::reaper::ReaperClient;
use crate::stress::{self, StressRun};
use crate::{Error, Result};
use chrono::Utc;
use kube::Client;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Host name the repair service's ingress answers on.
pub const REAPER_INGRESS_HOST: &str = "repair.localhost";

const REPAIR_SEGMENT_COUNT: u32 = 5;
const READY_TIMEOUT_SECS: u64 = 1800;
const RESTORE_GRACE_SECS: u64 = 60;

const OPERATOR_POD_POLL: PollSettings = PollSettings::seconds(20, 10);
const NAMESPACE_GONE_POLL: PollSettings = PollSettings::seconds(10, 10);
const SERVICE_BY_LABEL_POLL: PollSettings = PollSettings::seconds(10, 2);
const PODS_APPEAR_POLL: PollSettings = PollSettings::seconds(30, 10);
const REAPER_REGISTRATION_POLL: PollSettings = PollSettings::seconds(30, 10);
const SEGMENT_DONE_POLL: PollSettings = PollSettings::seconds(30, 10);
const ROLLOUT_POLL: PollSettings = PollSettings::seconds(30, 10);
const PROMETHEUS_TARGETS_POLL: PollSettings = PollSettings::seconds(10, 30);

/// Fresh namespace name: fixed prefix, UTC timestamp for readable ordering,
/// random suffix so scenarios starting in the same second cannot collide.
pub fn generate_namespace_name() -> String {
    format!(
        "k8ssandra{}{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::thread_rng().gen_range(0..100000)
    )
}

/// Component toggles for a deploy, parsed from a dash-separated options
/// string where `nomedusa`, `noreaper` and `nomonitoring` disable parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeployFeatures {
    pub medusa: bool,
    pub reaper: bool,
    pub monitoring: bool,
}

impl Default for DeployFeatures {
    fn default() -> Self {
        Self {
            medusa: true,
            reaper: true,
            monitoring: true,
        }
    }
}

impl DeployFeatures {
    pub fn parse(options: &str) -> Self {
        let parts: Vec<&str> = options.split('-').collect();
        Self {
            medusa: !parts.contains(&"nomedusa"),
            reaper: !parts.contains(&"noreaper"),
            monitoring: !parts.contains(&"nomonitoring"),
        }
    }
}

/// Chart overrides for a sized deploy: heap settings plus component
/// toggles. The new-gen size is half the heap; Stargate takes a bare
/// megabyte count.
pub fn heap_overrides(
    features: &DeployFeatures,
    cassandra_heap: &str,
    stargate_heap: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("cassandra.heap.size".to_string(), cassandra_heap.to_string()),
        ("cassandra.heap.newGenSize".to_string(), half_heap(cassandra_heap)),
        (
            "stargate.heapMB".to_string(),
            stargate_heap.trim_end_matches('M').to_string(),
        ),
        ("medusa.enabled".to_string(), features.medusa.to_string()),
        ("reaper.enabled".to_string(), features.reaper.to_string()),
        (
            "reaper-operator.enabled".to_string(),
            features.reaper.to_string(),
        ),
        (
            "kube-prometheus-stack.enabled".to_string(),
            features.monitoring.to_string(),
        ),
    ])
}

fn half_heap(heap: &str) -> String {
    let digits: String = heap.chars().filter(|c| c.is_ascii_digit()).collect();
    let value: u64 = digits.parse().unwrap_or(0);
    format!("{}M", value / 2)
}

/// All the state one scenario carries between steps: the API client, the
/// generated namespace, and the id of the repair run in flight (if any).
pub struct ScenarioContext {
    pub client: Client,
    pub settings: Settings,
    pub namespace: String,
    reaper: ReaperClient,
    monitoring: MonitoringClient,
    repair_id: Option<String>,
}

impl ScenarioContext {
    /// Build a context against the currently configured cluster. Call this
    /// after the kind cluster is up so the inferred config is the right one.
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, Settings::default()))
    }

    pub fn with_client(client: Client, settings: Settings) -> Self {
        let reaper = ReaperClient::new(&settings.reaper_base_url);
        let monitoring = MonitoringClient::new(&settings.ingress_base_url);
        Self {
            client,
            namespace: generate_namespace_name(),
            settings,
            reaper,
            monitoring,
            repair_id: None,
        }
    }

    fn kubectl(&self) -> Kubectl {
        Kubectl::new(&self.namespace)
    }

    async fn cqlsh(&self) -> Result<Cqlsh> {
        let credentials = cluster::superuser_credentials(
            self.client.clone(),
            &self.namespace,
            &self.settings.superuser_secret(),
        )
        .await?;
        Ok(Cqlsh::new(
            self.settings.cassandra_pod(),
            self.namespace.clone(),
            credentials,
            self.client.clone(),
        ))
    }

    // ---- namespace lifecycle ----

    pub async fn create_namespace(&mut self) -> Result<()> {
        self.namespace = generate_namespace_name();
        cluster::create_namespace(self.client.clone(), &self.namespace).await
    }

    pub async fn check_namespace_visible(&self) -> Result<()> {
        let phase = cluster::namespace_phase(self.client.clone(), &self.namespace).await?;
        if phase == NamespacePhase::Absent {
            return Err(Error::InvalidErr(format!(
                "namespace {} is not visible",
                self.namespace
            )));
        }
        Ok(())
    }

    pub async fn delete_namespace(&self) -> Result<()> {
        cluster::delete_namespace(self.client.clone(), &self.namespace).await
    }

    /// Deleted namespaces may linger in Terminating; both gone and going
    /// count as deleted.
    pub async fn check_namespace_gone(&self) -> Result<()> {
        info!("Checking that namespace {} terminates", self.namespace);
        poll_until(NAMESPACE_GONE_POLL, "namespace terminated", || async move {
            Ok(
                cluster::namespace_phase(self.client.clone(), &self.namespace)
                    .await?
                    .is_gone_or_going(),
            )
        })
        .await
    }

    // ---- ingress and object storage prerequisites ----

    pub async fn install_traefik(&self) -> Result<()> {
        info!("Installing Traefik");
        Helm::repo_add("traefik", "https://helm.traefik.io/traefik").await?;
        Helm::repo_update().await?;
        let mut options = InstallOptions::in_namespace("traefik")
            .values_file(config::testdata_file("traefik-values.yaml"));
        options.create_namespace = true;
        Helm::install("traefik", "traefik/traefik", &options).await
    }

    pub async fn deploy_minio_with_bucket(&self, bucket: &str) -> Result<()> {
        info!("Deploying MinIO with default bucket {}", bucket);
        Helm::repo_add("minio", "https://helm.min.io/").await?;
        let mut options = InstallOptions::in_namespace("minio")
            .set("accessKey", "minio_key")
            .set("secretKey", "minio_secret")
            .set("defaultBucket.enabled", "true")
            .set("defaultBucket.name", bucket);
        options.create_namespace = true;
        Helm::install_generated("minio/minio", &options).await
    }

    async fn minio_service_name(&self) -> Result<String> {
        let names =
            cluster::service_names_with_label(self.client.clone(), "minio", "app=minio").await?;
        let name = names
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidErr("no minio service found".to_string()))?;
        info!("Minio service: {}", name);
        Ok(name)
    }

    // ---- cluster deploys ----

    pub async fn deploy_cluster(&self, values_file: &str) -> Result<()> {
        self.deploy(values_file, BTreeMap::new()).await
    }

    pub async fn deploy_cluster_with_reaper_ingress(&self, values_file: &str) -> Result<()> {
        let overrides = BTreeMap::from([(
            "reaper.ingress.host".to_string(),
            REAPER_INGRESS_HOST.to_string(),
        )]);
        self.deploy(values_file, overrides).await
    }

    /// Deploy with the backup storage host pointed at the in-cluster MinIO
    /// service.
    pub async fn deploy_cluster_with_minio_storage(&self, values_file: &str) -> Result<()> {
        let service = self.minio_service_name().await?;
        let overrides = BTreeMap::from([(
            "medusa.storage_properties.host".to_string(),
            format!("{service}.minio.svc.cluster.local"),
        )]);
        self.deploy(values_file, overrides).await
    }

    pub async fn deploy_cluster_with_heap(
        &self,
        options: &str,
        cassandra_heap: &str,
        stargate_heap: &str,
        values_file: &str,
    ) -> Result<()> {
        let features = DeployFeatures::parse(options);
        self.deploy(values_file, heap_overrides(&features, cassandra_heap, stargate_heap))
            .await
    }

    async fn deploy(&self, values_file: &str, overrides: BTreeMap<String, String>) -> Result<()> {
        info!(
            "Deploying the cluster into {} with values {}",
            self.namespace, values_file
        );
        let chart = self.settings.cluster_chart();
        let chart = chart.to_string_lossy();
        Helm::dependency_update(&chart).await?;

        let mut options =
            InstallOptions::in_namespace(&self.namespace).values_file(config::values_file(values_file));
        options.set_values = overrides;
        let started = std::time::Instant::now();
        Helm::install(&self.settings.release_name, &chart, &options).await?;

        poll_until(OPERATOR_POD_POLL, "cass-operator pod exists", || async move {
            Ok(!cluster::pod_names_with_label(
                self.client.clone(),
                &self.namespace,
                CASS_OPERATOR_POD_LABEL,
            )
            .await?
            .is_empty())
        })
        .await?;
        let kubectl = self.kubectl();
        kubectl
            .wait_pods_ready(CASS_OPERATOR_POD_LABEL, READY_TIMEOUT_SECS)
            .await?;
        kubectl
            .wait_ready(
                &format!("cassandradatacenter/{}", self.settings.datacenter_name),
                READY_TIMEOUT_SECS,
            )
            .await?;
        info!("Installing and starting the cluster took {:?}", started.elapsed());
        Ok(())
    }

    // ---- resource presence checks ----

    pub async fn check_service_present(&self, name: &str) -> Result<()> {
        info!("Checking that service {} is present", name);
        cluster::get_service(self.client.clone(), &self.namespace, name).await?;
        Ok(())
    }

    pub async fn check_service_present_by_label(&self, label: &str) -> Result<()> {
        info!("Checking that a service labeled {} is present", label);
        poll_until(SERVICE_BY_LABEL_POLL, "service with label exists", || async move {
            Ok(
                !cluster::service_names_with_label(self.client.clone(), &self.namespace, label)
                    .await?
                    .is_empty(),
            )
        })
        .await
    }

    pub async fn check_secret_present(&self, name: &str) -> Result<()> {
        info!("Checking that secret {} is present", name);
        if cluster::secret_exists(self.client.clone(), &self.namespace, name).await? {
            Ok(())
        } else {
            Err(Error::MissingSecretError(format!(
                "{}/{name}",
                self.namespace
            )))
        }
    }

    // ---- pod readiness ----

    /// Pods matching the label must first exist, then pass the readiness
    /// wait. The existence poll covers operators that create pods lazily.
    async fn wait_pods_with_label_ready(&self, label: &str, settings: PollSettings) -> Result<()> {
        info!("Waiting for pods labeled {} to be ready", label);
        poll_until(settings, "pods with label exist", || async move {
            Ok(
                !cluster::pod_names_with_label(self.client.clone(), &self.namespace, label)
                    .await?
                    .is_empty(),
            )
        })
        .await?;
        self.kubectl().wait_pods_ready(label, READY_TIMEOUT_SECS).await
    }

    pub async fn wait_reaper_pod_ready(&self) -> Result<()> {
        self.wait_pods_with_label_ready(cluster::REAPER_MANAGED_POD_LABEL, PODS_APPEAR_POLL)
            .await
    }

    pub async fn wait_stargate_rollout(&self) -> Result<()> {
        info!("Waiting for the Stargate deployment to roll out");
        let deployment = self.settings.stargate_deployment();
        let deployment = deployment.as_str();
        poll_until(ROLLOUT_POLL, "stargate deployment rolled out", || async move {
            Ok(kubectl::rollout_complete(
                &self.kubectl().rollout_status(deployment).await?,
            ))
        })
        .await
    }

    // ---- CQL steps ----

    pub async fn check_keyspace_exists(&self, keyspace: &str) -> Result<()> {
        info!("Checking that keyspace {} exists", keyspace);
        if self.cqlsh().await?.keyspace_exists(keyspace).await? {
            Ok(())
        } else {
            Err(Error::InvalidErr(format!(
                "keyspace {keyspace} does not exist"
            )))
        }
    }

    pub async fn create_table(&self, keyspace: &str, table: &str) -> Result<()> {
        info!("Creating table {}.{}", keyspace, table);
        let cqlsh = self.cqlsh().await?;
        cqlsh.create_keyspace(keyspace).await?;
        cqlsh.create_table(keyspace, table).await
    }

    pub async fn load_rows(&self, rows: u32, keyspace: &str, table: &str) -> Result<()> {
        info!("Loading {} rows into {}.{}", rows, keyspace, table);
        self.cqlsh().await?.load_rows(rows, keyspace, table).await
    }

    pub async fn check_row_count(&self, rows: u32, keyspace: &str, table: &str) -> Result<()> {
        info!("Checking for {} rows in {}.{}", rows, keyspace, table);
        if self
            .cqlsh()
            .await?
            .count_rows_matches(rows, keyspace, table)
            .await?
        {
            Ok(())
        } else {
            Err(Error::InvalidErr(format!(
                "{keyspace}.{table} does not hold {rows} rows"
            )))
        }
    }

    // ---- repair steps ----

    pub async fn check_cluster_registered_in_reaper(&self, cluster_name: &str) -> Result<()> {
        info!(
            "Checking that cluster {} is registered in the repair service",
            cluster_name
        );
        poll_until(
            REAPER_REGISTRATION_POLL,
            "a cluster is registered in the repair service",
            || async move { Ok(!self.reaper.registered_clusters().await?.is_empty()) },
        )
        .await?;
        let clusters = self.reaper.registered_clusters().await?;
        match clusters.first() {
            Some(first) if first == cluster_name => Ok(()),
            Some(first) => Err(Error::ReaperError(format!(
                "registered cluster is {first}, expected {cluster_name}"
            ))),
            None => Err(Error::ReaperError(
                "no cluster registered in the repair service".to_string(),
            )),
        }
    }

    /// Create a five-segment repair run on the keyspace and start it,
    /// retaining the run id for the follow-up steps.
    pub async fn trigger_repair(&mut self, keyspace: &str) -> Result<()> {
        info!("Triggering a repair on keyspace {}", keyspace);
        let id = self
            .reaper
            .create_repair_run(
                &self.settings.release_name,
                keyspace,
                &self.settings.release_name,
                REPAIR_SEGMENT_COUNT,
            )
            .await?;
        self.reaper.start_repair_run(&id).await?;
        self.repair_id = Some(id);
        Ok(())
    }

    fn current_repair_id(&self) -> Result<&str> {
        self.repair_id
            .as_deref()
            .ok_or_else(|| Error::InvalidErr("no repair run in flight".to_string()))
    }

    pub async fn wait_for_one_segment_done(&self) -> Result<()> {
        info!("Waiting for at least one repair segment to be processed");
        let id = self.current_repair_id()?;
        poll_until(
            SEGMENT_DONE_POLL,
            "at least one repair segment is done",
            || async move { self.reaper.any_segment_done(id).await },
        )
        .await
    }

    pub async fn abort_repair(&self) -> Result<()> {
        info!("Cancelling the running repair");
        self.reaper.abort_repair_run(self.current_repair_id()?).await
    }

    // ---- backup and restore steps ----

    pub async fn apply_medusa_secret(&self, manifest: &Path) -> Result<()> {
        info!("Applying backup storage secret {}", manifest.display());
        self.kubectl().apply_file(manifest).await
    }

    pub async fn perform_backup(&self, backup_name: &str, expected_nodes: usize) -> Result<()> {
        info!("Performing backup {}", backup_name);
        medusa::perform_backup(
            &self.kubectl(),
            &self.settings.backup_chart().to_string_lossy(),
            &self.settings.datacenter_name,
            backup_name,
            expected_nodes,
        )
        .await
    }

    pub async fn restore_backup(&self, backup_name: &str) -> Result<()> {
        info!("Restoring backup {}", backup_name);
        medusa::install_restore(
            &self.kubectl(),
            &self.settings.restore_chart().to_string_lossy(),
            &self.settings.datacenter_name,
            backup_name,
        )
        .await?;
        // Give the datacenter resource time to be recreated before waiting
        // on its pods.
        tokio::time::sleep(Duration::from_secs(RESTORE_GRACE_SECS)).await;
        self.wait_pods_with_label_ready(CASS_MANAGED_POD_LABEL, PODS_APPEAR_POLL)
            .await
    }

    // ---- stress and monitoring steps ----

    pub async fn run_stress(
        &self,
        cycles: &str,
        read_percent: u32,
        rate: u32,
        timeout_secs: u64,
    ) -> Result<()> {
        let credentials = cluster::superuser_credentials(
            self.client.clone(),
            &self.namespace,
            &self.settings.superuser_secret(),
        )
        .await?;
        let run = StressRun {
            cycles: cycles.to_string(),
            read_percent,
            rate,
            timeout_secs,
        };
        let stargate_service = format!("{}-service", self.settings.stargate_deployment());
        stress::run_stress(&self.kubectl(), &credentials, &stargate_service, &run).await?;
        Ok(())
    }

    /// Prometheus converges once it scrapes every monitored pod.
    pub async fn check_prometheus_targets_converge(&self) -> Result<()> {
        let expected = monitoring::monitored_pod_count(
            self.client.clone(),
            &self.namespace,
            &self.settings.stargate_deployment(),
        )
        .await?;
        info!("Waiting for {} active Prometheus targets", expected);
        poll_until_eq(
            PROMETHEUS_TARGETS_POLL,
            "prometheus active targets",
            expected,
            || async move { self.monitoring.active_target_count().await },
        )
        .await
    }

    pub async fn check_prometheus_metric_extraction(&self) -> Result<()> {
        if self
            .monitoring
            .metric_query_succeeds("scrape_duration_seconds")
            .await?
        {
            info!("Prometheus could be reached through HTTP");
            Ok(())
        } else {
            Err(Error::InvalidErr(
                "prometheus query for scrape_duration_seconds did not succeed".to_string(),
            ))
        }
    }

    pub async fn check_grafana_reachable(&self) -> Result<()> {
        self.monitoring.grafana_reachable().await?;
        Ok(())
    }
}
