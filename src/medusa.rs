use crate::helm::{Helm, InstallOptions};
use crate::kubectl::Kubectl;
use crate::poller::{poll_until, PollSettings};
use crate::Result;
use tracing::info;

const BACKUP_RELEASE: &str = "test";
const RESTORE_RELEASE: &str = "restore-test";

const BACKUP_POLL: PollSettings = PollSettings::seconds(10, 12);

/// Install the backup chart and wait until the CassandraBackup resource
/// reports every expected node as finished.
pub async fn perform_backup(
    kubectl: &Kubectl,
    chart: &str,
    datacenter: &str,
    backup_name: &str,
    expected_nodes: usize,
) -> Result<()> {
    let options = InstallOptions::in_namespace(kubectl.namespace())
        .set("name", backup_name)
        .set("cassandraDatacenter.name", datacenter);
    Helm::install(BACKUP_RELEASE, chart, &options).await?;

    info!("Waiting for backup {} to finish", backup_name);
    poll_until(BACKUP_POLL, "backup finished on all nodes", || async move {
        let output = kubectl
            .get_jsonpath("cassandrabackup", backup_name, "{.status.finished}")
            .await?;
        Ok(parse_finished_nodes(&output)?.len() == expected_nodes)
    })
    .await
}

/// Install the restore chart for a previous backup. The datacenter resource
/// is recreated as part of the restore; callers wait for pods afterwards.
pub async fn install_restore(
    kubectl: &Kubectl,
    chart: &str,
    datacenter: &str,
    backup_name: &str,
) -> Result<()> {
    let options = InstallOptions::in_namespace(kubectl.namespace())
        .set("backup.name", backup_name)
        .set("cassandraDatacenter.name", datacenter)
        .set("name", RESTORE_RELEASE);
    Helm::install(RESTORE_RELEASE, chart, &options).await
}

/// Node names from the backup's `.status.finished` list. jsonpath output
/// may arrive wrapped in single quotes; an absent status is an empty list,
/// not an error.
pub fn parse_finished_nodes(output: &str) -> Result<Vec<String>> {
    let trimmed = output.trim().trim_matches('\'');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}
