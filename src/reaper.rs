use crate::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info};

/// One segment of a repair run. Completion is `state == "DONE"`.
#[derive(Debug, Deserialize)]
pub struct RepairSegment {
    pub state: String,
}

pub fn any_segment_done(segments: &[RepairSegment]) -> bool {
    segments.iter().any(|segment| segment.state == "DONE")
}

/// Repair run ids come back as a string or a number depending on the
/// service version; both map to the opaque id we hand back on state changes.
pub fn repair_id_from_response(body: &serde_json::Value) -> Result<String> {
    match body.get("id") {
        Some(serde_json::Value::String(id)) => Ok(id.clone()),
        Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
        _ => Err(Error::ReaperError(format!(
            "repair run response carries no id: {body}"
        ))),
    }
}

/// REST client for the repair scheduling service, reached through the
/// ingress at the configured base URL.
pub struct ReaperClient {
    http: reqwest::Client,
    base_url: String,
}

impl ReaperClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Cluster names the service currently knows about.
    pub async fn registered_clusters(&self) -> Result<Vec<String>> {
        let clusters = self
            .http
            .get(format!("{}/cluster", self.base_url))
            .send()
            .await?
            .json::<Vec<String>>()
            .await?;
        debug!("Reaper registered clusters: {:?}", clusters);
        Ok(clusters)
    }

    /// Create a repair run and return its id. The run starts paused; follow
    /// up with `start_repair_run`.
    pub async fn create_repair_run(
        &self,
        cluster_name: &str,
        keyspace: &str,
        owner: &str,
        segment_count: u32,
    ) -> Result<String> {
        let segment_count = segment_count.to_string();
        let response = self
            .http
            .post(format!("{}/repair_run", self.base_url))
            .query(&[
                ("clusterName", cluster_name),
                ("keyspace", keyspace),
                ("owner", owner),
                ("segmentCount", segment_count.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        info!("Reaper response: {}", body);
        if !status.is_success() {
            return Err(Error::ReaperError(format!(
                "creating a repair run on {keyspace} failed: HTTP {status}: {body}"
            )));
        }
        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        repair_id_from_response(&parsed)
    }

    pub async fn start_repair_run(&self, id: &str) -> Result<()> {
        self.set_repair_run_state(id, "RUNNING").await
    }

    pub async fn abort_repair_run(&self, id: &str) -> Result<()> {
        self.set_repair_run_state(id, "ABORTED").await
    }

    // State changes must answer exactly 200.
    async fn set_repair_run_state(&self, id: &str, state: &str) -> Result<()> {
        let response = self
            .http
            .put(format!(
                "{}/repair_run/{}/state/{}",
                self.base_url, id, state
            ))
            .header("Content-Type", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        info!("Reaper response: {}", body);
        info!("Reaper status code: {}", status.as_u16());
        if status != reqwest::StatusCode::OK {
            return Err(Error::ReaperError(format!(
                "failed moving repair {id} to {state}: HTTP {status}: {body}"
            )));
        }
        Ok(())
    }

    pub async fn segments(&self, id: &str) -> Result<Vec<RepairSegment>> {
        let segments = self
            .http
            .get(format!("{}/repair_run/{}/segments", self.base_url, id))
            .send()
            .await?
            .json::<Vec<RepairSegment>>()
            .await?;
        Ok(segments)
    }

    pub async fn any_segment_done(&self, id: &str) -> Result<bool> {
        Ok(any_segment_done(&self.segments(id).await?))
    }
}
