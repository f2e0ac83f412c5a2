use crate::cluster::{self, CASS_MANAGED_POD_LABEL};
use crate::{Error, Result};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Deserialize)]
struct PrometheusTargets {
    status: String,
    data: TargetData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetData {
    active_targets: Vec<serde_json::Value>,
}

/// Number of active scrape targets from a /api/v1/targets response body.
pub fn parse_active_target_count(body: &str) -> Result<usize> {
    let targets: PrometheusTargets = serde_json::from_str(body)?;
    if targets.status != "success" {
        return Err(Error::InvalidErr(format!(
            "prometheus targets status was '{}'",
            targets.status
        )));
    }
    Ok(targets.data.active_targets.len())
}

/// Whether a /api/v1/query response body reports success.
pub fn parse_query_status(body: &str) -> Result<bool> {
    #[derive(Deserialize)]
    struct QueryResponse {
        status: String,
    }
    let response: QueryResponse = serde_json::from_str(body)?;
    Ok(response.status == "success")
}

/// Prometheus and Grafana probes through the ingress host endpoint.
pub struct MonitoringClient {
    http: reqwest::Client,
    base_url: String,
}

impl MonitoringClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn active_target_count(&self) -> Result<usize> {
        let body = self
            .http
            .get(format!("{}/prometheus/api/v1/targets", self.base_url))
            .send()
            .await?
            .text()
            .await?;
        let count = parse_active_target_count(&body)?;
        debug!("Prometheus reports {} active targets", count);
        Ok(count)
    }

    pub async fn metric_query_succeeds(&self, metric: &str) -> Result<bool> {
        let body = self
            .http
            .get(format!("{}/prometheus/api/v1/query", self.base_url))
            .query(&[("query", metric)])
            .send()
            .await?
            .text()
            .await?;
        parse_query_status(&body)
    }

    /// Any HTTP answer from the login page counts as reachable.
    pub async fn grafana_reachable(&self) -> Result<bool> {
        self.http
            .get(format!("{}/grafana/login", self.base_url))
            .send()
            .await?;
        info!("Grafana could be reached through HTTP");
        Ok(true)
    }
}

/// Pods Prometheus is expected to scrape: everything the Cassandra operator
/// manages plus the Stargate deployment's pods.
pub async fn monitored_pod_count(
    client: Client,
    namespace: &str,
    stargate_deployment: &str,
) -> Result<usize> {
    let cassandra =
        cluster::pod_names_with_label(client.clone(), namespace, CASS_MANAGED_POD_LABEL)
            .await?
            .len();
    let stargate = cluster::pod_names_with_label(
        client,
        namespace,
        &format!("app={stargate_deployment}"),
    )
    .await?
    .len();
    Ok(cassandra + stargate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_count_requires_success_status() {
        let body = serde_json::json!({
            "status": "success",
            "data": {
                "activeTargets": [
                    {"labels": {"job": "cassandra"}, "health": "up"},
                    {"labels": {"job": "stargate"}, "health": "up"},
                    {"labels": {"job": "operator"}, "health": "up"},
                ]
            }
        });
        assert_eq!(parse_active_target_count(&body.to_string()).unwrap(), 3);

        let failed = serde_json::json!({"status": "error", "data": {"activeTargets": []}});
        assert!(parse_active_target_count(&failed.to_string()).is_err());
    }

    #[test]
    fn malformed_target_payloads_are_errors() {
        assert!(parse_active_target_count("not json").is_err());
        assert!(parse_active_target_count("{\"status\":\"success\"}").is_err());
    }

    #[test]
    fn query_status_maps_to_bool() {
        let ok = serde_json::json!({"status": "success", "data": {"resultType": "vector", "result": []}});
        assert!(parse_query_status(&ok.to_string()).unwrap());

        let error = serde_json::json!({"status": "error", "errorType": "bad_data"});
        assert!(!parse_query_status(&error.to_string()).unwrap());
    }
}
