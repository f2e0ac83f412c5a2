use crate::{Error, Result};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    Client, ResourceExt,
};
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "k8ssandra-e2e";

/// Label on the operator's own pod.
pub const CASS_OPERATOR_POD_LABEL: &str = "app.kubernetes.io/name=cass-operator";
/// Label on every pod the Cassandra operator manages.
pub const CASS_MANAGED_POD_LABEL: &str = "app.kubernetes.io/managed-by=cass-operator";
/// Label on pods the repair operator manages.
pub const REAPER_MANAGED_POD_LABEL: &str = "app.kubernetes.io/managed-by=reaper-operator";

/// Observed lifecycle state of a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespacePhase {
    Active,
    Terminating,
    Absent,
}

impl NamespacePhase {
    /// Deleted namespaces linger in Terminating while finalizers run, which
    /// is already good enough for teardown checks.
    pub fn is_gone_or_going(self) -> bool {
        matches!(self, NamespacePhase::Terminating | NamespacePhase::Absent)
    }
}

pub async fn create_namespace(client: Client, name: &str) -> Result<()> {
    let ns_api: Api<Namespace> = Api::all(client);
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
        }
    });
    info!("Creating namespace {} if it does not exist", name);
    let _o = ns_api.patch(name, &params, &Patch::Apply(&ns)).await?;
    Ok(())
}

pub async fn delete_namespace(client: Client, name: &str) -> Result<()> {
    let ns_api: Api<Namespace> = Api::all(client);
    info!("Deleting namespace: {}", name);
    ns_api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

pub async fn namespace_phase(client: Client, name: &str) -> Result<NamespacePhase> {
    let ns_api: Api<Namespace> = Api::all(client);
    let Some(ns) = ns_api.get_opt(name).await? else {
        return Ok(NamespacePhase::Absent);
    };
    let phase = ns.status.and_then(|status| status.phase).unwrap_or_default();
    match phase.as_str() {
        "Terminating" => Ok(NamespacePhase::Terminating),
        _ => Ok(NamespacePhase::Active),
    }
}

pub async fn get_secret(client: Client, namespace: &str, name: &str) -> Result<Secret> {
    let secret_api: Api<Secret> = Api::namespaced(client, namespace);
    if let Some(secret) = secret_api.get_opt(name).await? {
        debug!("Found the secret {}", name);
        Ok(secret)
    } else {
        Err(Error::MissingSecretError(format!("{namespace}/{name}")))
    }
}

pub async fn secret_exists(client: Client, namespace: &str, name: &str) -> Result<bool> {
    let secret_api: Api<Secret> = Api::namespaced(client, namespace);
    Ok(secret_api.get_opt(name).await?.is_some())
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Pull username/password out of a secret's data map.
pub fn credentials_from_secret(secret: &Secret) -> Result<Credentials> {
    let name = secret.name_any();
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| Error::MissingSecretError(format!("secret {name} has no data")))?;
    let field = |key: &str| -> Result<String> {
        let bytes = data
            .get(key)
            .ok_or_else(|| Error::MissingSecretError(format!("secret {name} has no '{key}' entry")))?;
        String::from_utf8(bytes.0.clone())
            .map_err(|_| Error::InvalidErr(format!("secret {name} entry '{key}' is not utf-8")))
    };
    Ok(Credentials {
        username: field("username")?,
        password: field("password")?,
    })
}

pub async fn superuser_credentials(
    client: Client,
    namespace: &str,
    secret_name: &str,
) -> Result<Credentials> {
    let secret = get_secret(client, namespace, secret_name).await?;
    credentials_from_secret(&secret)
}

pub async fn get_service(client: Client, namespace: &str, name: &str) -> Result<Service> {
    let service_api: Api<Service> = Api::namespaced(client, namespace);
    Ok(service_api.get(name).await?)
}

pub async fn service_names_with_label(
    client: Client,
    namespace: &str,
    label: &str,
) -> Result<Vec<String>> {
    let service_api: Api<Service> = Api::namespaced(client, namespace);
    let services = service_api
        .list(&ListParams::default().labels(label))
        .await?;
    Ok(services.iter().map(|service| service.name_any()).collect())
}

pub async fn pod_names_with_label(
    client: Client,
    namespace: &str,
    label: &str,
) -> Result<Vec<String>> {
    let pod_api: Api<Pod> = Api::namespaced(client, namespace);
    let pods = pod_api.list(&ListParams::default().labels(label)).await?;
    Ok(pods.iter().map(|pod| pod.name_any()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use http::{Request, Response, StatusCode};
    use kube::client::Body;
    use tokio::task::JoinHandle;

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    fn mock_client() -> (Client, ApiServerHandle) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (Client::new(mock_service, "default"), handle)
    }

    async fn timeout_after_1s<T>(handle: JoinHandle<T>) -> T {
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded")
    }

    fn namespace_json(name: &str, phase: Option<&str>) -> Vec<u8> {
        let mut ns = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name },
        });
        if let Some(phase) = phase {
            ns["status"] = serde_json::json!({ "phase": phase });
        }
        serde_json::to_vec(&ns).unwrap()
    }

    #[tokio::test]
    async fn create_namespace_issues_a_server_side_apply() {
        let (client, mut handle) = mock_client();
        let verify = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            let uri = request.uri().to_string();
            assert!(uri.starts_with("/api/v1/namespaces/testns1?"), "uri: {uri}");
            assert!(uri.contains("force=true"), "uri: {uri}");
            assert!(uri.contains(&format!("fieldManager={FIELD_MANAGER}")), "uri: {uri}");
            let body = request.into_body().collect_bytes().await.unwrap();
            let applied: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_json_include!(
                actual: applied,
                expected: serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": "testns1" },
                })
            );
            send.send_response(
                Response::builder()
                    .body(Body::from(namespace_json("testns1", Some("Active"))))
                    .unwrap(),
            );
        });
        create_namespace(client, "testns1").await.unwrap();
        timeout_after_1s(verify).await;
    }

    #[tokio::test]
    async fn namespace_phase_maps_terminating() {
        let (client, mut handle) = mock_client();
        let verify = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert!(request.uri().to_string().starts_with("/api/v1/namespaces/doomed"));
            send.send_response(
                Response::builder()
                    .body(Body::from(namespace_json("doomed", Some("Terminating"))))
                    .unwrap(),
            );
        });
        let phase = namespace_phase(client, "doomed").await.unwrap();
        assert_eq!(phase, NamespacePhase::Terminating);
        assert!(phase.is_gone_or_going());
        timeout_after_1s(verify).await;
    }

    #[tokio::test]
    async fn namespace_phase_maps_a_404_to_absent() {
        let (client, mut handle) = mock_client();
        let verify = tokio::spawn(async move {
            let (_request, send) = handle.next_request().await.expect("service not called");
            let status = serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "reason": "NotFound",
                "code": 404,
            });
            send.send_response(
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from(serde_json::to_vec(&status).unwrap()))
                    .unwrap(),
            );
        });
        let phase = namespace_phase(client, "neverwas").await.unwrap();
        assert_eq!(phase, NamespacePhase::Absent);
        assert!(phase.is_gone_or_going());
        timeout_after_1s(verify).await;
    }

    #[tokio::test]
    async fn active_namespace_is_not_gone() {
        let (client, mut handle) = mock_client();
        let verify = tokio::spawn(async move {
            let (_request, send) = handle.next_request().await.expect("service not called");
            send.send_response(
                Response::builder()
                    .body(Body::from(namespace_json("alive", Some("Active"))))
                    .unwrap(),
            );
        });
        let phase = namespace_phase(client, "alive").await.unwrap();
        assert_eq!(phase, NamespacePhase::Active);
        assert!(!phase.is_gone_or_going());
        timeout_after_1s(verify).await;
    }

    #[tokio::test]
    async fn missing_secret_is_reported_by_name() {
        let (client, mut handle) = mock_client();
        let verify = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert!(request
                .uri()
                .to_string()
                .starts_with("/api/v1/namespaces/testns1/secrets/k8ssandra-superuser"));
            let status = serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "reason": "NotFound",
                "code": 404,
            });
            send.send_response(
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from(serde_json::to_vec(&status).unwrap()))
                    .unwrap(),
            );
        });
        let err = get_secret(client, "testns1", "k8ssandra-superuser")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSecretError(_)));
        assert!(err.to_string().contains("testns1/k8ssandra-superuser"));
        timeout_after_1s(verify).await;
    }

    #[tokio::test]
    async fn listing_services_sends_the_label_selector() {
        let (client, mut handle) = mock_client();
        let verify = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            let uri = request.uri().to_string();
            assert!(uri.starts_with("/api/v1/namespaces/testns1/services?"), "uri: {uri}");
            assert!(uri.contains("labelSelector=app%3Dminio"), "uri: {uri}");
            let list = serde_json::json!({
                "apiVersion": "v1",
                "kind": "ServiceList",
                "metadata": {},
                "items": [
                    {
                        "apiVersion": "v1",
                        "kind": "Service",
                        "metadata": { "name": "minio-1623412", "namespace": "testns1" },
                    }
                ],
            });
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&list).unwrap()))
                    .unwrap(),
            );
        });
        let names = service_names_with_label(client, "testns1", "app=minio")
            .await
            .unwrap();
        assert_eq!(names, vec!["minio-1623412".to_string()]);
        timeout_after_1s(verify).await;
    }

    #[test]
    fn credentials_require_both_keys() {
        use k8s_openapi::ByteString;
        use std::collections::BTreeMap;

        let mut data = BTreeMap::new();
        data.insert("username".to_string(), ByteString(b"k8ssandra-superuser".to_vec()));
        let secret = Secret {
            data: Some(data.clone()),
            ..Secret::default()
        };
        let err = credentials_from_secret(&secret).unwrap_err();
        assert!(matches!(err, Error::MissingSecretError(_)));

        data.insert("password".to_string(), ByteString(b"hunter2".to_vec()));
        let secret = Secret {
            data: Some(data),
            ..Secret::default()
        };
        let creds = credentials_from_secret(&secret).unwrap();
        assert_eq!(creds.username, "k8ssandra-superuser");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn secret_without_data_is_missing() {
        let secret = Secret::default();
        let err = credentials_from_secret(&secret).unwrap_err();
        assert!(matches!(err, Error::MissingSecretError(_)));
    }
}
