//! Management API client
//!
//! Thin reqwest wrapper over the gateway's admin/management endpoints.
//! Cluster-internal resources (namespaces, services, pods) are fetched by
//! asking the gateway to invoke its kube-proxy service on the target edge;
//! the proxied response body comes back as a JSON string inside the reply.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

const KUBE_PROXY_SERVICE: &str = "gridlink-kube-proxy";

/// Edge id the gateway treats as "the central cluster itself".
pub const CENTRAL_EDGE: &str = "central";

/// Standard management reply envelope: `{code, data, msg}`.
#[derive(Debug, Deserialize)]
pub struct ApiReply {
    pub code: i32,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub msg: Option<String>,
}

/// Reply of `/manage/service/invoke`: the proxied body is a JSON string.
#[derive(Debug, Deserialize)]
struct InvokeReply {
    code: i32,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub edge_id: String,
    /// `central` or an edge cluster type
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Cluster {
    pub fn is_central(&self) -> bool {
        self.kind == CENTRAL_EDGE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubeNamespace {
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicePort {
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSpec {
    #[serde(default, rename = "clusterIP")]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubeService {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: ServiceSpec,
}

impl KubeService {
    /// Headless services have no routable address and cannot be tunneled.
    pub fn is_routable(&self) -> bool {
        matches!(self.spec.cluster_ip.as_deref(), Some(ip) if ip != "None")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerPort {
    #[serde(rename = "containerPort")]
    pub container_port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodStatus {
    #[serde(default, rename = "podIP")]
    pub pod_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubePod {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

pub struct ManagementApi {
    client: reqwest::Client,
    host: String,
    token: String,
}

impl ManagementApi {
    pub fn new(host: &str, token: &str) -> Result<Self> {
        if host.is_empty() {
            bail!("workspace host is empty; set it with 'gridlink workspace host <url>'");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Probe whether `host` answers as a gridlink gateway.
    pub async fn check_host(host: &str) -> Result<()> {
        let url = format!("{}/admin/ready", host.trim_end_matches('/'));
        let reply: ApiReply = reqwest::Client::new()
            .post(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?
            .json()
            .await
            .context("host did not answer with a management reply")?;
        if reply.code != 0 {
            bail!("host is not a valid gateway");
        }
        Ok(())
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.host, path);
        self.client
            .post(&url)
            .header("X-Request-Token", &self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))
    }

    pub async fn get_clusters(&self) -> Result<Vec<Cluster>> {
        let reply: ApiReply = self
            .post("/manage/clusters", json!({}))
            .await?
            .json()
            .await
            .context("malformed cluster list reply")?;
        if reply.code != 0 {
            bail!(reply.msg.unwrap_or_else(|| "cluster list failed".to_string()));
        }
        serde_json::from_value(reply.data).context("malformed cluster list")
    }

    /// Invoke the kube-proxy service on an edge and decode its body.
    async fn invoke(&self, edge_id: &str, path: &str, body: Value) -> Result<Value> {
        let edge = if edge_id == CENTRAL_EDGE || edge_id.is_empty() {
            Value::Null
        } else {
            Value::String(edge_id.to_string())
        };
        let reply: InvokeReply = self
            .post(
                "/manage/service/invoke",
                json!({
                    "edgeId": edge,
                    "serviceName": KUBE_PROXY_SERVICE,
                    "path": path,
                    "headers": { "Content-Type": "application/json;charset=UTF-8" },
                    "body": body.to_string(),
                }),
            )
            .await?
            .json()
            .await
            .context("malformed invoke reply")?;
        if reply.code != 0 {
            bail!(reply.msg.unwrap_or_else(|| "service invoke failed".to_string()));
        }
        serde_json::from_str(&reply.body).context("malformed invoke body")
    }

    pub async fn get_namespaces(&self, edge_id: &str) -> Result<Vec<KubeNamespace>> {
        let body = self.invoke(edge_id, "/kube/resource/Namespace", json!({})).await?;
        serde_json::from_value(body).context("malformed namespace list")
    }

    pub async fn get_services(&self, edge_id: &str, namespace: &str) -> Result<Vec<KubeService>> {
        let body = self
            .invoke(edge_id, "/kube/resource/Service", json!({ "namespace": namespace }))
            .await?;
        serde_json::from_value(body).context("malformed service list")
    }

    pub async fn get_pods(&self, edge_id: &str, namespace: &str) -> Result<Vec<KubePod>> {
        let body = self
            .invoke(edge_id, "/kube/resource/Pod", json!({ "namespace": namespace }))
            .await?;
        serde_json::from_value(body).context("malformed pod list")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_decoding() {
        let clusters: Vec<Cluster> = serde_json::from_value(json!([
            { "id": "c0", "name": "central", "type": "central" },
            { "id": "c1", "name": "staging", "type": "edge", "edgeId": "edge-1", "token": "t1" }
        ]))
        .unwrap();
        assert!(clusters[0].is_central());
        assert_eq!(clusters[0].edge_id, "");
        assert!(!clusters[1].is_central());
        assert_eq!(clusters[1].edge_id, "edge-1");
    }

    #[test]
    fn test_headless_services_are_not_routable() {
        let svc: KubeService = serde_json::from_value(json!({
            "metadata": { "name": "headless" },
            "spec": { "clusterIP": "None", "ports": [{ "port": 80 }] }
        }))
        .unwrap();
        assert!(!svc.is_routable());

        let svc: KubeService = serde_json::from_value(json!({
            "metadata": { "name": "web" },
            "spec": { "clusterIP": "10.43.0.9", "ports": [{ "port": 80 }] }
        }))
        .unwrap();
        assert!(svc.is_routable());
    }

    #[test]
    fn test_pod_decoding_tolerates_missing_fields() {
        let pod: KubePod = serde_json::from_value(json!({
            "metadata": { "name": "worker-0" }
        }))
        .unwrap();
        assert!(pod.status.pod_ip.is_none());
        assert!(pod.spec.containers.is_empty());
    }
}
