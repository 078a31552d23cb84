//! [`ResourceClient`] backed by the Kubernetes API server.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use super::{ManagedObject, PodObservation, ResourceClient, label_selector};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};

/// Label the endpoint-slice controller puts on every slice of a service.
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

/// Map the API errors the core recovers from onto its own variants.
fn classify(err: kube::Error, what: &str) -> Error {
    match err {
        kube::Error::Api(ref resp) if resp.code == 409 => {
            Error::Conflict(format!("{}: {}", what, resp.message))
        }
        kube::Error::Api(ref resp) if resp.code == 404 => {
            Error::NotFound(format!("{}: {}", what, resp.message))
        }
        other => Error::Kube(other),
    }
}

impl ResourceClient for KubeClient {
    async fn get<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create<K: ManagedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), obj)
            .await
            .map_err(|e| classify(e, &obj.name_any()))
    }

    async fn replace<K: ManagedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let name = obj.name_any();
        api.replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| classify(e, &name))
    }

    async fn delete<K: ManagedObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify(e, name))?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodObservation>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(&label_selector(selector)))
            .await?;
        Ok(pods.items.iter().map(PodObservation::from_pod).collect())
    }

    async fn list_endpoints(&self, namespace: &str, service_name: &str) -> Result<Vec<String>> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", SERVICE_NAME_LABEL, service_name);
        let slices = api.list(&ListParams::default().labels(&selector)).await?;

        let mut addresses: Vec<String> = slices
            .items
            .iter()
            .flat_map(|slice| slice.endpoints.iter())
            // A missing ready condition means ready
            .filter(|ep| {
                ep.conditions
                    .as_ref()
                    .and_then(|c| c.ready)
                    .unwrap_or(true)
            })
            .flat_map(|ep| ep.addresses.iter().cloned())
            .collect();
        addresses.sort();
        addresses.dedup();

        debug!(service = %service_name, count = addresses.len(), "Listed endpoints");
        Ok(addresses)
    }
}
