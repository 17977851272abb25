use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::debug;

use super::writer::Writer;
use super::{Reconcile, Result};
use crate::kubeclient::KubeClient;

/// Renders one configmap's `data` onto the local filesystem.
pub struct ConfigMapReconciler {
    client: KubeClient<ConfigMap>,
    writer: Writer,
}

impl ConfigMapReconciler {
    pub fn new(client: KubeClient<ConfigMap>, writer: Writer) -> Self {
        Self { client, writer }
    }
}

#[async_trait]
impl Reconcile for ConfigMapReconciler {
    async fn reconcile(&self, name: &str) -> Result<()> {
        debug!(configmap = %name, "reconciling configmap");
        let cm = self.client.get(name).await?;
        self.writer.write(&cm).await?;
        Ok(())
    }
}
