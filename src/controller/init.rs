use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, info};

use crate::kubeclient::{KubeClient, Result};
use crate::reconciler::derive_from_template;

/// Seeds `dst` from the `src` template when `dst` does not exist yet, so the
/// configmap controller has something to read before the first trafficsplit
/// reconcile lands.
pub(super) async fn init_configmap(
    configmaps: &KubeClient<ConfigMap>,
    src: &str,
    dst: &str,
    dry_run: bool,
) -> Result<()> {
    let template = configmaps.get(src).await?;
    match configmaps.get(dst).await {
        Ok(_) => {
            debug!(configmap = %dst, "derived configmap already exists");
            Ok(())
        }
        Err(err) if err.is_not_found() => {
            let data = template.data.clone().unwrap_or_default();
            let seeded = derive_from_template(&template, dst, data);
            if dry_run {
                info!(configmap = %dst, "dry run, skipping seed create");
                return Ok(());
            }
            configmaps.create(&seeded).await?;
            info!(src = %src, dst = %dst, "seeded derived configmap from template");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
