use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::{update, Error, Reconcile, Result};
use crate::kubeclient::KubeClient;
use crate::resource::TrafficSplit;

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Splices a trafficsplit's backend weights into the weighted-cluster blocks
/// of a template configmap, then publishes the result as the `<template>-gen`
/// configmap the configmap reconciler reads.
pub struct TrafficSplitReconciler {
    splits: KubeClient<TrafficSplit>,
    configmaps: KubeClient<ConfigMap>,
    ts_to_configs: HashMap<String, String>,
    dry_run: bool,
}

impl TrafficSplitReconciler {
    pub fn new(
        splits: KubeClient<TrafficSplit>,
        configmaps: KubeClient<ConfigMap>,
        ts_to_configs: HashMap<String, String>,
        dry_run: bool,
    ) -> Self {
        Self {
            splits,
            configmaps,
            ts_to_configs,
            dry_run,
        }
    }
}

#[async_trait]
impl Reconcile for TrafficSplitReconciler {
    async fn reconcile(&self, name: &str) -> Result<()> {
        let ts = match self.splits.get(name).await {
            Ok(ts) => ts,
            Err(err) if err.is_not_found() => {
                info!(trafficsplit = %name, "trafficsplit not found, waiting for it to appear");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        debug!(trafficsplit = %name, spec = ?ts.spec, "reconciling trafficsplit");

        let tpl_name = self
            .ts_to_configs
            .get(name)
            .ok_or_else(|| Error::UnmappedTrafficSplit(name.to_owned()))?;
        let gen_name = format!("{tpl_name}-gen");

        let template = match self.configmaps.get(tpl_name).await {
            Ok(cm) => cm,
            Err(err) if err.is_not_found() => {
                warn!(configmap = %tpl_name, "template configmap not found, please create it");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let empty = BTreeMap::new();
        let data = merge_template(&ts, template.data.as_ref().unwrap_or(&empty))?;

        match self.configmaps.get(&gen_name).await {
            Ok(mut current) => {
                current.data = Some(data);
                if self.dry_run {
                    info!(configmap = %gen_name, "dry run, skipping replace");
                    return Ok(());
                }
                self.configmaps.replace(&gen_name, &current).await?;
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                let generated = derive_from_template(&template, &gen_name, data);
                if self.dry_run {
                    info!(configmap = %gen_name, "dry run, skipping create");
                    return Ok(());
                }
                self.configmaps.create(&generated).await?;
                info!(configmap = %gen_name, "created derived configmap");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Rewrites the weighted-cluster weights of every template file addressed by
/// `ts.spec.service`. Files without a matching virtual host are left out of
/// the result entirely.
fn merge_template(
    ts: &TrafficSplit,
    template: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    // Last entry wins when a service appears twice.
    let mut weights: HashMap<&str, u32> = HashMap::new();
    for backend in &ts.spec.backends {
        weights.insert(backend.service.as_str(), backend.weight);
    }

    let vhost = format!("name={}", ts.spec.service);
    let path = [
        "resources",
        "*",
        "virtual_hosts",
        vhost.as_str(),
        "routes",
        "*",
        "route",
        "weighted_clusters",
        "clusters",
    ];

    let mut merged = BTreeMap::new();
    for (file, text) in template {
        let mut doc: Value = serde_yaml::from_str(text).map_err(|source| Error::DecodeConfig {
            file: file.clone(),
            source,
        })?;

        // Each backend addresses its own `name=` cluster, so the mutations
        // commute and the output does not depend on iteration order.
        let matched = update::find(&mut doc, &path, &mut |clusters| {
            for (service, weight) in &weights {
                let cluster = format!("name={service}");
                update::find(clusters, &[cluster.as_str()], &mut |node| {
                    update::set(node, "weight", Value::Number((*weight).into()));
                });
            }
        });
        if !matched {
            debug!(file = %file, "no virtual host matches the trafficsplit, omitting file");
            continue;
        }

        let text = serde_yaml::to_string(&doc).map_err(|source| Error::EncodeConfig {
            file: file.clone(),
            source,
        })?;
        merged.insert(file.clone(), text);
    }

    Ok(merged)
}

/// Clones a template configmap into the shape of its derived twin: new name,
/// no resourceVersion (the api server assigns one on create), and without the
/// kubectl bookkeeping annotation.
pub(crate) fn derive_from_template(
    template: &ConfigMap,
    name: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    let mut annotations = template.metadata.annotations.clone().unwrap_or_default();
    annotations.remove(LAST_APPLIED_ANNOTATION);
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: template.metadata.namespace.clone(),
            labels: template.metadata.labels.clone(),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    }
}
