use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Client, Config};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{init, Controller};
use crate::kubeclient::{self, KubeClient};
use crate::reconciler::{self, ConfigMapReconciler, TrafficSplitReconciler};
use crate::reconciler::writer::Writer;
use crate::resource::TrafficSplit;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid apiserver url {url:?}: {source}")]
    InvalidServer {
        url: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("failed to build kubernetes client: {0}")]
    Client(#[source] kube::Error),

    #[error("mismatching number of configmaps and trafficsplits")]
    ConfigCountMismatch,

    #[error("failed to initialize configmap {name}: {source}")]
    Init {
        name: String,
        #[source]
        source: kubeclient::Error,
    },

    #[error(transparent)]
    Reconcile(#[from] reconciler::Error),

    #[error("controller task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Wires clients, reconcilers, and controllers, and supervises their tasks.
#[allow(clippy::struct_excessive_bools)]
pub struct Manager {
    pub namespace: String,
    pub server: String,
    pub token_file: String,
    pub insecure: bool,
    pub smi: bool,
    pub watch: bool,
    pub dry_run: bool,
    pub onetime: bool,
    pub sync_interval: Duration,
    pub output_dir: String,
    pub configmaps: Vec<String>,
    pub trafficsplits: Vec<String>,
}

impl Manager {
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let client = self.build_client()?;
        let cm_client = KubeClient::<ConfigMap>::namespaced(client.clone(), &self.namespace);

        // With SMI enabled the configmap controller reads the derived twins;
        // the trafficsplit controller is the only writer of those.
        let gen_configs = if self.smi {
            self.configmaps.iter().map(|c| format!("{c}-gen")).collect()
        } else {
            self.configmaps.clone()
        };

        let mut controllers: Vec<Arc<Controller>> = Vec::new();

        if self.smi {
            let ts_to_configs = pair_splits(&self.trafficsplits, &self.configmaps)?;
            for tpl in &self.configmaps {
                init::init_configmap(&cm_client, tpl, &format!("{tpl}-gen"), self.dry_run)
                    .await
                    .map_err(|source| Error::Init {
                        name: tpl.clone(),
                        source,
                    })?;
            }

            let ts_client =
                KubeClient::<TrafficSplit>::namespaced(client.clone(), &self.namespace);
            let ts_reconciler = TrafficSplitReconciler::new(
                ts_client.clone(),
                cm_client.clone(),
                ts_to_configs,
                self.dry_run,
            );
            // The trafficsplit controller comes first so that, in onetime
            // mode, every `-gen` twin is rewritten before it is rendered.
            controllers.push(Arc::new(Controller::new(
                self.trafficsplits.clone(),
                Arc::new(ts_client),
                Arc::new(ts_reconciler),
            )));
        }

        let cm_reconciler =
            ConfigMapReconciler::new(cm_client.clone(), Writer::new(&self.output_dir));
        controllers.push(Arc::new(Controller::new(
            gen_configs,
            Arc::new(cm_client),
            Arc::new(cm_reconciler),
        )));

        if self.onetime {
            for controller in &controllers {
                controller.once().await?;
            }
            return Ok(());
        }

        info!(namespace = %self.namespace, "starting splicer");

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for controller in &controllers {
            let (c, t) = (Arc::clone(controller), token.clone());
            let interval = self.sync_interval;
            tasks.spawn(async move {
                c.poll(t, interval).await;
                Ok(())
            });

            if self.watch {
                let (c, t) = (Arc::clone(controller), token.clone());
                tasks.spawn(async move {
                    c.watch(t).await;
                    Ok(())
                });
            }

            let (c, t) = (Arc::clone(controller), token.clone());
            tasks.spawn(async move { c.run(t).await.map_err(Error::from) });
        }

        // The first task failure is fatal; dropping the set on early return
        // aborts the rest.
        while let Some(joined) = tasks.join_next().await {
            joined??;
        }
        Ok(())
    }

    fn build_client(&self) -> Result<Client> {
        let cluster_url = self
            .server
            .parse::<http::Uri>()
            .map_err(|source| Error::InvalidServer {
                url: self.server.clone(),
                source,
            })?;
        let mut config = Config::new(cluster_url);
        config.default_namespace = self.namespace.clone();
        config.accept_invalid_certs = self.insecure;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.auth_info.token_file = Some(self.token_file.clone());
        Client::try_from(config).map_err(Error::Client)
    }
}

/// Pairs trafficsplits with their template configmaps positionally.
fn pair_splits(
    trafficsplits: &[String],
    configmaps: &[String],
) -> Result<HashMap<String, String>> {
    if trafficsplits.len() != configmaps.len() {
        return Err(Error::ConfigCountMismatch);
    }
    Ok(trafficsplits
        .iter()
        .cloned()
        .zip(configmaps.iter().cloned())
        .collect())
}
