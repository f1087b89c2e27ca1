//! The backend module: one configuration bound to one object-store client.

use std::sync::Arc;

use crate::client::RgwClient;
use crate::config::{ExportParams, ModuleConfig};
use crate::error::FsalResult;
use crate::export::RgwExport;
use crate::upcall::UpcallOps;

/// Creates exports that share a configuration and a client.
#[derive(Clone)]
pub struct RgwModule {
    config: Arc<ModuleConfig>,
    client: Arc<dyn RgwClient>,
}

impl std::fmt::Debug for RgwModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgwModule").field("config", &self.config).finish_non_exhaustive()
    }
}

impl RgwModule {
    pub fn new(config: ModuleConfig, client: Arc<dyn RgwClient>) -> Self {
        Self {
            config: Arc::new(config),
            client,
        }
    }

    pub fn config(&self) -> &Arc<ModuleConfig> {
        &self.config
    }

    /// Mount a namespace for `params` and return its export.
    pub async fn create_export(
        &self,
        params: &ExportParams,
        upcall: Arc<dyn UpcallOps>,
    ) -> FsalResult<Arc<RgwExport>> {
        RgwExport::create(Arc::clone(&self.config), self.client.as_ref(), params, upcall).await
    }
}
