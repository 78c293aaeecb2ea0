//! One reconstruction pass over a rendered page.

use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::config::RestoreConfig;
use crate::document::DocumentHandle;
use crate::host::HostShell;
use crate::model_builder::{BuildReport, BuilderOptions, ModelBuilder, WidgetFailure};
use crate::placeholder::{attach_views_for, AttachReport};
use crate::registry::ModelRegistry;
use crate::transport::CommTransport;
use crate::views::ViewFactory;
use crate::WidgetId;

pub use crate::model_builder::RestoreError;

/// What a pass produced.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    /// Ids with a rebuilt model, in order.
    pub models: Vec<WidgetId>,
    pub failures: Vec<WidgetFailure>,
    pub views: AttachReport,
    pub build: BuildSummary,
}

/// Throttle figures from the model build.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BuildSummary {
    pub requested: usize,
    pub peak_in_flight: usize,
    pub peak_window_starts: usize,
}

/// Rebuilds widget models from a kernel and binds their views to a page.
pub struct RestoreSession<T, V, H> {
    builder: ModelBuilder<T>,
    views: V,
    host: H,
    marker_mime_type: String,
}

impl<T, V, H> RestoreSession<T, V, H>
where
    T: CommTransport,
    V: ViewFactory,
    H: HostShell,
{
    pub fn new(
        transport: Arc<T>,
        registry: Arc<ModelRegistry>,
        views: V,
        host: H,
        config: &RestoreConfig,
    ) -> Result<Self, crate::config::ConfigError> {
        let options: BuilderOptions = config.builder_options()?;
        Ok(Self {
            builder: ModelBuilder::new(transport, registry, options),
            views,
            host,
            marker_mime_type: config.marker_mime_type.clone(),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run one pass: pause host polling, rebuild every model, attach views.
    ///
    /// Only failing to enumerate the kernel's widgets is an error; anything
    /// that goes wrong for a single widget ends up in the report.
    pub async fn run(
        &mut self,
        doc: &mut dyn DocumentHandle,
    ) -> Result<SessionReport, RestoreError> {
        self.host.pause_polling();

        let BuildReport {
            models,
            failures,
            stats,
        } = self.builder.build_all().await?;

        let views = attach_views_for(doc, &self.marker_mime_type, &models, &self.views).await;

        info!(
            "[session] Restored {} widgets, bound {} views",
            models.len(),
            views.bound.len()
        );
        Ok(SessionReport {
            models: models.into_keys().collect(),
            failures,
            views,
            build: BuildSummary {
                requested: stats.started,
                peak_in_flight: stats.peak_in_flight,
                peak_window_starts: stats.peak_window_starts,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::memory::MemoryKernel;
    use crate::registry::default_registry;
    use crate::views::SummaryViewFactory;

    #[tokio::test]
    async fn test_enumeration_failure_still_pauses_host() {
        let kernel = MemoryKernel::new();
        kernel.fail_listing("kernel is gone");
        let mut session = RestoreSession::new(
            Arc::new(kernel),
            Arc::new(default_registry()),
            SummaryViewFactory::new(),
            RecordingHost::new(),
            &RestoreConfig::default(),
        )
        .unwrap();

        let mut doc = crate::document::MemoryDocument::new();
        assert!(matches!(
            session.run(&mut doc).await,
            Err(RestoreError::Enumerate(_))
        ));
        assert_eq!(session.host.pause_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_room_config_is_rejected() {
        let config = RestoreConfig {
            room: 0,
            ..Default::default()
        };
        let session = RestoreSession::new(
            Arc::new(MemoryKernel::new()),
            Arc::new(default_registry()),
            SummaryViewFactory::new(),
            RecordingHost::new(),
            &config,
        );
        assert!(session.is_err());
    }
}
