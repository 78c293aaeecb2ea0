//! Rebuilding models for every widget a kernel holds.
//!
//! State requests go out through [`crate::batch::run_batched`] so the comm
//! transport never sees more than `room` open requests or more than `rate`
//! new requests per second. Each widget's model is built as soon as its
//! state arrives and the channel is released right after.
//!
//! Failures stay with their widget: a comm that fails to open, closes, never
//! answers, or sends state no registered model accepts is logged, recorded in
//! [`BuildReport::failures`] and left out of the model map. Only failing to
//! enumerate the comms at all is fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;

use crate::batch::{run_batched_with_stats, BatchLimits, BatchStats, DEFAULT_WINDOW};
use crate::comm_client::{fetch_state_with_deadline, FetchError, FetchedState};
use crate::model::{ModelError, WidgetModel};
use crate::registry::ModelRegistry;
use crate::transport::{CommTransport, TransportError};
use crate::{WidgetId, WIDGET_COMM_TARGET};

/// Concurrent state requests allowed by default.
///
/// Kernels cap iopub at 1000 messages per second and ZMQ's default send
/// high-water mark is 1000; both defaults stay well below that.
pub const DEFAULT_ROOM: usize = 100;

/// State requests started per second by default.
pub const DEFAULT_RATE: usize = 500;

/// How long one widget may take to answer a state request by default.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for a reconstruction pass as a whole.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("Failed to enumerate widget comms: {0}")]
    Enumerate(#[source] TransportError),
}

/// Options for [`ModelBuilder`].
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub comm_target: String,
    pub limits: BatchLimits,
    /// `None` lets a silent comm hold its slot forever.
    pub fetch_timeout: Option<Duration>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            comm_target: WIDGET_COMM_TARGET.to_string(),
            limits: BatchLimits {
                room: NonZeroUsize::new(DEFAULT_ROOM).unwrap_or(NonZeroUsize::MIN),
                rate: NonZeroUsize::new(DEFAULT_RATE).unwrap_or(NonZeroUsize::MIN),
                window: DEFAULT_WINDOW,
            },
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
        }
    }
}

/// Why a widget was left out of the model map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The comm could not be opened or written to.
    Transport,
    /// The comm closed before answering.
    Closed,
    /// The comm did not answer in time.
    NoResponse,
    /// The reply could not be decoded.
    Malformed,
    /// No registered model matches the widget's type selector.
    UnknownType,
    /// The state lacks a type selector or was rejected by its constructor.
    InvalidState,
}

impl From<&FetchError> for FailureKind {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Transport(_) => FailureKind::Transport,
            FetchError::ChannelClosed(_) => FailureKind::Closed,
            FetchError::NoResponse { .. } => FailureKind::NoResponse,
            FetchError::Malformed { .. } => FailureKind::Malformed,
        }
    }
}

impl From<&ModelError> for FailureKind {
    fn from(err: &ModelError) -> Self {
        match err {
            ModelError::UnknownType { .. } => FailureKind::UnknownType,
            ModelError::MissingField(_)
            | ModelError::NotAString(_)
            | ModelError::InvalidState { .. } => FailureKind::InvalidState,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WidgetFailure {
    pub id: WidgetId,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of one reconstruction pass.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub models: BTreeMap<WidgetId, Arc<WidgetModel>>,
    pub failures: Vec<WidgetFailure>,
    pub stats: BatchStats,
}

impl BuildReport {
    pub fn failed_ids(&self) -> BTreeSet<WidgetId> {
        self.failures.iter().map(|f| f.id.clone()).collect()
    }
}

/// Drives state fetches and model construction for a set of widgets.
pub struct ModelBuilder<T> {
    transport: Arc<T>,
    registry: Arc<ModelRegistry>,
    options: BuilderOptions,
}

impl<T: CommTransport> ModelBuilder<T> {
    pub fn new(transport: Arc<T>, registry: Arc<ModelRegistry>, options: BuilderOptions) -> Self {
        Self {
            transport,
            registry,
            options,
        }
    }

    /// Enumerate the kernel's widget comms and build a model for each.
    pub async fn build_all(&self) -> Result<BuildReport, RestoreError> {
        let ids = self
            .transport
            .list_open_channels(&self.options.comm_target)
            .await
            .map_err(RestoreError::Enumerate)?;
        Ok(self.build_models(ids).await)
    }

    /// Build a model for each of `ids`. Never fails as a whole.
    pub async fn build_models(&self, ids: impl IntoIterator<Item = WidgetId>) -> BuildReport {
        let ids: BTreeSet<WidgetId> = ids.into_iter().collect();
        let requested = ids.len();
        info!(
            "[model-builder] Requesting state for {} widgets (room {}, rate {}/s)",
            requested, self.options.limits.room, self.options.limits.rate
        );

        let transport = &*self.transport;
        let registry = &*self.registry;
        let target = self.options.comm_target.as_str();
        let timeout = self.options.fetch_timeout;

        let (outcomes, stats) = run_batched_with_stats(
            ids,
            |id| async move {
                let outcome = build_one(transport, registry, target, &id, timeout).await;
                (id, outcome)
            },
            self.options.limits,
        )
        .await;

        let mut report = BuildReport {
            stats,
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(model) => {
                    report.models.insert(id, Arc::new(model));
                }
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            "[model-builder] Built {} of {} widget models ({} failed)",
            report.models.len(),
            requested,
            report.failures.len()
        );
        report
    }
}

async fn build_one<T: CommTransport>(
    transport: &T,
    registry: &ModelRegistry,
    target: &str,
    id: &WidgetId,
    timeout: Option<Duration>,
) -> Result<WidgetModel, WidgetFailure> {
    let FetchedState { channel, state } =
        match fetch_state_with_deadline(transport, target, id, timeout).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!("[model-builder] Skipping widget {}: {}", id, err);
                return Err(WidgetFailure {
                    id: id.clone(),
                    kind: FailureKind::from(&err),
                    reason: err.to_string(),
                });
            }
        };

    let built = registry.construct(id.clone(), state);
    // The model keeps no handle on its comm
    drop(channel);

    built.map_err(|err| {
        error!("[model-builder] Failed to create model for widget {}: {}", id, err);
        WidgetFailure {
            id: id.clone(),
            kind: FailureKind::from(&err),
            reason: err.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CommBehavior, MemoryKernel};
    use crate::registry::{default_registry, CONTROLS_MODULE};
    use serde_json::json;
    use widget_wire::{state_from_json, WidgetState};

    fn slider(value: i64) -> WidgetState {
        state_from_json(
            json!({
                "_model_name": "IntSliderModel",
                "_model_module": CONTROLS_MODULE,
                "_model_module_version": "2.0.0",
                "value": value
            })
            .as_object()
            .unwrap()
            .clone(),
        )
    }

    fn builder(kernel: &MemoryKernel, options: BuilderOptions) -> ModelBuilder<MemoryKernel> {
        ModelBuilder::new(
            Arc::new(kernel.clone()),
            Arc::new(default_registry()),
            options,
        )
    }

    #[test]
    fn test_default_limits() {
        let options = BuilderOptions::default();
        assert_eq!(options.limits.room.get(), 100);
        assert_eq!(options.limits.rate.get(), 500);
        assert_eq!(options.comm_target, "jupyter.widget");
        assert_eq!(options.fetch_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_one_unconstructable_widget_is_skipped() {
        let kernel = MemoryKernel::new();
        for i in 0..4 {
            kernel.insert_widget(format!("ok-{}", i), slider(i));
        }
        let mut bad = slider(0);
        bad.insert("_model_name".into(), "NoSuchModel".into());
        kernel.insert_widget("bad", bad);

        let report = builder(&kernel, BuilderOptions::default())
            .build_all()
            .await
            .unwrap();

        assert_eq!(report.models.len(), 4);
        assert!(!report.models.contains_key(&WidgetId::from("bad")));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id.as_str(), "bad");
        assert_eq!(report.failures[0].kind, FailureKind::UnknownType);
    }

    #[tokio::test]
    async fn test_widget_torn_down_after_listing() {
        let kernel = MemoryKernel::new();
        for i in 0..5 {
            kernel.insert_widget(format!("w{}", i), slider(i));
        }
        let ids = kernel.list_open_channels(WIDGET_COMM_TARGET).await.unwrap();
        assert_eq!(ids.len(), 5);
        kernel.remove_widget(&"w2".into());

        let report = builder(&kernel, BuilderOptions::default())
            .build_models(ids)
            .await;

        assert_eq!(report.models.len(), 4);
        assert!(!report.models.contains_key(&WidgetId::from("w2")));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id.as_str(), "w2");
        assert_eq!(report.failures[0].kind, FailureKind::Transport);
        assert_eq!(kernel.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_failure_mode_is_isolated() {
        let kernel = MemoryKernel::new();
        kernel.insert_widget("good", slider(1));
        for (id, behavior) in [
            ("silent", CommBehavior::Silent),
            ("closed", CommBehavior::Close),
            ("refused", CommBehavior::FailOpen),
            ("corrupt", CommBehavior::CorruptBuffers),
        ] {
            kernel.insert_widget(id, slider(0));
            kernel.set_behavior(&id.into(), behavior);
        }
        let untyped = json!({"value": 1}).as_object().unwrap().clone();
        kernel.insert_widget("untyped", state_from_json(untyped));

        let options = BuilderOptions {
            fetch_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let report = builder(&kernel, options).build_all().await.unwrap();

        assert_eq!(
            report.models.keys().collect::<Vec<_>>(),
            vec![&WidgetId::from("good")]
        );
        let kinds: BTreeMap<_, _> = report
            .failures
            .iter()
            .map(|f| (f.id.as_str().to_string(), f.kind))
            .collect();
        assert_eq!(kinds["silent"], FailureKind::NoResponse);
        assert_eq!(kinds["closed"], FailureKind::Closed);
        assert_eq!(kinds["refused"], FailureKind::Transport);
        assert_eq!(kinds["corrupt"], FailureKind::Malformed);
        assert_eq!(kinds["untyped"], FailureKind::InvalidState);
        assert_eq!(kernel.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let kernel = MemoryKernel::new();
        kernel.insert_widget("w1", slider(1));
        kernel.fail_listing("kernel restarting");

        let result = builder(&kernel, BuilderOptions::default()).build_all().await;
        assert!(matches!(result, Err(RestoreError::Enumerate(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_bounds_open_channels() {
        let kernel = MemoryKernel::new();
        for i in 0..30 {
            let id = format!("w{:02}", i);
            kernel.insert_widget(id.clone(), slider(i));
            kernel.set_behavior(&id.into(), CommBehavior::Delayed { delay_ms: 100 });
        }
        let options = BuilderOptions {
            limits: BatchLimits::new(4, 500).unwrap(),
            ..Default::default()
        };

        let report = builder(&kernel, options).build_all().await.unwrap();
        assert_eq!(report.models.len(), 30);
        assert_eq!(kernel.peak_open_channels(), 4);
        assert_eq!(report.stats.peak_in_flight, 4);
    }

    #[tokio::test]
    async fn test_no_retries_for_failed_ids() {
        let kernel = MemoryKernel::new();
        kernel.insert_widget("good", slider(1));
        kernel.insert_widget("closed", slider(2));
        kernel.set_behavior(&"closed".into(), CommBehavior::Close);

        let report = builder(&kernel, BuilderOptions::default())
            .build_models(vec!["good".into(), "closed".into(), "good".into()])
            .await;

        assert_eq!(report.models.len(), 1);
        assert_eq!(report.failed_ids().len(), 1);
        // One request per distinct id, none repeated
        assert_eq!(kernel.sent_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_models_carry_hydrated_state() {
        let kernel = MemoryKernel::new();
        let mut state = slider(5);
        state.insert(
            "data".into(),
            widget_wire::StateValue::Buffer(bytes::Bytes::from_static(b"raw")),
        );
        kernel.insert_widget("img", state.clone());

        let report = builder(&kernel, BuilderOptions::default())
            .build_all()
            .await
            .unwrap();
        let model = &report.models[&WidgetId::from("img")];
        assert_eq!(model.state(), &state);
        assert_eq!(model.model_module(), CONTROLS_MODULE);
    }
}
