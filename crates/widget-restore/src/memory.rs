//! In-process kernel stand-in.
//!
//! [`MemoryKernel`] holds widget states the way a kernel would and answers
//! `request_state` on its comm channels with a full `update`, splitting
//! buffers out exactly like a real sender. Per-widget [`CommBehavior`]s
//! script the failure modes a live kernel produces: comms that never answer,
//! comms that close, comms already torn down, and corrupt replies.
//!
//! Used by `widget-restore replay` and throughout the tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use jupyter_protocol::{CommInfoReply, CommInfoRequest, JupyterMessage, JupyterMessageContent};
use log::{debug, trace};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use uuid::Uuid;
use widget_wire::{
    comm_ids_for, comm_info_reply, comm_info_request, requested_target, CommMessage, WidgetState,
    METHOD_REQUEST_STATE,
};

use crate::transport::{CommChannel, CommTransport, TransportError};
use crate::WidgetId;

/// How a widget's comm responds to a state request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommBehavior {
    /// Reply with the full state straight away.
    #[default]
    Reply,
    /// Send `count` unrelated messages before the update.
    NoiseFirst { count: usize },
    /// Reply after `delay_ms`.
    Delayed { delay_ms: u64 },
    /// Accept the request and never answer.
    Silent,
    /// Close the channel without answering.
    Close,
    /// Refuse to open the channel.
    FailOpen,
    /// Reply with more buffer paths than buffers.
    CorruptBuffers,
}

/// A message the engine sent to a comm.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub comm_id: WidgetId,
    pub msg_type: String,
    pub data: Value,
    pub metadata: Value,
    pub buffer_count: usize,
}

struct KernelWidget {
    target_name: String,
    state: WidgetState,
    behavior: CommBehavior,
}

#[derive(Default)]
struct KernelInner {
    widgets: BTreeMap<WidgetId, KernelWidget>,
    list_failure: Option<String>,
    open_now: usize,
    peak_open: usize,
    open_times: Vec<Instant>,
    sent: Vec<SentMessage>,
}

/// Shared handle to an in-process kernel's widget comms.
#[derive(Clone, Default)]
pub struct MemoryKernel {
    inner: Arc<Mutex<KernelInner>>,
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, KernelInner> {
        // Nothing panics while holding the lock
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a widget under a fresh comm id.
    pub fn add_widget(&self, state: WidgetState) -> WidgetId {
        let id = WidgetId::new(Uuid::new_v4().simple().to_string());
        self.insert_widget(id.clone(), state);
        id
    }

    /// Register (or replace) a widget under `id` on the ipywidgets target.
    pub fn insert_widget(&self, id: impl Into<WidgetId>, state: WidgetState) {
        self.insert_widget_on(crate::WIDGET_COMM_TARGET, id, state);
    }

    pub fn insert_widget_on(&self, target_name: &str, id: impl Into<WidgetId>, state: WidgetState) {
        self.lock().widgets.insert(
            id.into(),
            KernelWidget {
                target_name: target_name.to_string(),
                state,
                behavior: CommBehavior::Reply,
            },
        );
    }

    pub fn set_behavior(&self, id: &WidgetId, behavior: CommBehavior) {
        if let Some(widget) = self.lock().widgets.get_mut(id) {
            widget.behavior = behavior;
        }
    }

    /// Tear a widget down, as `widget.close()` in the kernel would.
    pub fn remove_widget(&self, id: &WidgetId) {
        self.lock().widgets.remove(id);
    }

    /// Make `list_open_channels` fail with `reason`.
    pub fn fail_listing(&self, reason: impl Into<String>) {
        self.lock().list_failure = Some(reason.into());
    }

    /// Most channels that were open at the same time.
    pub fn peak_open_channels(&self) -> usize {
        self.lock().peak_open
    }

    /// Channels open right now.
    pub fn open_channels(&self) -> usize {
        self.lock().open_now
    }

    /// When each channel was opened, in order.
    pub fn open_times(&self) -> Vec<Instant> {
        self.lock().open_times.clone()
    }

    /// Every message sent to the kernel, in order.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    fn reply_for(&self, id: &WidgetId) -> Reply {
        let inner = self.lock();
        let Some(widget) = inner.widgets.get(id) else {
            return Reply::Close;
        };
        let update = CommMessage::update(id.as_str(), &widget.state);
        match &widget.behavior {
            CommBehavior::Reply => Reply::Messages(vec![(None, update)]),
            CommBehavior::NoiseFirst { count } => {
                let mut messages: Vec<_> = (0..*count)
                    .map(|n| {
                        let mut data = Map::new();
                        data.insert("method".into(), Value::from("custom"));
                        data.insert("content".into(), json!({ "n": n }));
                        (None, CommMessage::new(id.as_str(), data, vec![]))
                    })
                    .collect();
                messages.push((None, update));
                Reply::Messages(messages)
            }
            CommBehavior::Delayed { delay_ms } => {
                Reply::Messages(vec![(Some(Duration::from_millis(*delay_ms)), update)])
            }
            CommBehavior::Silent => Reply::Silent,
            CommBehavior::Close | CommBehavior::FailOpen => Reply::Close,
            CommBehavior::CorruptBuffers => {
                let mut data = update.content.data;
                data.insert("buffer_paths".into(), json!([["missing"], ["also-missing"]]));
                Reply::Messages(vec![(
                    None,
                    CommMessage::new(id.as_str(), data, vec![Bytes::from_static(b"x")]),
                )])
            }
        }
    }

    /// Answer a `comm_info_request` the way a kernel's comm manager does.
    fn comm_info(&self, request: &CommInfoRequest) -> Result<CommInfoReply, TransportError> {
        let inner = self.lock();
        if let Some(reason) = &inner.list_failure {
            return Err(TransportError::ListFailed(reason.clone()));
        }
        let target = requested_target(request);
        let comms = inner
            .widgets
            .iter()
            .filter(|(_, widget)| target.as_deref().map_or(true, |t| widget.target_name == t))
            .map(|(id, widget)| (id.as_str(), widget.target_name.as_str()));
        comm_info_reply(comms).map_err(|err| TransportError::ListFailed(err.to_string()))
    }
}

enum Reply {
    Messages(Vec<(Option<Duration>, CommMessage)>),
    Silent,
    Close,
}

impl CommTransport for MemoryKernel {
    type Channel = MemoryChannel;

    async fn open_channel(
        &self,
        target_name: &str,
        comm_id: &WidgetId,
    ) -> Result<MemoryChannel, TransportError> {
        let mut inner = self.lock();
        let refusal = match inner.widgets.get(comm_id) {
            None => Some("no such comm".to_string()),
            Some(widget) if widget.behavior == CommBehavior::FailOpen => {
                Some("kernel refused the comm".to_string())
            }
            Some(widget) if widget.target_name != target_name => {
                Some(format!("comm is registered on {}", widget.target_name))
            }
            Some(_) => None,
        };
        if let Some(reason) = refusal {
            return Err(TransportError::OpenFailed {
                comm_id: comm_id.to_string(),
                reason,
            });
        }

        inner.open_now += 1;
        inner.peak_open = inner.peak_open.max(inner.open_now);
        inner.open_times.push(Instant::now());
        trace!("[memory-kernel] Opened comm {}", comm_id);

        Ok(MemoryChannel {
            id: comm_id.clone(),
            kernel: self.clone(),
            inbox: VecDeque::new(),
            closed: false,
        })
    }

    async fn list_open_channels(
        &self,
        target_name: &str,
    ) -> Result<BTreeSet<WidgetId>, TransportError> {
        let request = comm_info_request(target_name)
            .map_err(|err| TransportError::ListFailed(err.to_string()))?;
        let reply = self.comm_info(&request)?;
        Ok(comm_ids_for(&reply, target_name)
            .into_iter()
            .map(WidgetId::from)
            .collect())
    }
}

/// Channel half held by the engine.
pub struct MemoryChannel {
    id: WidgetId,
    kernel: MemoryKernel,
    inbox: VecDeque<(Option<Duration>, JupyterMessage)>,
    closed: bool,
}

impl CommChannel for MemoryChannel {
    fn comm_id(&self) -> &WidgetId {
        &self.id
    }

    async fn send(&mut self, message: JupyterMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed(self.id.to_string()));
        }
        let msg_type = message.header.msg_type;
        let data = match message.content {
            JupyterMessageContent::CommMsg(comm) => Value::Object(comm.data),
            _ => {
                return Err(TransportError::SendFailed {
                    comm_id: self.id.to_string(),
                    reason: format!("comms only carry comm_msg, not {}", msg_type),
                })
            }
        };
        let is_request = data.get("method").and_then(Value::as_str) == Some(METHOD_REQUEST_STATE);
        self.kernel.lock().sent.push(SentMessage {
            comm_id: self.id.clone(),
            msg_type,
            data,
            metadata: message.metadata,
            buffer_count: message.buffers.len(),
        });

        if is_request {
            match self.kernel.reply_for(&self.id) {
                Reply::Messages(messages) => self
                    .inbox
                    .extend(messages.into_iter().map(|(delay, m)| (delay, m.into()))),
                Reply::Silent => debug!("[memory-kernel] Comm {} stays silent", self.id),
                Reply::Close => self.closed = true,
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<JupyterMessage> {
        match self.inbox.pop_front() {
            Some((delay, message)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Some(message)
            }
            None if self.closed => None,
            None => futures::future::pending().await,
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let mut inner = self.kernel.lock();
        inner.open_now = inner.open_now.saturating_sub(1);
    }
}
