//! End-to-end reconstruction passes against the in-memory kernel.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;
use widget_restore::config::RestoreConfig;
use widget_restore::document::{DocumentHandle, MemoryDocument, NodeId};
use widget_restore::fixture::ReplayFixture;
use widget_restore::host::RecordingHost;
use widget_restore::memory::{CommBehavior, MemoryKernel};
use widget_restore::model_builder::FailureKind;
use widget_restore::placeholder::{BOUND_ATTRIBUTE, HOST_ATTRIBUTE};
use widget_restore::registry::default_registry;
use widget_restore::session::RestoreSession;
use widget_restore::views::SummaryViewFactory;
use widget_restore::{WidgetId, WidgetState, WIDGET_VIEW_MIMETYPE};

fn control(model_name: &str, view_name: &str, value: serde_json::Value) -> WidgetState {
    let state = json!({
        "_model_name": model_name,
        "_model_module": "@jupyter-widgets/controls",
        "_model_module_version": "2.0.0",
        "_view_name": view_name,
        "_view_module": "@jupyter-widgets/controls",
        "_view_module_version": "2.0.0",
        "value": value
    });
    widget_wire::state_from_json(state.as_object().unwrap().clone())
}

fn add_marker(doc: &mut MemoryDocument, parent: NodeId, id: &str) -> NodeId {
    let payload = json!({"version_major": 2, "version_minor": 0, "model_id": id});
    doc.script(parent, WIDGET_VIEW_MIMETYPE, &payload.to_string())
}

fn session(
    kernel: &MemoryKernel,
    config: &RestoreConfig,
) -> RestoreSession<MemoryKernel, SummaryViewFactory, RecordingHost> {
    RestoreSession::new(
        Arc::new(kernel.clone()),
        Arc::new(default_registry()),
        SummaryViewFactory::new(),
        RecordingHost::new(),
        config,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_full_pass_isolates_broken_widgets() {
    let kernel = MemoryKernel::new();
    kernel.insert_widget("slider", control("IntSliderModel", "IntSliderView", json!(4)));
    kernel.insert_widget("text", control("TextModel", "TextView", json!("hi")));
    kernel.insert_widget("check", control("CheckboxModel", "CheckboxView", json!(true)));
    kernel.insert_widget("mystery", control("MysteryModel", "MysteryView", json!(0)));
    kernel.insert_widget("stuck", control("IntSliderModel", "IntSliderView", json!(1)));
    kernel.set_behavior(&"stuck".into(), CommBehavior::Silent);

    let mut doc = MemoryDocument::new();
    let root = doc.root();
    let mut markers = Vec::new();
    for id in ["slider", "mystery", "text", "gone", "check", "stuck"] {
        let cell = doc.element(root, "div", &[("class", "jp-OutputArea-output")]);
        markers.push((id, cell, add_marker(&mut doc, cell, id)));
    }

    let config = RestoreConfig {
        fetch_timeout_ms: 5_000,
        ..Default::default()
    };
    let mut session = session(&kernel, &config);
    let report = session.run(&mut doc).await.unwrap();

    assert_eq!(
        report.models,
        vec![
            WidgetId::from("check"),
            WidgetId::from("slider"),
            WidgetId::from("text")
        ]
    );
    let failures: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.id.as_str().to_string(), f.kind))
        .collect();
    assert!(failures.contains(&("mystery".to_string(), FailureKind::UnknownType)));
    assert!(failures.contains(&("stuck".to_string(), FailureKind::NoResponse)));
    assert_eq!(report.views.bound.len(), 3);
    assert_eq!(report.views.missing.len(), 3);
    assert_eq!(session.host().pause_count(), 1);

    for (id, cell, marker) in markers {
        let bound = doc.get_attribute(marker, BOUND_ATTRIBUTE).is_some();
        let children = doc.children(cell);
        if ["slider", "text", "check"].contains(&id) {
            assert!(bound, "{} should be bound", id);
            assert_eq!(children.len(), 2);
            assert_eq!(children[1], marker);
            assert_eq!(
                doc.get_attribute(children[0], HOST_ATTRIBUTE).as_deref(),
                Some(id)
            );
        } else {
            assert!(!bound, "{} should be untouched", id);
            assert_eq!(children, &[marker]);
        }
    }
    assert_eq!(kernel.open_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_thousand_widgets_respect_both_throttles() {
    let kernel = MemoryKernel::new();
    for i in 0..1000 {
        let id = format!("w{:04}", i);
        kernel.insert_widget(id.clone(), control("IntSliderModel", "IntSliderView", json!(i)));
        if i % 3 == 0 {
            kernel.set_behavior(&id.into(), CommBehavior::Delayed { delay_ms: 250 });
        }
    }

    let config = RestoreConfig::default();
    let mut doc = MemoryDocument::new();
    let report = session(&kernel, &config).run(&mut doc).await.unwrap();

    assert_eq!(report.models.len(), 1000);
    assert!(report.failures.is_empty());
    assert!(kernel.peak_open_channels() <= 100);
    assert!(report.build.peak_in_flight <= 100);
    assert!(report.build.peak_window_starts <= 500);

    // No trailing one-second window holds more than 500 starts
    let opened = kernel.open_times();
    assert_eq!(opened.len(), 1000);
    for pair in opened.windows(501) {
        assert!(pair[500] - pair[0] >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_config_file_drives_limits() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"room": 3, "rate": 1000, "fetch_timeout_ms": 0}}"#).unwrap();
    let config = RestoreConfig::from_file(file.path()).unwrap();
    assert_eq!(config.fetch_timeout(), None);

    let kernel = MemoryKernel::new();
    for i in 0..12 {
        let id = format!("w{}", i);
        let state = control("FloatSliderModel", "FloatSliderView", json!(0.5));
        kernel.insert_widget(id.clone(), state);
        kernel.set_behavior(&id.into(), CommBehavior::Delayed { delay_ms: 100 });
    }

    let mut doc = MemoryDocument::new();
    let report = session(&kernel, &config).run(&mut doc).await.unwrap();
    assert_eq!(report.models.len(), 12);
    assert_eq!(kernel.peak_open_channels(), 3);
}

#[tokio::test]
async fn test_rerun_binds_each_marker_once() {
    let kernel = MemoryKernel::new();
    kernel.insert_widget("a", control("ButtonModel", "ButtonView", json!(null)));
    kernel.insert_widget("b", control("ToggleButtonModel", "ToggleButtonView", json!(false)));

    let mut doc = MemoryDocument::new();
    let root = doc.root();
    add_marker(&mut doc, root, "a");
    add_marker(&mut doc, root, "b");

    let config = RestoreConfig::default();
    let mut session = session(&kernel, &config);
    let first = session.run(&mut doc).await.unwrap();
    assert_eq!(first.views.bound.len(), 2);
    let after_first = doc.to_spec();

    let second = session.run(&mut doc).await.unwrap();
    assert!(second.views.bound.is_empty());
    assert_eq!(second.views.already_bound, 2);
    assert_eq!(doc.to_spec(), after_first);
    assert_eq!(session.host().pause_count(), 2);
}

#[tokio::test]
async fn test_replay_fixture_from_disk() {
    let fixture = json!({
        "widgets": [
            {"id": "s1", "state": {
                "_model_name": "IntSliderModel",
                "_model_module": "@jupyter-widgets/controls",
                "_model_module_version": "2.0.0",
                "_view_name": "IntSliderView",
                "value": 9
            }, "behavior": {"kind": "noise_first", "count": 2}},
            {"id": "bad", "state": {"value": 1}, "behavior": {"kind": "close"}}
        ],
        "document": {"tag": "body", "children": [
            {"tag": "script",
             "attributes": {"type": WIDGET_VIEW_MIMETYPE},
             "children": ["{\"model_id\": \"s1\"}"]},
            {"tag": "script",
             "attributes": {"type": WIDGET_VIEW_MIMETYPE},
             "children": ["{\"model_id\": \"bad\"}"]}
        ]}
    });
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", fixture).unwrap();

    let fixture = ReplayFixture::from_path(file.path()).unwrap();
    let kernel = fixture.kernel().unwrap();
    let mut doc = fixture.document();

    let report = session(&kernel, &RestoreConfig::default())
        .run(&mut doc)
        .await
        .unwrap();
    assert_eq!(report.models, vec![WidgetId::from("s1")]);
    assert_eq!(report.failures[0].kind, FailureKind::Closed);
    assert_eq!(report.views.bound.len(), 1);
    assert_eq!(
        doc.text_content(report.views.bound[0].host).as_deref(),
        Some("IntSliderView s1 = 9")
    );
}
