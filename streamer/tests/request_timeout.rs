//! Request/reply failure behavior against a peer that accepts frames but
//! never acks: the send must time out, the staged shared-memory segments
//! must be unlinked, and the tracker must drain after reconciliation.

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use shared::config::{ChannelMode, DestinationConfig, EngineConfig, StreamConfig, TransportConfig};
use shared::display::{ComponentMode, ComponentValue, DisplayConfig, ViewerKind};
use shared::errors::{StreamError, TransportError};
use shared::messages::DType;

use streamer::{BatchOptions, FilenameParser, ImageArray, SourceData, StreamContext, StreamingBackend};

struct NullParser;

impl FilenameParser for NullParser {
    fn parse_filename(&self, _filename: &str) -> BTreeMap<String, ComponentValue> {
        BTreeMap::new()
    }
}

fn reqrep_config(port: u16) -> Arc<StreamConfig> {
    let mut destinations = std::collections::HashMap::new();
    destinations.insert(
        "viewer".to_string(),
        DestinationConfig {
            host: "127.0.0.1".to_string(),
            port,
            viewer: ViewerKind::Fiji,
            mode: ChannelMode::Reqrep,
        },
    );
    Arc::new(StreamConfig {
        transport: TransportConfig {
            connect_ready_delay_ms: 0,
            request_timeout_ms: 200,
            ..TransportConfig::default()
        },
        engine: EngineConfig::default(),
        listener: None,
        destinations,
    })
}

fn display() -> DisplayConfig {
    DisplayConfig {
        style_id: "gray".into(),
        component_modes: [("well".to_string(), ComponentMode::Window)].into(),
        component_order: vec!["well".into()],
        auto_contrast: None,
        variable_size_handling: None,
    }
}

#[cfg(target_os = "linux")]
fn shm_names_for_this_process() -> Vec<String> {
    let marker = format!("fiji_{}-", std::process::id());
    std::fs::read_dir("/dev/shm")
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.contains(&marker))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn timeout_unlinks_buffers_and_reconciles_tracker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // Accept and hold the connection without ever replying.
    thread::spawn(move || {
        let conn = listener.accept();
        thread::sleep(Duration::from_secs(3));
        drop(conn);
    });

    let context = Arc::new(StreamContext::default());
    let backend = StreamingBackend::new(ViewerKind::Fiji, reqrep_config(port), Arc::clone(&context));

    let parser = NullParser;
    let display = display();
    let opts = BatchOptions {
        dest: "viewer",
        display_config: &display,
        parser: &parser,
        step_name: "step",
        step_index: 0,
        source: None,
        plate_path: None,
        images_dir: None,
    };

    let image = SourceData::Image(ImageArray {
        shape: vec![4, 4],
        dtype: DType::U8,
        data: vec![9u8; 16],
    });

    let err = backend
        .save_batch(vec![image], &["A01.tif"], &opts)
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Transport(TransportError::Timeout { .. })
    ));

    // Reconciliation: nothing outstanding once the failure surfaced.
    let tracker = context
        .trackers
        .get_or_create(&format!("127.0.0.1:{port}"), ViewerKind::Fiji);
    assert_eq!(tracker.outstanding(), 0);

    // The dropped batch must leave no segment behind in the OS namespace.
    #[cfg(target_os = "linux")]
    assert!(shm_names_for_this_process().is_empty());
}
