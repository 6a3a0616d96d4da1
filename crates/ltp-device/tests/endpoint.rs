//! End-to-end device scenarios over loopback TCP and UDP: capability
//! exchange, stream setup and teardown, control set/get, and source
//! subscription.

use std::sync::Arc;
use std::time::Duration;

use ltp_device::backend::BufferRenderer;
use ltp_device::pattern::GradientPattern;
use ltp_device::{Sink, SinkConfig, Source, SourceConfig};
use ltp_transport::{ControlClient, DataReceiver, DataSender};
use ltp_wire::message::StreamFormat;
use ltp_wire::{ColorFormat, Encoding, Message, StreamAction};

fn sink_config() -> SinkConfig {
    SinkConfig {
        name: "Sink A".to_string(),
        dimensions: vec![60],
        control_host: "127.0.0.1".to_string(),
        advertise: false,
        ..SinkConfig::default()
    }
}

async fn wait_for_frames(handle: &ltp_device::backend::BufferRendererHandle, expected: u64) {
    for _ in 0..100 {
        if handle.frame_count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn capability_exchange() {
    let (renderer, _handle) = BufferRenderer::new();
    let mut sink = Sink::new(sink_config(), Box::new(renderer)).unwrap();
    sink.start().await.unwrap();

    let client = ControlClient::connect("127.0.0.1", sink.control_port())
        .await
        .unwrap();
    let response = client
        .request(Message::CapabilityRequest { seq: None })
        .await
        .unwrap();

    match response {
        Message::CapabilityResponse { seq, device } => {
            assert_eq!(seq, Some(1));
            assert_eq!(device["pixels"], 60);
            let brightness = device["controls"]
                .as_array()
                .unwrap()
                .iter()
                .find(|c| c["id"] == "brightness")
                .expect("brightness control advertised");
            assert_eq!(brightness["type"], "number");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    client.close().await;
    sink.stop().await;
}

#[tokio::test]
async fn stream_setup_data_flow_and_teardown() {
    let (renderer, handle) = BufferRenderer::new();
    let mut sink = Sink::new(sink_config(), Box::new(renderer)).unwrap();
    sink.start().await.unwrap();

    let client = ControlClient::connect("127.0.0.1", sink.control_port())
        .await
        .unwrap();

    let response = client
        .request(Message::StreamSetup {
            seq: None,
            format: StreamFormat::default(),
            udp_port: None,
        })
        .await
        .unwrap();
    let (udp_port, stream_id) = match response {
        Message::StreamSetupResponse {
            status,
            udp_port,
            stream_id,
            ..
        } => {
            assert_eq!(status, "ok");
            assert_ne!(udp_port, 0);
            assert_eq!(stream_id, "stream-0001");
            (udp_port, stream_id)
        }
        other => panic!("unexpected response: {other:?}"),
    };

    let sender = DataSender::connect("127.0.0.1", udp_port).await.unwrap();
    let pixels: Vec<u8> = (0..180).map(|i| (i % 251) as u8).collect();
    for _ in 0..5 {
        sender
            .send(&pixels, ColorFormat::Rgb, Encoding::Raw)
            .await
            .unwrap();
    }
    wait_for_frames(&handle, 5).await;
    assert_eq!(handle.frame_count(), 5);
    assert_eq!(handle.last_frame(), pixels);

    // Stop the stream; further packets must not reach the backend.
    let response = client
        .request(Message::StreamControl {
            seq: None,
            stream_id: stream_id.clone(),
            action: StreamAction::Stop,
        })
        .await
        .unwrap();
    assert!(matches!(
        response,
        Message::StreamControlResponse { ref status, .. } if status == "ok"
    ));

    for _ in 0..3 {
        sender
            .send(&pixels, ColorFormat::Rgb, Encoding::Raw)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.frame_count(), 5);

    // A second stop is a no-op, not an error.
    let response = client
        .request(Message::StreamControl {
            seq: None,
            stream_id,
            action: StreamAction::Stop,
        })
        .await
        .unwrap();
    assert!(matches!(
        response,
        Message::StreamControlResponse { ref status, .. } if status == "ok"
    ));

    client.close().await;
    sink.stop().await;
}

#[tokio::test]
async fn control_set_get_and_partial_failure() {
    let (renderer, _handle) = BufferRenderer::new();
    let mut sink = Sink::new(sink_config(), Box::new(renderer)).unwrap();
    sink.start().await.unwrap();

    let client = ControlClient::connect("127.0.0.1", sink.control_port())
        .await
        .unwrap();

    let mut values = serde_json::Map::new();
    values.insert("brightness".to_string(), serde_json::json!(0.5));
    let response = client
        .request(Message::ControlSet { seq: None, values })
        .await
        .unwrap();
    match response {
        Message::ControlSetResponse {
            status, applied, ..
        } => {
            assert_eq!(status, "ok");
            assert_eq!(applied["brightness"], serde_json::json!(0.5));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let response = client
        .request(Message::ControlGet {
            seq: None,
            ids: Some(vec!["brightness".to_string()]),
        })
        .await
        .unwrap();
    match response {
        Message::ControlGetResponse { values, .. } => {
            assert_eq!(values["brightness"], serde_json::json!(0.5));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let mut values = serde_json::Map::new();
    values.insert("brightness".to_string(), serde_json::json!(2.0));
    let response = client
        .request(Message::ControlSet { seq: None, values })
        .await
        .unwrap();
    match response {
        Message::ControlSetResponse {
            status,
            applied,
            errors,
            ..
        } => {
            assert_eq!(status, "partial");
            assert!(applied.is_empty());
            let errors = errors.unwrap();
            assert_eq!(errors["brightness"]["code"], serde_json::json!(6));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    client.close().await;
    sink.stop().await;
}

#[tokio::test]
async fn subscribe_starts_flow_and_stream_control_stops_it() {
    let mut source = Source::new(
        SourceConfig {
            name: "Source B".to_string(),
            dimensions: vec![60],
            rate: 60,
            control_host: "127.0.0.1".to_string(),
            advertise: false,
            ..SourceConfig::default()
        },
        Box::new(GradientPattern::new(&[60])),
    )
    .unwrap();
    source.start().await.unwrap();

    let received = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let counter = received.clone();
    let receiver = DataReceiver::bind(
        "127.0.0.1",
        0,
        Arc::new(move |_packet| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    let client = ControlClient::connect("127.0.0.1", source.control_port())
        .await
        .unwrap();
    let response = client
        .request(Message::Subscribe {
            seq: None,
            target: ltp_wire::SubscribeTarget {
                dimensions: vec![60],
                color: ColorFormat::Rgb,
                rate: 30,
            },
            callback_host: Some("127.0.0.1".to_string()),
            callback_port: Some(receiver.local_port()),
        })
        .await
        .unwrap();
    let stream_id = match response {
        Message::SubscribeResponse {
            status,
            actual,
            stream_id,
            ..
        } => {
            assert_eq!(status, "ok");
            assert_eq!(actual.dimensions, vec![60]);
            stream_id
        }
        other => panic!("unexpected response: {other:?}"),
    };

    // Subscribe implicitly starts the flow.
    for _ in 0..100 {
        if received.load(std::sync::atomic::Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(received.load(std::sync::atomic::Ordering::SeqCst) >= 3);

    // Stop on the returned stream id ends the flow.
    client
        .request(Message::StreamControl {
            seq: None,
            stream_id,
            action: StreamAction::Stop,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let at_stop = received.load(std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), at_stop);

    client.close().await;
    receiver.stop();
    source.stop().await;
}

#[tokio::test]
async fn subscribe_without_callback_is_rejected() {
    let mut source = Source::new(
        SourceConfig {
            dimensions: vec![8],
            control_host: "127.0.0.1".to_string(),
            advertise: false,
            ..SourceConfig::default()
        },
        Box::new(GradientPattern::new(&[8])),
    )
    .unwrap();
    source.start().await.unwrap();

    let client = ControlClient::connect("127.0.0.1", source.control_port())
        .await
        .unwrap();
    let response = client
        .request(Message::Subscribe {
            seq: None,
            target: ltp_wire::SubscribeTarget {
                dimensions: vec![8],
                color: ColorFormat::Rgb,
                rate: 30,
            },
            callback_host: None,
            callback_port: None,
        })
        .await
        .unwrap();
    match response {
        Message::Error { code, .. } => assert_eq!(code, ltp_wire::ErrorCode::InvalidValue),
        other => panic!("unexpected response: {other:?}"),
    }

    client.close().await;
    source.stop().await;
}
