//! Probe against an in-process agent over TCP.

use std::sync::Arc;
use std::time::Duration;

use sccpp_core::{
    AuthorizationToken, CaptureEncoder, ConnectionListener, DeviceDescriptor, EncoderConfig,
    SessionConfig, SessionManager, SyntheticBackend, SyntheticConfig,
};
use sccpp_probe::config::ProbeConfig;
use sccpp_probe::{connection, recorder};
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_records_synthetic_stream_to_file() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticConfig {
        frame_interval: Duration::from_millis(2),
        frame_limit: Some(10),
        ..SyntheticConfig::default()
    }));
    let manager = Arc::new(SessionManager::new(
        SessionConfig::default(),
        DeviceDescriptor::new("Emulator").unwrap(),
        CaptureEncoder::new(backend, EncoderConfig::default()),
    ));
    manager.authorize(AuthorizationToken::new(&b"t"[..], &b""[..]));

    let listener = ConnectionListener::bind(&"tcp:127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let mut config = ProbeConfig::default();
    config.network.endpoint = listener.local_endpoint().clone();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(listener.run(Arc::clone(&manager), shutdown.clone()));

    let mut client = connection::connect(&config).await.unwrap();
    assert_eq!(client.descriptor(), "Emulator");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.h264");
    let file = tokio::fs::File::create(&path).await.unwrap();
    let mut sink = BufWriter::new(file);

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        recorder::record(&mut client, &mut sink, Some(4), &CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    drop(sink);

    assert_eq!(stats.frames, 4);
    assert_eq!(stats.key_frames, 4);
    assert_eq!(stats.span_us(), 6_000);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * 652);

    drop(client);
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}
