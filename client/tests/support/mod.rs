pub mod mock_sidecar;

use sidecar_client::Client;

/// Spawns a `MockSidecar` on a Unix socket and connects a real `Client` to
/// it, exercising the same wire path (codec, streaming, metadata) a
/// connection to a live sidecar would.
pub async fn connected_client(sidecar: mock_sidecar::MockSidecar) -> (Client, std::sync::Arc<mock_sidecar::AckLog>) {
    let acks = sidecar.acks.clone();
    let socket = mock_sidecar::spawn(sidecar).await;
    let target = format!("unix://{}", socket.display());
    let client = Client::builder()
        .target(target)
        .connect()
        .await
        .expect("connect to mock sidecar");
    (client, acks)
}
