// rtms-test-utils: mock vendor media server for integration testing of the
// ingestion service.
//
// Speaks the integer-tagged msg_type protocol over two listeners: one for
// signaling connections and one shared by all media sub-sockets.  Every
// inbound client frame is recorded for assertions, and tests can inject
// frames (keep-alives, state changes, media payloads) into live sockets.

pub mod frames;
pub mod server;

pub use server::{MockRtmsConfig, MockRtmsServer, Recorded, RecordedChannel};

use std::time::Duration;

/// Poll `condition` until it returns true or the deadline passes.
pub async fn wait_for<F, Fut>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let step = Duration::from_millis(20);
    let started = tokio::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }
        if started.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(step).await;
    }
}
