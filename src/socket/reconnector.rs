//! Auto-reconnecting live event socket
//!
//! One driver task owns the connection. It opens the socket, dispatches
//! frames to subscribers and, when the socket closes or fails to open,
//! sleeps for [`reconnect_delay`] before trying again. After
//! `max_attempts` consecutive reconnects without a successful open it gives
//! up until [`SocketReconnector::connect`] is called again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Url;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::events::{FindingCreated, ScanComplete, ScanFailed, ScanProgress, SocketEvent};
use super::transport::{Frame, SocketConnection, SocketConnector};

const BASE_RECONNECT_DELAY_MS: u64 = 1_000;
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Delay before the reconnect scheduled at `attempt` (0-based):
/// `min(1000 * 2^attempt, 30000)` ms.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let ms = BASE_RECONNECT_DELAY_MS
        .saturating_mul(factor)
        .min(MAX_RECONNECT_DELAY_MS);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff delay
    Reconnecting,
    /// Attempt cap reached; waits for an explicit `connect()`
    GivenUp,
    /// `disconnect()` was called
    Disposed,
}

#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub max_attempts: u32,
    /// Sent as the `token` query parameter
    pub token: Option<String>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            token: None,
        }
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Notification = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    scan_progress: Vec<Callback<ScanProgress>>,
    scan_complete: Vec<Callback<ScanComplete>>,
    scan_failed: Vec<Callback<ScanFailed>>,
    finding_created: Vec<Callback<FindingCreated>>,
    connected: Vec<Notification>,
    disconnected: Vec<Notification>,
}

struct Status {
    state: SocketState,
    attempt: u32,
    /// Cancels the current driver task
    driver: Option<CancellationToken>,
}

struct Shared {
    url: String,
    max_attempts: u32,
    connector: Arc<dyn SocketConnector>,
    status: Mutex<Status>,
    last_event: Mutex<Option<SocketEvent>>,
    subscribers: Mutex<Subscribers>,
    events: broadcast::Sender<SocketEvent>,
}

/// Outcome of reading from an open connection
enum Closed {
    Remote,
    Cancelled,
}

/// Manages one logical connection to the live event endpoint.
///
/// Never returns errors: failures become state transitions, malformed
/// frames are logged and dropped. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct SocketReconnector {
    shared: Arc<Shared>,
}

impl SocketReconnector {
    pub fn new(url: &str, options: SocketOptions, connector: Arc<dyn SocketConnector>) -> Self {
        let url = match &options.token {
            Some(token) => with_token(url, token),
            None => url.to_string(),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                url,
                max_attempts: options.max_attempts,
                connector,
                status: Mutex::new(Status {
                    state: SocketState::Idle,
                    attempt: 0,
                    driver: None,
                }),
                last_event: Mutex::new(None),
                subscribers: Mutex::new(Subscribers::default()),
                events,
            }),
        }
    }

    /// Start connecting.
    ///
    /// No-op while connecting, open or waiting to reconnect, and after
    /// `disconnect()`. From idle or given-up it starts over with
    /// `attempt = 0`. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let driver = {
            let mut status = self.shared.status();
            match status.state {
                SocketState::Connecting
                | SocketState::Open
                | SocketState::Reconnecting
                | SocketState::Disposed => return,
                SocketState::Idle | SocketState::GivenUp => {}
            }
            let driver = CancellationToken::new();
            status.state = SocketState::Connecting;
            status.attempt = 0;
            status.driver = Some(driver.clone());
            driver
        };
        tokio::spawn(drive(Arc::clone(&self.shared), driver));
    }

    /// Cancel any pending reconnect, close the live socket and stop for good
    pub fn disconnect(&self) {
        let mut status = self.shared.status();
        status.state = SocketState::Disposed;
        if let Some(driver) = status.driver.take() {
            driver.cancel();
        }
    }

    pub fn state(&self) -> SocketState {
        self.shared.status().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Reconnects scheduled since the last successful open
    pub fn attempt(&self) -> u32 {
        self.shared.status().attempt
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Most recently dispatched event
    pub fn last_event(&self) -> Option<SocketEvent> {
        self.shared
            .last_event
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Receive every event, regardless of type
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events.subscribe()
    }

    pub fn on_scan_progress(&self, callback: impl Fn(&ScanProgress) + Send + Sync + 'static) {
        self.shared.subscribers().scan_progress.push(Arc::new(callback));
    }

    pub fn on_scan_complete(&self, callback: impl Fn(&ScanComplete) + Send + Sync + 'static) {
        self.shared.subscribers().scan_complete.push(Arc::new(callback));
    }

    pub fn on_scan_failed(&self, callback: impl Fn(&ScanFailed) + Send + Sync + 'static) {
        self.shared.subscribers().scan_failed.push(Arc::new(callback));
    }

    pub fn on_finding_created(&self, callback: impl Fn(&FindingCreated) + Send + Sync + 'static) {
        self.shared.subscribers().finding_created.push(Arc::new(callback));
    }

    pub fn on_connected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.subscribers().connected.push(Arc::new(callback));
    }

    pub fn on_disconnected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.subscribers().disconnected.push(Arc::new(callback));
    }
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `state` unless this driver has been cancelled
    fn enter(&self, driver: &CancellationToken, state: SocketState) -> bool {
        let mut status = self.status();
        if driver.is_cancelled() {
            return false;
        }
        status.state = state;
        if state == SocketState::Open {
            status.attempt = 0;
        }
        true
    }

    /// Decide whether to try again after a close or failed open
    fn schedule_reconnect(&self, driver: &CancellationToken) -> Option<Duration> {
        let mut status = self.status();
        if driver.is_cancelled() {
            return None;
        }
        if status.attempt >= self.max_attempts {
            warn!(
                "Giving up on {} after {} reconnect attempts",
                self.url, status.attempt
            );
            status.state = SocketState::GivenUp;
            status.driver = None;
            return None;
        }

        let delay = reconnect_delay(status.attempt);
        status.attempt += 1;
        status.state = SocketState::Reconnecting;
        debug!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            self.url, delay, status.attempt, self.max_attempts
        );
        Some(delay)
    }

    /// Read frames until the peer closes or the driver is cancelled
    async fn pump(&self, conn: &mut dyn SocketConnection, driver: &CancellationToken) -> Closed {
        loop {
            let frame = tokio::select! {
                biased;
                _ = driver.cancelled() => return Closed::Cancelled,
                frame = conn.next_frame() => frame,
            };

            match frame {
                Some(Ok(Frame::Text(text))) => self.dispatch(&text),
                Some(Ok(Frame::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => self.dispatch(&text),
                    Err(_) => warn!("Dropping non-UTF-8 socket frame"),
                },
                Some(Err(e)) => {
                    warn!("Socket error: {}", e);
                    return Closed::Remote;
                }
                None => return Closed::Remote,
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let event: SocketEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed socket frame: {}", e);
                return;
            }
        };
        debug!("Socket event: {}", event.event_type());

        *self.last_event.lock().unwrap_or_else(|e| e.into_inner()) = Some(event.clone());
        // No receivers is fine
        let _ = self.events.send(event.clone());

        // Callbacks run without the subscriber lock held
        match &event {
            SocketEvent::ScanProgress(e) => {
                let callbacks = self.subscribers().scan_progress.clone();
                call_all(&callbacks, e);
            }
            SocketEvent::ScanComplete(e) => {
                let callbacks = self.subscribers().scan_complete.clone();
                call_all(&callbacks, e);
            }
            SocketEvent::ScanFailed(e) => {
                let callbacks = self.subscribers().scan_failed.clone();
                call_all(&callbacks, e);
            }
            SocketEvent::FindingCreated(e) => {
                let callbacks = self.subscribers().finding_created.clone();
                call_all(&callbacks, e);
            }
            SocketEvent::Connected(_) => {}
        }
    }

    fn notify(&self, select: impl Fn(&Subscribers) -> &Vec<Notification>) {
        let callbacks = select(&*self.subscribers()).clone();
        for callback in callbacks {
            callback();
        }
    }
}

/// Append `token` as a percent-encoded query parameter
fn with_token(url: &str, token: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("token", token);
            parsed.into()
        }
        Err(e) => {
            warn!("Not adding token to unparseable socket URL {}: {}", url, e);
            url.to_string()
        }
    }
}

fn call_all<T>(callbacks: &[Callback<T>], event: &T) {
    for callback in callbacks {
        callback(event);
    }
}

/// Driver task: connect, pump, back off, repeat
async fn drive(shared: Arc<Shared>, driver: CancellationToken) {
    loop {
        if !shared.enter(&driver, SocketState::Connecting) {
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = driver.cancelled() => return,
            result = shared.connector.connect(&shared.url) => result,
        };

        match connected {
            Ok(mut conn) => {
                if !shared.enter(&driver, SocketState::Open) {
                    conn.close().await;
                    return;
                }
                info!("Connected to {}", shared.url);
                shared.notify(|s| &s.connected);

                let closed = shared.pump(conn.as_mut(), &driver).await;
                if let Closed::Cancelled = closed {
                    conn.close().await;
                    return;
                }
                info!("Disconnected from {}", shared.url);
                shared.notify(|s| &s.disconnected);
            }
            Err(e) => warn!("{}", e),
        }

        let Some(delay) = shared.schedule_reconnect(&driver) else {
            return;
        };
        tokio::select! {
            biased;
            _ = driver.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::mock::{MockConnect, MockConnector};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PROGRESS: &str = r#"{"type":"scan:progress","scanId":"s1","projectId":"p1","progress":50,"status":"running"}"#;

    fn reconnector(connector: MockConnector, max_attempts: u32) -> (SocketReconnector, Arc<MockConnector>) {
        let connector = Arc::new(connector);
        let options = SocketOptions {
            max_attempts,
            token: None,
        };
        let socket = SocketReconnector::new("ws://mock.local/ws", options, connector.clone());
        (socket, connector)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&count), count)
    }

    #[test]
    fn test_reconnect_delay() {
        let delays: Vec<u64> = (0..7).map(|a| reconnect_delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
        assert_eq!(reconnect_delay(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_token_appended_to_url() {
        let options = SocketOptions {
            max_attempts: 5,
            token: Some("abc".to_string()),
        };
        let socket = SocketReconnector::new("wss://host/ws", options, Arc::new(MockConnector::new()));
        assert_eq!(socket.url(), "wss://host/ws?token=abc");
        assert_eq!(socket.state(), SocketState::Idle);
    }

    #[test]
    fn test_token_is_percent_encoded() {
        let options = SocketOptions {
            max_attempts: 5,
            token: Some("a&b=c+d e".to_string()),
        };
        let socket =
            SocketReconnector::new("wss://host/ws?v=1", options, Arc::new(MockConnector::new()));
        assert_eq!(socket.url(), "wss://host/ws?v=1&token=a%26b%3Dc%2Bd+e");

        let parsed = Url::parse(socket.url()).unwrap();
        let token = parsed
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned());
        assert_eq!(token.as_deref(), Some("a&b=c+d e"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (socket, connector) = reconnector(MockConnector::new(), 5);

        socket.connect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(socket.state(), SocketState::GivenUp);
        let attempts = connector.attempts();
        // Initial open plus five reconnects
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        for (gap, expected_ms) in gaps.into_iter().zip([1000u64, 2000, 4000, 8000, 16000]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(gap >= expected && gap < expected + Duration::from_millis(5));
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_give_up_starts_over() {
        let (socket, connector) = reconnector(MockConnector::new(), 1);

        socket.connect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(socket.state(), SocketState::GivenUp);
        assert_eq!(connector.attempts().len(), 2);

        socket.connect();
        settle().await;
        assert_eq!(socket.attempt(), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_dropped() {
        let (frames, open) = MockConnect::open();
        let (socket, _) = reconnector(MockConnector::new().then(open), 5);
        let (progress, seen) = counter();
        socket.on_scan_progress(move |p| {
            assert_eq!(p.scan_id, "s1");
            progress.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect();
        settle().await;
        assert!(socket.is_connected());

        frames.send(Frame::Text("not json {".to_string())).unwrap();
        frames.send(Frame::Text(r#"{"type":"scan:teleported"}"#.to_string())).unwrap();
        frames.send(Frame::Binary(PROGRESS.as_bytes().to_vec())).unwrap();
        settle().await;

        assert!(socket.is_connected());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(socket.last_event().map(|e| e.event_type()), Some("scan:progress"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_typed_callbacks_and_subscribers() {
        let (frames, open) = MockConnect::open();
        let (socket, _) = reconnector(MockConnector::new().then(open), 5);
        let mut all = socket.subscribe();
        let (complete, completed) = counter();
        socket.on_scan_complete(move |c| {
            complete.fetch_add(c.findings_count as usize, Ordering::SeqCst);
        });
        let (progress, progressed) = counter();
        socket.on_scan_progress(move |_| {
            progress.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect();
        settle().await;
        frames
            .send(Frame::Text(
                r#"{"type":"scan:complete","scanId":"s1","projectId":"p1","findingsCount":7}"#.to_string(),
            ))
            .unwrap();
        settle().await;

        assert_eq!(completed.load(Ordering::SeqCst), 7);
        assert_eq!(progressed.load(Ordering::SeqCst), 0);
        assert_eq!(all.recv().await.unwrap().event_type(), "scan:complete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (frames, open) = MockConnect::open();
        let (socket, connector) = reconnector(MockConnector::new().then(open), 5);
        let (disconnected, disconnects) = counter();
        socket.on_disconnected(move || {
            disconnected.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect();
        settle().await;
        drop(frames);
        settle().await;
        assert_eq!(socket.state(), SocketState::Reconnecting);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        socket.disconnect();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(socket.state(), SocketState::Disposed);
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_disconnect_is_ignored() {
        let (socket, connector) = reconnector(MockConnector::new(), 5);

        socket.connect();
        settle().await;
        socket.disconnect();
        assert_eq!(socket.state(), SocketState::Disposed);
        let attempts = connector.attempts().len();

        socket.connect();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(socket.state(), SocketState::Disposed);
        assert_eq!(connector.attempts().len(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_live_socket() {
        let (_frames, open) = MockConnect::open();
        let (socket, connector) = reconnector(MockConnector::new().then(open), 5);

        socket.connect();
        settle().await;
        assert!(socket.is_connected());

        socket.disconnect();
        settle().await;
        assert!(!socket.is_connected());
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_resets_after_successful_open() {
        let (_frames, open) = MockConnect::open();
        let connector = MockConnector::new()
            .then(MockConnect::Fail)
            .then(MockConnect::Fail)
            .then(open);
        let (socket, connector) = reconnector(connector, 5);
        let (connected, connects) = counter();
        socket.on_connected(move || {
            connected.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(socket.is_connected());
        assert_eq!(socket.attempt(), 0);
        assert_eq!(connector.attempts().len(), 3);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_active() {
        let (_frames, open) = MockConnect::open();
        let (socket, connector) = reconnector(MockConnector::new().then(open), 5);

        socket.connect();
        socket.connect();
        settle().await;
        socket.connect();
        settle().await;

        assert!(socket.is_connected());
        assert_eq!(connector.attempts().len(), 1);
    }
}
