// ===============================
// src/session.rs
// ===============================
//
// Stream Session Manager: one long-lived user-data subscription.
//
//   Disconnected -> Authenticating -> Connected -> (error) Reconnecting -> Authenticating
//   Shutdown reachable from any state.
//
// - tiap (re)connect minta listenKey baru; keepalive lama dihentikan dulu
// - backoff eksponensial 2s..60s, reset setelah connect sukses
// - semua wait bisa diputus oleh shutdown
//
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::domain::{Fill, MarketKind, Subscription};
use crate::error::VenueError;
use crate::metrics::{
    FILLS, KEEPALIVE_ERR, KEEPALIVE_OK, MALFORMED, WS_CONNECTED, WS_LAST_EVENT_TS, WS_RECONNECTS,
};
use crate::normalizer::{self, AccountUpdate, UserEvent};
use crate::shutdown::Shutdown;
use crate::venue::{MessageStream, SourceVenue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Connected,
    Reconnecting,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub keepalive_interval: Duration,
    pub call_timeout: Duration,
    pub backoff_seed: Duration,
    pub backoff_cap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30 * 60),
            call_timeout: Duration::from_secs(10),
            backoff_seed: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Doubling backoff with a cap: seed, 2*seed, 4*seed, ... cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    seed: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(seed: Duration, cap: Duration) -> Self {
        Self { seed, cap, current: seed.min(cap) }
    }

    pub fn next_delay(&mut self) -> Duration {
        let d = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        d
    }

    pub fn reset(&mut self) {
        self.current = self.seed.min(self.cap);
    }
}

/// Why a connection stopped pumping.
#[derive(Debug)]
enum StreamEnd {
    Shutdown,
    SinkClosed,
    Closed,
    ListenKeyExpired,
    Error(VenueError),
}

pub struct SessionManager<S: SourceVenue> {
    source: Arc<S>,
    kind: MarketKind,
    cfg: SessionConfig,
    state_tx: watch::Sender<SessionState>,
}

impl<S: SourceVenue> SessionManager<S> {
    pub fn new(source: Arc<S>, kind: MarketKind, cfg: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self { source, kind, cfg, state_tx }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, st: SessionState) {
        debug!(market = %self.kind, state = ?st, "session state");
        let _ = self.state_tx.send(st);
    }

    /// Runs until shutdown fires (or the fill consumer goes away).
    pub async fn run(self, fill_tx: mpsc::Sender<Fill>, shutdown: Shutdown) {
        let kind = self.kind;
        let market = kind.tag();
        let mut backoff = Backoff::new(self.cfg.backoff_seed, self.cfg.backoff_cap);

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            // 1) listenKey baru
            self.set_state(SessionState::Authenticating);
            let sub = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = timeout(self.cfg.call_timeout, self.source.subscribe(kind)) => r.map_err(VenueError::from).and_then(|r| r),
            };
            let sub = match sub {
                Ok(s) => s,
                Err(e) => {
                    match &e {
                        VenueError::Auth(msg) => {
                            error!(%market, %msg, "ALERT: listenKey rejected, check BINANCE_API_KEY; retrying")
                        }
                        _ => warn!(%market, ?e, "listenKey request failed"),
                    }
                    if !self.wait_backoff(&mut backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            // 2) koneksi WS
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = timeout(self.cfg.call_timeout, self.source.connect(kind, &sub)) => r.map_err(VenueError::from).and_then(|r| r),
            };
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    error!(%market, ?e, "connect userDataStream failed");
                    if !self.wait_backoff(&mut backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(SessionState::Connected);
            WS_CONNECTED.with_label_values(&[market]).set(1);
            backoff.reset();
            info!(%market, "userDataStream connected, listening for fills");

            // 3) keepalive untuk token ini saja
            let keepalive = self.spawn_keepalive(sub, shutdown.clone());

            // 4) pump
            let end = self.pump(stream, &fill_tx, &shutdown).await;

            keepalive.abort();
            let _ = keepalive.await;
            WS_CONNECTED.with_label_values(&[market]).set(0);

            // 5) reconnect / stop
            match end {
                StreamEnd::Shutdown => break,
                StreamEnd::SinkClosed => {
                    warn!(%market, "fill consumer gone, stopping session");
                    break;
                }
                StreamEnd::Closed => warn!(%market, "userDataStream closed by venue, reconnecting"),
                StreamEnd::ListenKeyExpired => warn!(%market, "listenKey expired, reconnecting with a new one"),
                StreamEnd::Error(e) => error!(%market, ?e, "userDataStream error, reconnecting"),
            }
            self.set_state(SessionState::Reconnecting);
            WS_RECONNECTS.with_label_values(&[market]).inc();
            if !self.wait_backoff(&mut backoff, &shutdown).await {
                break;
            }
        }

        self.set_state(SessionState::Shutdown);
        info!(%market, "session stopped");
    }

    /// false when shutdown fired during the wait
    async fn wait_backoff(&self, backoff: &mut Backoff, shutdown: &Shutdown) -> bool {
        let delay = backoff.next_delay();
        info!(market = %self.kind, delay_s = delay.as_secs_f64(), "backing off before reconnect");
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    fn spawn_keepalive(&self, sub: Subscription, shutdown: Shutdown) -> JoinHandle<()> {
        let source = self.source.clone();
        let kind = self.kind;
        // refresh well before the listen key can lapse
        let every = self.cfg.keepalive_interval.min(sub.ttl / 2);
        debug!(market = %kind, issued_at = %sub.issued_at, ?every, "keepalive scheduled");
        let call_timeout = self.cfg.call_timeout;
        tokio::spawn(async move { keepalive_loop(source, kind, sub, every, call_timeout, shutdown).await })
    }

    async fn pump(&self, mut stream: MessageStream, fill_tx: &mpsc::Sender<Fill>, shutdown: &Shutdown) -> StreamEnd {
        let kind = self.kind;
        let market = kind.tag();
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                m = stream.next() => m,
            };
            let raw = match next {
                None => return StreamEnd::Closed,
                Some(Err(e)) => return StreamEnd::Error(e),
                Some(Ok(raw)) => raw,
            };
            WS_LAST_EVENT_TS.with_label_values(&[market]).set(Utc::now().timestamp());

            let event = match normalizer::decode(&raw) {
                Ok(ev) => ev,
                Err(e) => {
                    MALFORMED.with_label_values(&[market]).inc();
                    warn!(%market, ?e, "dropping malformed stream message");
                    continue;
                }
            };
            match &event {
                UserEvent::ListenKeyExpired => return StreamEnd::ListenKeyExpired,
                UserEvent::AccountUpdate(acc) => log_account(kind, acc),
                UserEvent::Unknown(t) => debug!(%market, event = %t, "ignoring event"),
                UserEvent::ExecutionReport(_) => {
                    if let Some(fill) = normalizer::normalize(&event, kind) {
                        FILLS.with_label_values(&[market]).inc();
                        info!(
                            %market,
                            symbol = %fill.venue_symbol,
                            side = ?fill.side,
                            position_side = ?fill.position_side,
                            qty = %fill.quantity,
                            px = %fill.price,
                            total = %(fill.quantity * fill.price),
                            fill_id = %fill.fill_id,
                            "FILLED"
                        );
                        if fill_tx.send(fill).await.is_err() {
                            return StreamEnd::SinkClosed;
                        }
                    }
                }
            }
        }
    }
}

async fn keepalive_loop<S: SourceVenue>(
    source: Arc<S>,
    kind: MarketKind,
    sub: Subscription,
    every: Duration,
    call_timeout: Duration,
    shutdown: Shutdown,
) {
    let market = kind.tag();
    // retry lebih cepat setelah gagal, tetap di bawah ttl
    let retry = (every / 10).clamp(Duration::from_secs(1), Duration::from_secs(60)).min(every);
    let mut wait = every;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(wait) => {}
        }
        let res = timeout(call_timeout, source.keepalive(kind, &sub))
            .await
            .map_err(VenueError::from)
            .and_then(|r| r);
        match res {
            Ok(()) => {
                KEEPALIVE_OK.with_label_values(&[market]).inc();
                debug!(%market, "listenKey keepalive ok");
                wait = every;
            }
            Err(e) => {
                KEEPALIVE_ERR.with_label_values(&[market]).inc();
                warn!(%market, ?e, retry_s = retry.as_secs_f64(), "listenKey keepalive failed");
                wait = retry;
            }
        }
    }
}

fn log_account(kind: MarketKind, acc: &AccountUpdate) {
    for (asset, amount) in &acc.balances {
        info!(market = %kind, %asset, %amount, "ACCOUNT UPDATE balance");
    }
    for (symbol, amount, ps) in &acc.positions {
        info!(market = %kind, %symbol, %amount, position_side = %ps, "ACCOUNT UPDATE position");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VenueResult;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const FILLED: &str = r#"{"e":"executionReport","E":1,"s":"BTCUSDT","S":"BUY","q":"0.1","X":"FILLED","x":"TRADE","l":"0.1","z":"0.1","L":"40000","t":11,"T":1}"#;

    enum Script {
        /// frames then the venue closes the socket
        Close(Vec<&'static str>),
        /// frames then the socket stays open
        Hold(Vec<&'static str>),
        /// one frame after a delay, then open forever
        Delayed(Duration, &'static str),
        /// `n` frames spaced by the gap, then open forever
        Every(Duration, &'static str, usize),
        /// handshake never completes
        Stall,
        Fail(VenueError),
    }

    #[derive(Default)]
    struct FakeSource {
        issued: AtomicUsize,
        subscribe_errors: Mutex<VecDeque<VenueError>>,
        always_fail: bool,
        keepalive_fails: bool,
        /// this many listen-key requests hang before answering
        subscribe_stalls: AtomicUsize,
        scripts: Mutex<VecDeque<Script>>,
        connected_tokens: Mutex<Vec<String>>,
        connect_times: Mutex<Vec<Instant>>,
        keepalive_tokens: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SourceVenue for FakeSource {
        async fn subscribe(&self, _kind: MarketKind) -> VenueResult<Subscription> {
            if self.always_fail {
                return Err(VenueError::Transient("down".into()));
            }
            if let Some(e) = self.subscribe_errors.lock().unwrap().pop_front() {
                return Err(e);
            }
            let stalls_left = self
                .subscribe_stalls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stalls_left {
                std::future::pending::<()>().await;
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Subscription::new(format!("token-{n}"), Duration::from_secs(3600)))
        }

        async fn keepalive(&self, _kind: MarketKind, sub: &Subscription) -> VenueResult<()> {
            self.keepalive_tokens.lock().unwrap().push(sub.token.clone());
            if self.keepalive_fails {
                return Err(VenueError::Transient("keepalive 503".into()));
            }
            Ok(())
        }

        async fn connect(&self, _kind: MarketKind, sub: &Subscription) -> VenueResult<MessageStream> {
            self.connect_times.lock().unwrap().push(Instant::now());
            self.connected_tokens.lock().unwrap().push(sub.token.clone());
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Hold(vec![]));
            let frames = |v: Vec<&'static str>| stream::iter(v.into_iter().map(|s| Ok(s.to_string())));
            Ok(match script {
                Script::Close(v) => frames(v).boxed(),
                Script::Hold(v) => frames(v).chain(stream::pending()).boxed(),
                Script::Delayed(d, frame) => stream::once(async move {
                    sleep(d).await;
                    Ok(frame.to_string())
                })
                .chain(stream::pending())
                .boxed(),
                Script::Every(gap, frame, n) => stream::unfold(0usize, move |i| async move {
                    if i == n {
                        return None;
                    }
                    sleep(gap).await;
                    Some((Ok(frame.to_string()), i + 1))
                })
                .chain(stream::pending())
                .boxed(),
                Script::Stall => return std::future::pending().await,
                Script::Fail(e) => return Err(e),
            })
        }
    }

    fn fast_cfg() -> SessionConfig {
        SessionConfig {
            keepalive_interval: Duration::from_millis(20),
            call_timeout: Duration::from_secs(1),
            backoff_seed: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(20),
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, want: SessionState) {
        timeout(Duration::from_secs(2), async {
            while *rx.borrow_and_update() != want {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state reached");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(60));
        let seq: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(seq, vec![2, 4, 8, 16, 32, 60, 60]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn reconnect_uses_fresh_listen_key_and_keeps_delivering() {
        let source = Arc::new(FakeSource::default());
        source.scripts.lock().unwrap().extend([
            Script::Close(vec!["garbage{", FILLED]),
            Script::Fail(VenueError::Transient("handshake".into())),
            Script::Hold(vec![r#"{"e":"balanceUpdate"}"#, FILLED]),
        ]);
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let mgr = SessionManager::new(source.clone(), MarketKind::Spot, fast_cfg());
        let mut state = mgr.state();
        let task = tokio::spawn(mgr.run(tx, shutdown));

        // malformed frame is dropped, the fill behind it still arrives
        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.fill_id, "spot:BTCUSDT:11");
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.fill_id, first.fill_id);
        wait_for_state(&mut state, SessionState::Connected).await;

        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SessionState::Shutdown);
        assert_eq!(
            *source.connected_tokens.lock().unwrap(),
            vec!["token-1".to_string(), "token-2".to_string(), "token-3".to_string()]
        );
    }

    #[tokio::test]
    async fn auth_failure_is_retried_with_backoff() {
        let source = Arc::new(FakeSource::default());
        source
            .subscribe_errors
            .lock()
            .unwrap()
            .extend([VenueError::Auth("-2015".into()), VenueError::Transient("503".into())]);
        source.scripts.lock().unwrap().push_back(Script::Hold(vec![FILLED]));
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(SessionManager::new(source.clone(), MarketKind::Spot, fast_cfg()).run(tx, shutdown));

        assert!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_some());
        assert_eq!(source.issued.load(Ordering::SeqCst), 1);
        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_long_backoff() {
        let source = Arc::new(FakeSource { always_fail: true, ..Default::default() });
        let cfg = SessionConfig {
            backoff_seed: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(60),
            ..fast_cfg()
        };
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, _rx) = mpsc::channel(8);
        let task = tokio::spawn(SessionManager::new(source, MarketKind::UsdFutures, cfg).run(tx, shutdown));

        sleep(Duration::from_millis(50)).await;
        trigger.fire();
        timeout(Duration::from_secs(1), task).await.expect("backoff interrupted").unwrap();
    }

    #[tokio::test]
    async fn old_keepalive_stops_before_new_one_starts() {
        let source = Arc::new(FakeSource::default());
        source.scripts.lock().unwrap().extend([
            Script::Delayed(Duration::from_millis(90), r#"{"e":"listenKeyExpired","E":1}"#),
            Script::Hold(vec![]),
        ]);
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, _rx) = mpsc::channel(8);
        let task = tokio::spawn(SessionManager::new(source.clone(), MarketKind::UsdFutures, fast_cfg()).run(tx, shutdown));

        sleep(Duration::from_millis(250)).await;
        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        let tokens = source.keepalive_tokens.lock().unwrap().clone();
        assert!(tokens.iter().any(|t| t == "token-1"));
        assert!(tokens.iter().any(|t| t == "token-2"));
        let first_new = tokens.iter().position(|t| t == "token-2").unwrap();
        assert!(tokens[first_new..].iter().all(|t| t == "token-2"), "interleaved keepalives: {tokens:?}");
    }

    #[tokio::test]
    async fn failing_keepalive_leaves_the_connection_up() {
        let source = Arc::new(FakeSource { keepalive_fails: true, ..Default::default() });
        source
            .scripts
            .lock()
            .unwrap()
            .push_back(Script::Every(Duration::from_millis(30), FILLED, 5));
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(SessionManager::new(source.clone(), MarketKind::Spot, fast_cfg()).run(tx, shutdown));

        for _ in 0..5 {
            let f = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(f.fill_id, "spot:BTCUSDT:11");
        }
        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert_eq!(*source.connected_tokens.lock().unwrap(), vec!["token-1".to_string()]);
        assert_eq!(source.issued.load(Ordering::SeqCst), 1);
        let keepalives = source.keepalive_tokens.lock().unwrap().clone();
        assert!(keepalives.len() >= 2, "keepalive not retried: {keepalives:?}");
        assert!(keepalives.iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn stalled_handshakes_time_out_and_reconnect() {
        let source = Arc::new(FakeSource { subscribe_stalls: AtomicUsize::new(1), ..Default::default() });
        source
            .scripts
            .lock()
            .unwrap()
            .extend([Script::Stall, Script::Hold(vec![FILLED])]);
        let cfg = SessionConfig { call_timeout: Duration::from_millis(50), ..fast_cfg() };
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let started = Instant::now();
        let task = tokio::spawn(SessionManager::new(source.clone(), MarketKind::Spot, cfg).run(tx, shutdown));

        let f = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(f.fill_id, "spot:BTCUSDT:11");
        // one timed-out listen key request, one timed-out connect
        assert!(started.elapsed() >= Duration::from_millis(100));
        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert_eq!(
            *source.connected_tokens.lock().unwrap(),
            vec!["token-1".to_string(), "token-2".to_string()]
        );
    }

    #[tokio::test]
    async fn repeated_connect_failures_wait_longer_each_time() {
        let source = Arc::new(FakeSource::default());
        {
            let mut scripts = source.scripts.lock().unwrap();
            for _ in 0..4 {
                scripts.push_back(Script::Fail(VenueError::Transient("handshake".into())));
            }
            scripts.push_back(Script::Hold(vec![FILLED]));
        }
        let (trigger, shutdown) = crate::shutdown::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(SessionManager::new(source.clone(), MarketKind::Spot, fast_cfg()).run(tx, shutdown));

        assert!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_some());
        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        let times = source.connect_times.lock().unwrap().clone();
        assert_eq!(times.len(), 5);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        // seed 5ms, doubling, capped at 20ms
        let floors = [5, 10, 20, 20].map(Duration::from_millis);
        for (gap, floor) in gaps.iter().zip(floors) {
            assert!(*gap >= floor, "gaps {gaps:?} below {floors:?}");
        }
    }

    #[tokio::test]
    async fn closed_consumer_stops_session() {
        let source = Arc::new(FakeSource::default());
        source.scripts.lock().unwrap().push_back(Script::Hold(vec![FILLED]));
        let (_trigger, shutdown) = crate::shutdown::channel();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let task = tokio::spawn(SessionManager::new(source, MarketKind::Spot, fast_cfg()).run(tx, shutdown));
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
