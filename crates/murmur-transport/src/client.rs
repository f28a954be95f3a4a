use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use murmur_core::{metrics, ConnectionState, CoreConfig, VoiceError};

use crate::connector::{
    Connector, FrameSink, FrameSocket, FrameStream, SocketFrame, CLOSE_ABNORMAL, CLOSE_NORMAL,
};
use crate::monitor::NetworkMonitor;

/// Transport-level knobs, usually derived from [`CoreConfig`].
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delays: Vec<Duration>,
    pub liveness_interval: Duration,
}

impl TransportConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delays: config.reconnect_delays.clone(),
            liveness_interval: config.liveness_interval,
        }
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.reconnect_delays.len() - 1);
        self.reconnect_delays[idx]
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_core(&CoreConfig::default())
    }
}

struct WriteCmd {
    frame: SocketFrame,
    done: oneshot::Sender<Result<(), VoiceError>>,
}

/// Mutable control state. Never held across an await.
struct Ctl {
    url: Option<String>,
    reconnect_enabled: bool,
    attempts: u32,
    /// Bumped whenever the current connection is superseded; stale socket
    /// tasks compare against it and become no-ops.
    epoch: u64,
    writer: Option<mpsc::Sender<WriteCmd>>,
    conn_token: Option<CancellationToken>,
    waiters: Vec<oneshot::Sender<Result<(), VoiceError>>>,
    last_error: Option<VoiceError>,
    dialing: bool,
}

struct Inner {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    monitor: Arc<NetworkMonitor>,
    state_tx: watch::Sender<ConnectionState>,
    data_tx: mpsc::Sender<Vec<u8>>,
    data_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    ctl: Mutex<Ctl>,
}

/// Owns at most one outbound binary stream at a time, with
/// exponential-backoff reconnection, latent-send buffering, and a
/// periodic liveness check. Cloning yields another handle to the same
/// connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (data_tx, data_rx) = mpsc::channel(64);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                monitor,
                state_tx,
                data_tx,
                data_rx: Mutex::new(Some(data_rx)),
                ctl: Mutex::new(Ctl {
                    url: None,
                    reconnect_enabled: false,
                    attempts: 0,
                    epoch: 0,
                    writer: None,
                    conn_token: None,
                    waiters: Vec::new(),
                    last_error: None,
                    dialing: false,
                }),
            }),
        }
    }

    /// Open a connection to `url`. Fails immediately when the network
    /// monitor reports offline. A prior terminal `Error` state is cleared.
    pub async fn connect(&self, url: &str) -> Result<(), VoiceError> {
        if !self.inner.monitor.is_online() {
            return Err(VoiceError::NetworkUnavailable);
        }
        {
            let mut ctl = self.inner.ctl.lock();
            ctl.url = Some(url.to_string());
            ctl.reconnect_enabled = true;
            ctl.attempts = 0;
            ctl.last_error = None;
        }
        self.inner.clone().open(false).await
    }

    /// Close the connection with code 1000 and stop reconnecting. With
    /// `clear`, the remembered URL is dropped as well.
    pub async fn disconnect(&self, clear: bool) {
        let (token, waiters) = {
            let mut ctl = self.inner.ctl.lock();
            ctl.reconnect_enabled = false;
            ctl.attempts = 0;
            if clear {
                ctl.url = None;
            }
            let token = Inner::detach(&mut ctl);
            (token, std::mem::take(&mut ctl.waiters))
        };
        self.inner.set_state(ConnectionState::Disconnected);
        for waiter in waiters {
            let _ = waiter.send(Err(VoiceError::NotConnected));
        }
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Send one binary frame. When not connected, suspends on a
    /// connection waiter until the transport comes up or the connect
    /// timeout elapses; a resolved waiter is followed by exactly one wire
    /// send attempt.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), VoiceError> {
        if let Some(writer) = self.connected_writer() {
            return self.write_binary(writer, bytes).await;
        }

        let (rx, kick) = {
            let mut ctl = self.inner.ctl.lock();
            let state = *self.inner.state_tx.borrow();
            if state == ConnectionState::Error {
                return Err(ctl.last_error.clone().unwrap_or(VoiceError::NotConnected));
            }
            if !ctl.reconnect_enabled || ctl.url.is_none() {
                return Err(VoiceError::NotConnected);
            }
            let (tx, rx) = oneshot::channel();
            ctl.waiters.push(tx);
            let kick = state == ConnectionState::Disconnected
                && self.inner.monitor.is_online()
                && !ctl.dialing;
            if kick {
                ctl.dialing = true;
            }
            (rx, kick)
        };

        if kick {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let _ = inner.clone().open(false).await;
                inner.ctl.lock().dialing = false;
            });
        }

        match timeout(self.inner.config.connect_timeout, rx).await {
            Err(_) => Err(VoiceError::NotConnected),
            Ok(Err(_)) => Err(VoiceError::NotConnected),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(()))) => {
                let writer = self.connected_writer().ok_or(VoiceError::NotConnected)?;
                self.write_binary(writer, bytes).await
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The inbound binary stream. Yields each application frame as one
    /// contiguous buffer. Can be taken once.
    pub fn take_data_rx(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.inner.data_rx.lock().take()
    }

    pub fn last_error(&self) -> Option<VoiceError> {
        self.inner.ctl.lock().last_error.clone()
    }

    fn connected_writer(&self) -> Option<mpsc::Sender<WriteCmd>> {
        if *self.inner.state_tx.borrow() != ConnectionState::Connected {
            return None;
        }
        self.inner.ctl.lock().writer.clone()
    }

    async fn write_binary(
        &self,
        writer: mpsc::Sender<WriteCmd>,
        bytes: Vec<u8>,
    ) -> Result<(), VoiceError> {
        let (done_tx, done_rx) = oneshot::channel();
        writer
            .send(WriteCmd {
                frame: SocketFrame::Binary(bytes),
                done: done_tx,
            })
            .await
            .map_err(|_| VoiceError::NotConnected)?;
        done_rx.await.map_err(|_| VoiceError::NotConnected)?
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            tracing::info!(from = %prev, to = %next, "Connection state");
        }
    }

    fn detach(ctl: &mut Ctl) -> Option<CancellationToken> {
        ctl.epoch += 1;
        ctl.writer = None;
        ctl.conn_token.take()
    }

    /// Dial the remembered URL and install the resulting connection.
    async fn open(self: Arc<Self>, via_reconnect: bool) -> Result<(), VoiceError> {
        let (url, dial_epoch) = {
            let mut ctl = self.ctl.lock();
            if let Some(token) = Self::detach(&mut ctl) {
                token.cancel();
            }
            let url = match &ctl.url {
                Some(url) => url.clone(),
                None => return Err(VoiceError::NotConnected),
            };
            (url, ctl.epoch)
        };
        self.set_state(ConnectionState::Connecting);

        let socket = match timeout(self.config.connect_timeout, self.connector.connect(&url)).await
        {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                Inner::on_open_failure(&self, e.clone(), via_reconnect);
                return Err(e);
            }
            Err(_) => {
                let e = VoiceError::ConnectionTimeout(self.config.connect_timeout);
                Inner::on_open_failure(&self, e.clone(), via_reconnect);
                return Err(e);
            }
        };

        if self.clone().install(socket, dial_epoch) {
            Ok(())
        } else {
            // Superseded by a disconnect or a newer dial while in flight.
            Err(VoiceError::NotConnected)
        }
    }

    fn install(self: Arc<Self>, socket: Box<dyn FrameSocket>, dial_epoch: u64) -> bool {
        let (write_tx, write_rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let waiters = {
            let mut ctl = self.ctl.lock();
            if ctl.epoch != dial_epoch {
                return false;
            }
            ctl.writer = Some(write_tx);
            ctl.conn_token = Some(token.clone());
            std::mem::take(&mut ctl.waiters)
        };
        self.set_state(ConnectionState::Connected);
        // Resolve in insertion order; each resolved sender performs its
        // own wire send afterwards.
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        let (sink, stream) = socket.split();
        tokio::spawn(socket_task(self, sink, stream, write_rx, token, dial_epoch));
        true
    }

    fn on_open_failure(this: &Arc<Self>, error: VoiceError, via_reconnect: bool) {
        tracing::warn!(error = %error, via_reconnect, "Connection open failed");
        if via_reconnect {
            Inner::register_failure(this);
            return;
        }
        let waiters = {
            let mut ctl = this.ctl.lock();
            ctl.last_error = Some(error.clone());
            std::mem::take(&mut ctl.waiters)
        };
        this.set_state(ConnectionState::Error);
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Unexpected close or failed reconnect dial: count the attempt and
    /// either back off or go terminal.
    fn register_failure(this: &Arc<Self>) {
        enum Next {
            GiveUp(Vec<oneshot::Sender<Result<(), VoiceError>>>),
            Terminal(VoiceError, Vec<oneshot::Sender<Result<(), VoiceError>>>),
            Backoff(u32, Duration),
        }

        let next = {
            let mut ctl = this.ctl.lock();
            let allowed =
                ctl.reconnect_enabled && ctl.url.is_some() && this.monitor.is_online();
            if !allowed {
                Next::GiveUp(std::mem::take(&mut ctl.waiters))
            } else {
                ctl.attempts += 1;
                if ctl.attempts >= this.config.max_reconnect_attempts {
                    let error = VoiceError::ReconnectExhausted {
                        attempts: ctl.attempts,
                    };
                    ctl.last_error = Some(error.clone());
                    Next::Terminal(error, std::mem::take(&mut ctl.waiters))
                } else {
                    Next::Backoff(ctl.attempts, this.config.reconnect_delay(ctl.attempts))
                }
            }
        };

        match next {
            Next::GiveUp(waiters) => {
                this.set_state(ConnectionState::Disconnected);
                for waiter in waiters {
                    let _ = waiter.send(Err(VoiceError::NotConnected));
                }
            }
            Next::Terminal(error, waiters) => {
                tracing::warn!(error = %error, "Reconnect attempts exhausted");
                this.set_state(ConnectionState::Error);
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            Next::Backoff(attempt, delay) => {
                this.set_state(ConnectionState::Reconnecting);
                metrics::count("transport_reconnects_scheduled");
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                tokio::spawn(reconnect_task(Arc::clone(this), delay));
            }
        }
    }

    /// First inbound traffic on a connection proves it live and resets
    /// the attempt counter.
    fn mark_alive(&self, epoch: u64) {
        let mut ctl = self.ctl.lock();
        if ctl.epoch == epoch && ctl.attempts != 0 {
            tracing::debug!("Connection proven live, resetting reconnect attempts");
            ctl.attempts = 0;
        }
    }

    fn on_connection_closed(this: &Arc<Self>, epoch: u64, local_close: bool) {
        let waiters = {
            let mut ctl = this.ctl.lock();
            if ctl.epoch != epoch {
                return; // superseded; whoever superseded us set the state
            }
            ctl.epoch += 1;
            ctl.writer = None;
            ctl.conn_token = None;
            if !local_close {
                None
            } else {
                Some(std::mem::take(&mut ctl.waiters))
            }
        };
        match waiters {
            Some(waiters) => {
                this.set_state(ConnectionState::Disconnected);
                for waiter in waiters {
                    let _ = waiter.send(Err(VoiceError::NotConnected));
                }
            }
            None => Inner::register_failure(this),
        }
    }
}

async fn reconnect_task(inner: Arc<Inner>, delay: Duration) {
    tokio::time::sleep(delay).await;

    // Reconnect dials only while online; an offline window parks the
    // attempt until the monitor reports the online edge.
    let mut online = inner.monitor.subscribe();
    loop {
        if *online.borrow() {
            break;
        }
        if online.changed().await.is_err() {
            return;
        }
    }

    if *inner.state_tx.borrow() != ConnectionState::Reconnecting {
        return;
    }
    {
        let ctl = inner.ctl.lock();
        if !ctl.reconnect_enabled || ctl.url.is_none() {
            return;
        }
    }
    let _ = inner.open(true).await;
}

async fn socket_task(
    inner: Arc<Inner>,
    mut sink: Box<dyn FrameSink>,
    mut stream: Box<dyn FrameStream>,
    mut write_rx: mpsc::Receiver<WriteCmd>,
    token: CancellationToken,
    epoch: u64,
) {
    let liveness = inner.config.liveness_interval;
    let mut health = tokio::time::interval(liveness);
    health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    health.tick().await; // consume the immediate tick

    let mut last_activity = tokio::time::Instant::now();
    let mut marked_alive = false;
    let mut local_close = false;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                sink.close(CLOSE_NORMAL).await;
                local_close = true;
                break;
            }
            cmd = write_rx.recv() => match cmd {
                Some(WriteCmd { frame, done }) => {
                    let result = sink.send(frame).await;
                    let failed = result.is_err();
                    let _ = done.send(result);
                    if failed {
                        tracing::warn!("Write failed, treating stream as dead");
                        break;
                    }
                    metrics::count("transport_frames_sent");
                }
                None => {
                    sink.close(CLOSE_NORMAL).await;
                    local_close = true;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(SocketFrame::Binary(bytes)) => {
                    last_activity = tokio::time::Instant::now();
                    if !marked_alive {
                        marked_alive = true;
                        inner.mark_alive(epoch);
                    }
                    metrics::count("transport_frames_received");
                    if inner.data_tx.send(bytes).await.is_err() {
                        tracing::warn!("Data receiver dropped, discarding inbound frame");
                    }
                }
                Some(SocketFrame::Text(text)) => {
                    tracing::warn!(len = text.len(), "Dropping string data on binary channel");
                }
                Some(SocketFrame::Ping) => {
                    last_activity = tokio::time::Instant::now();
                    let _ = sink.send(SocketFrame::Pong).await;
                }
                Some(SocketFrame::Pong) => {
                    last_activity = tokio::time::Instant::now();
                    if !marked_alive {
                        marked_alive = true;
                        inner.mark_alive(epoch);
                    }
                }
                Some(SocketFrame::Close(code)) => {
                    tracing::info!(code = ?code, "Connection closed by peer");
                    break;
                }
                None => {
                    tracing::info!("Connection stream ended");
                    break;
                }
            },
            _ = health.tick() => {
                if last_activity.elapsed() >= liveness * 2 {
                    tracing::warn!("Liveness check failed, closing with abnormal code");
                    metrics::count("transport_liveness_closes");
                    sink.close(CLOSE_ABNORMAL).await;
                    break;
                }
                if sink.send(SocketFrame::Ping).await.is_err() {
                    break;
                }
            }
        }
    }

    Inner::on_connection_closed(&inner, epoch, local_close);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ConnectOutcome, MockConnector};

    fn setup() -> (Transport, Arc<MockConnector>, Arc<NetworkMonitor>) {
        let connector = Arc::new(MockConnector::new());
        let monitor = Arc::new(NetworkMonitor::new(Duration::ZERO));
        let transport = Transport::new(
            TransportConfig::default(),
            connector.clone() as Arc<dyn Connector>,
            monitor.clone(),
        );
        (transport, connector, monitor)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected() {
        let (transport, connector, _) = setup();
        transport.connect("ws://voice").await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);
        let peer = connector.accept().await;
        assert_eq!(peer.url, "ws://voice");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_when_offline() {
        let (transport, _, monitor) = setup();
        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = transport.connect("ws://voice").await.unwrap_err();
        assert_eq!(err, VoiceError::NetworkUnavailable);
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_terminal_until_reconnect() {
        let (transport, connector, _) = setup();
        connector.push_outcome(ConnectOutcome::Refuse);

        assert!(transport.connect("ws://voice").await.is_err());
        assert_eq!(transport.state(), ConnectionState::Error);

        // Explicit connect clears the terminal state.
        transport.connect("ws://voice").await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn send_round_trips_to_peer() {
        let (transport, connector, _) = setup();
        transport.connect("ws://voice").await.unwrap();
        let mut peer = connector.accept().await;

        transport.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(peer.recv_binary().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_without_url_fails_not_connected() {
        let (transport, _, _) = setup();
        let err = transport.send(vec![0]).await.unwrap_err();
        assert_eq!(err, VoiceError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn text_frames_are_dropped() {
        let (transport, connector, _) = setup();
        let mut data_rx = transport.take_data_rx().unwrap();
        transport.connect("ws://voice").await.unwrap();
        let peer = connector.accept().await;

        peer.send(SocketFrame::Text("not binary".into()));
        peer.send_binary(vec![42]);

        assert_eq!(data_rx.recv().await.unwrap(), vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_schedules_reconnect() {
        let (transport, connector, _) = setup();
        transport.connect("ws://voice").await.unwrap();
        let peer = connector.accept().await;

        let mut states = transport.watch_state();
        peer.abort();
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        // First backoff is 2s; a fresh dial follows.
        let _peer2 = connector.accept().await;
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(connector.attempt_count(), 2);

        let times = connector.attempt_times();
        let gap = times[1] - times[0];
        assert!(gap >= Duration::from_secs(2) && gap < Duration::from_secs(3), "gap: {gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn latent_send_resolves_after_reconnect() {
        let (transport, connector, _) = setup();
        transport.connect("ws://voice").await.unwrap();
        let peer = connector.accept().await;
        peer.abort();

        let mut states = transport.watch_state();
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        let send_task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(vec![7, 8]).await })
        };

        let mut peer2 = connector.accept().await;
        assert_eq!(peer2.recv_binary().await.unwrap(), vec![7, 8]);
        send_task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_storm_backs_off_then_goes_terminal() {
        let (transport, connector, _) = setup();
        transport.connect("ws://voice").await.unwrap();

        let mut states = transport.watch_state();
        for _ in 0..6 {
            let peer = connector.accept().await;
            peer.abort();
            // Let the close propagate before the next accept.
            tokio::task::yield_now().await;
        }
        states
            .wait_for(|s| *s == ConnectionState::Error)
            .await
            .unwrap();

        assert_eq!(connector.attempt_count(), 6);
        assert_eq!(
            transport.last_error(),
            Some(VoiceError::ReconnectExhausted { attempts: 6 })
        );

        // Delays between attempts follow the 2/5/10 ladder.
        let times = connector.attempt_times();
        let expected = [2u64, 5, 10, 10, 10];
        for (i, want) in expected.iter().enumerate() {
            let gap = times[i + 1] - times[i];
            assert!(
                gap >= Duration::from_secs(*want) && gap < Duration::from_secs(want + 2),
                "attempt {i}: gap {gap:?}, want ~{want}s"
            );
        }

        // Terminal: no further dials without an explicit connect.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_count(), 6);

        let err = transport.send(vec![0]).await.unwrap_err();
        assert_eq!(err, VoiceError::ReconnectExhausted { attempts: 6 });
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_reconnects() {
        let (transport, connector, _) = setup();
        transport.connect("ws://voice").await.unwrap();
        let _peer = connector.accept().await;

        transport.disconnect(false).await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_count(), 1);

        let err = transport.send(vec![0]).await.unwrap_err();
        assert_eq!(err, VoiceError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_closes_silent_connection() {
        let connector = Arc::new(MockConnector::new());
        let monitor = Arc::new(NetworkMonitor::new(Duration::ZERO));
        let config = TransportConfig {
            liveness_interval: Duration::from_secs(1),
            ..TransportConfig::default()
        };
        let transport = Transport::new(config, connector.clone() as Arc<dyn Connector>, monitor);

        transport.connect("ws://voice").await.unwrap();
        let _peer = connector.accept().await;

        // Silence past 2x the liveness interval forces an abnormal close
        // and a reconnect.
        let _peer2 = connector.accept().await;
        assert!(connector.attempt_count() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_for_network() {
        let (transport, connector, monitor) = setup();
        transport.connect("ws://voice").await.unwrap();
        let peer = connector.accept().await;

        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.abort();

        let mut states = transport.watch_state();
        // Offline at close time: no reconnect is scheduled.
        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_during_backoff_parks_the_dial() {
        let (transport, connector, monitor) = setup();
        transport.connect("ws://voice").await.unwrap();
        let peer = connector.accept().await;
        peer.abort();

        let mut states = transport.watch_state();
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Backoff elapses while offline: no dial.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempt_count(), 1);

        // Online edge resumes the scheduled dial.
        monitor.report(true);
        let _peer2 = connector.accept().await;
        assert_eq!(connector.attempt_count(), 2);
    }
}
