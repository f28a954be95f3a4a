use std::time::Duration;

/// All construction-time knobs for the client core. Environment variables
/// override defaults via [`CoreConfig::from_env`].
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// How long a latent send waits for the transport to come up.
    pub connect_timeout: Duration,
    /// Reconnect attempts before the transport goes terminal.
    pub max_reconnect_attempts: u32,
    /// Backoff delays, in order; the last entry repeats.
    pub reconnect_delays: Vec<Duration>,
    /// Interval of the stream-open health check.
    pub liveness_interval: Duration,
    /// Default timeout for tracked requests.
    pub request_timeout: Duration,
    /// Pending-request capacity; the oldest entry is evicted beyond this.
    pub max_pending_requests: usize,
    /// Interval of the tracker's stale-entry sweep.
    pub tracker_sweep_interval: Duration,
    /// Debounce window for online/offline flapping.
    pub network_debounce: Duration,
    /// Samples per capture frame.
    pub capture_frame_samples: usize,
    /// Requested capture rate and the playback fallback rate.
    pub default_sample_rate: u32,
    /// Language sent with `audio.start`.
    pub default_language: String,
    /// Ack timeout for `audio.start` / `audio.end`.
    pub recording_ack_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 6,
            reconnect_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            liveness_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            max_pending_requests: 100,
            tracker_sweep_interval: Duration::from_secs(60),
            network_debounce: Duration::from_millis(500),
            capture_frame_samples: 4096,
            default_sample_rate: 16_000,
            default_language: "en-US".into(),
            recording_ack_timeout: Duration::from_secs(10),
        }
    }
}

impl CoreConfig {
    /// Defaults with `MURMUR_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_u64("MURMUR_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("MURMUR_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = n as u32;
        }
        if let Some(secs) = env_u64("MURMUR_LIVENESS_INTERVAL_SECS") {
            config.liveness_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MURMUR_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("MURMUR_MAX_PENDING_REQUESTS") {
            config.max_pending_requests = n as usize;
        }
        if let Some(secs) = env_u64("MURMUR_TRACKER_SWEEP_SECS") {
            config.tracker_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("MURMUR_CAPTURE_FRAME_SAMPLES") {
            config.capture_frame_samples = n as usize;
        }
        if let Some(n) = env_u64("MURMUR_DEFAULT_SAMPLE_RATE") {
            config.default_sample_rate = n as u32;
        }
        if let Ok(lang) = std::env::var("MURMUR_DEFAULT_LANGUAGE") {
            if !lang.is_empty() {
                config.default_language = lang;
            }
        }
        config
    }

    /// Backoff delay for a 1-based reconnect attempt number.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.reconnect_delays.len() - 1);
        self.reconnect_delays[idx]
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
