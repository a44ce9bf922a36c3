//! Rate-modulated synthetic page-view source.
//!
//! A ticker decides every 100 ms how many events the current load profile
//! emits, builds them with fresh identifiers and stochastic attributes, and
//! pushes them into a bounded stream. A configurable fraction of events are
//! deliberately defective so downstream validators have something to reject.

use pageflow_core::{PageViewEvent, PipelineMetrics, Region, TaggedEvent};
use rand::Rng;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

const TICK: Duration = Duration::from_millis(100);
const STREAM_CAPACITY: usize = 1024;

/// View durations below this never bounce.
const BOUNCE_MIN_MS: i32 = 5_000;

const DEFAULT_DURATION_MAX_MS: i32 = 30_000;
const DEFAULT_BOUNCE_RATE: f32 = 0.3;
const DEFAULT_INVALID_RATE: f32 = 0.05;

const REGULAR_EVENT_PROB: f32 = 0.9;
const PEAK_MIN_EVENTS: usize = 5;
const PEAK_MAX_EVENTS: usize = 50;
const NIGHT_EVENT_PROB: f32 = 0.01;

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)",
    "Mozilla/5.0 (Linux; Android 14)",
];

/// The bytes {0xFF, 0xFE, 0xFD} are not valid UTF-8; events carrying this
/// defect store their lossy decoding, which is what the JSON layer would
/// have emitted for the raw bytes anyway.
const INVALID_USER_AGENT: &str = "\u{FFFD}\u{FFFD}\u{FFFD}";

/// Load profile, decided fresh at every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeneratorMode {
    /// Steady trickle: one event per tick with probability 0.9.
    #[default]
    Regular,
    /// Burst load: 5–50 events per tick.
    Peak,
    /// Rare traffic: one event per tick with probability 0.01.
    Night,
}

/// Synthetic page-view generator.
///
/// Configure with the `with_*` methods, then call [`EventGenerator::listen`]
/// to start the ticker and obtain the event stream. [`EventGenerator::sample`]
/// draws a single event directly, which is what the statistical tests use.
#[derive(Debug, Clone)]
pub struct EventGenerator {
    mode: GeneratorMode,
    duration_max: i32,
    bounce_rate: f32,
    invalid_rate: f32,
}

impl Default for EventGenerator {
    fn default() -> Self {
        Self {
            mode: GeneratorMode::default(),
            duration_max: DEFAULT_DURATION_MAX_MS,
            bounce_rate: DEFAULT_BOUNCE_RATE,
            invalid_rate: DEFAULT_INVALID_RATE,
        }
    }
}

impl EventGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: GeneratorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Upper bound for `view_duration` in milliseconds. The generator never
    /// fails: a non-positive bound is logged and ignored.
    pub fn with_duration_max(mut self, duration_max: i32) -> Self {
        if duration_max < 1 {
            error!(duration_max, "ignoring non-positive duration bound");
            return self;
        }
        self.duration_max = duration_max;
        self
    }

    /// Probability of a bounce for views of at least five seconds.
    pub fn with_bounce_rate(mut self, bounce_rate: f32) -> Self {
        if !(0.0..=1.0).contains(&bounce_rate) {
            error!(bounce_rate, "ignoring out-of-range bounce rate");
            return self;
        }
        self.bounce_rate = bounce_rate;
        self
    }

    /// Probability that an event is replaced by an injected defect.
    pub fn with_invalid_rate(mut self, invalid_rate: f32) -> Self {
        if !(0.0..=1.0).contains(&invalid_rate) {
            error!(invalid_rate, "ignoring out-of-range invalid rate");
            return self;
        }
        self.invalid_rate = invalid_rate;
        self
    }

    /// Draw a single tagged event.
    pub fn sample(&self) -> TaggedEvent {
        let mut rng = rand::thread_rng();
        if rng.gen::<f32>() < self.invalid_rate {
            self.sample_defect(&mut rng)
        } else {
            TaggedEvent {
                event: self.sample_valid(&mut rng),
                is_invalid: false,
            }
        }
    }

    fn sample_valid(&self, rng: &mut impl Rng) -> PageViewEvent {
        let view_duration = rng.gen_range(1..=self.duration_max);
        let is_bounce = view_duration >= BOUNCE_MIN_MS && rng.gen::<f32>() < self.bounce_rate;

        PageViewEvent {
            page_id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
            view_duration,
            timestamp: chrono::Utc::now(),
            user_agent: USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())].to_string(),
            ip_address: Ipv4Addr::from(rng.gen::<[u8; 4]>()).to_string(),
            region: Some(Region::ALL[rng.gen_range(0..Region::ALL.len())]),
            is_bounce,
        }
    }

    fn sample_defect(&self, rng: &mut impl Rng) -> TaggedEvent {
        let mut event = self.sample_valid(rng);
        match rng.gen_range(0..3) {
            0 => event.page_id = String::new(),
            1 => event.view_duration = -rng.gen_range(1..=self.duration_max),
            _ => event.user_agent = INVALID_USER_AGENT.to_string(),
        }
        TaggedEvent {
            event,
            is_invalid: true,
        }
    }

    /// How many events the current profile emits this tick.
    fn events_per_tick(&self) -> usize {
        let mut rng = rand::thread_rng();
        match self.mode {
            GeneratorMode::Regular => usize::from(rng.gen::<f32>() < REGULAR_EVENT_PROB),
            GeneratorMode::Peak => rng.gen_range(PEAK_MIN_EVENTS..=PEAK_MAX_EVENTS),
            GeneratorMode::Night => usize::from(rng.gen::<f32>() < NIGHT_EVENT_PROB),
        }
    }

    /// Start the ticker and return the lazy event stream.
    ///
    /// The stream ends within one tick of [`EventStream::close`].
    pub fn listen(self) -> EventStream {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let stop = CancellationToken::new();
        let ticker_stop = stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    biased;
                    _ = ticker_stop.cancelled() => return,
                    _ = ticker.tick() => {
                        let count = self.events_per_tick();
                        for _ in 0..count {
                            let event = self.sample();
                            tokio::select! {
                                biased;
                                _ = ticker_stop.cancelled() => return,
                                sent = tx.send(event) => {
                                    if sent.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        if count > 0 {
                            PipelineMetrics::add_events_generated(count as u64);
                        }
                    }
                }
            }
        });

        EventStream { rx, stop }
    }
}

/// Lazy stream of tagged events. Finite iff closed.
pub struct EventStream {
    rx: mpsc::Receiver<TaggedEvent>,
    stop: CancellationToken,
}

impl EventStream {
    /// Next event, or `None` once the stream has terminated after close.
    pub async fn recv(&mut self) -> Option<TaggedEvent> {
        self.rx.recv().await
    }

    /// Stop the ticker. Idempotent; the stream drains and terminates within
    /// one more tick.
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Handle for closing the stream from another task.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}
