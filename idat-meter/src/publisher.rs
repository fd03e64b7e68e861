//! Periodic telemetry publication
//!
//! [`PublishLoop`] is a small state machine:
//!
//! ```text
//! Idle --connected--> Running --stop / fatal transport error--> Stopped
//!   \--connection failure / stop------------------------------^
//! ```
//!
//! Each cycle generates the five base values, snapshots the control factor
//! once, scales and publishes every metric, then waits on a [`Ticker`].
//! Taking a single snapshot means all metrics of a cycle share one factor
//! even if a control message lands mid-cycle; the new factor applies from
//! the next cycle on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broker::BrokerClient;
use crate::control::{ControlState, Mode};
use crate::error::{BrokerError, MeterError};
use crate::metrics::{format_payload, scale, Metric, MetricGenerator, MetricSpec, Reading, METERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// Source of cycle boundaries.
#[async_trait]
pub trait Ticker: Send {
    /// Wait until the next cycle should start.
    async fn tick(&mut self);
}

/// Wall-clock ticker with a fixed period. The first tick fires one period
/// after creation, since the loop publishes its first cycle right away.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Requests the loop to stop. Cloneable, usable from any task.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Loop side of the stop channel.
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested. Never resolves if every
    /// handle is dropped without requesting one.
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Result of publishing one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub metric: Metric,
    pub topic: &'static str,
    pub payload: String,
    pub result: Result<(), String>,
    pub at: DateTime<Utc>,
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub factor: u8,
    pub outcomes: Vec<PublishOutcome>,
}

impl CycleReport {
    pub fn outcome(&self, metric: Metric) -> Option<&PublishOutcome> {
        self.outcomes.iter().find(|o| o.metric == metric)
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_published()).count()
    }
}

/// Cumulative counters since the loop was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub published: u64,
    pub failed: u64,
}

pub struct PublishLoop<B, R> {
    broker: B,
    control: ControlState,
    generator: MetricGenerator<R>,
    specs: Vec<MetricSpec>,
    state: LoopState,
    stats: LoopStats,
}

impl<B, R> PublishLoop<B, R>
where
    B: BrokerClient,
    R: Rng + Send,
{
    pub fn new(broker: B, control: ControlState, generator: MetricGenerator<R>) -> Self {
        Self {
            broker,
            control,
            generator,
            specs: METERS.to_vec(),
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Idle → Running once the broker reports a connection.
    /// A connection failure moves straight to Stopped.
    pub async fn start(&mut self) -> Result<(), MeterError> {
        match self.state {
            LoopState::Running => return Ok(()),
            LoopState::Stopped => return Err(MeterError::NotRunning(LoopState::Stopped)),
            LoopState::Idle => {}
        }

        match self.broker.wait_connected().await {
            Ok(()) => {
                self.state = LoopState::Running;
                info!("Starting telemetry publication...");
                Ok(())
            }
            Err(e) => {
                error!("❌ Connection failed: {}", e);
                self.state = LoopState::Stopped;
                Err(MeterError::Connection(e))
            }
        }
    }

    /// Run until stopped. The broker connection is released on every exit path.
    pub async fn run<T: Ticker>(
        &mut self,
        ticker: &mut T,
        mut stop: StopSignal,
    ) -> Result<LoopStats, MeterError> {
        let outcome = self.drive(ticker, &mut stop).await;
        self.state = LoopState::Stopped;

        match self.broker.disconnect().await {
            Ok(()) => info!("Released broker connection"),
            Err(e) => warn!("Error while disconnecting: {}", e),
        }

        outcome.map(|()| self.stats.clone())
    }

    async fn drive<T: Ticker>(
        &mut self,
        ticker: &mut T,
        stop: &mut StopSignal,
    ) -> Result<(), MeterError> {
        if self.state == LoopState::Idle {
            tokio::select! {
                started = self.start() => started?,
                _ = stop.requested() => {
                    info!("Stop requested before connection");
                    return Ok(());
                }
            }
        }

        loop {
            if stop.is_requested() {
                info!("Publication stopped");
                return Ok(());
            }

            self.run_cycle()?;

            if stop.is_requested() {
                info!("Publication stopped");
                return Ok(());
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.requested() => {
                    info!("Publication stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Generate and publish one full cycle.
    pub fn run_cycle(&mut self) -> Result<CycleReport, MeterError> {
        self.ensure_running()?;
        let readings = self.generator.generate_cycle(&self.specs)?;
        self.publish_readings(&readings)
    }

    /// Scale and publish already generated base values with the current factor.
    ///
    /// A rejected publish is recorded and the remaining metrics still go out;
    /// only a fatal transport error aborts the cycle and stops the loop. An
    /// aborted cycle is not counted in [`LoopStats::cycles`].
    pub fn publish_readings(&mut self, readings: &[Reading]) -> Result<CycleReport, MeterError> {
        self.ensure_running()?;

        let factor = self.control.read();
        let cycle = self.stats.cycles + 1;
        debug!(cycle, factor, "Publishing cycle");

        let mut outcomes = Vec::with_capacity(readings.len());
        for reading in readings {
            let spec = reading.spec;
            let payload = format_payload(scale(reading.base, factor));

            let result = match self.broker.publish(spec.topic, payload.clone()) {
                Ok(()) => {
                    self.stats.published += 1;
                    let tag = if factor == Mode::Boost.factor() { " (x10)" } else { "" };
                    info!("Published: {} {}{} | Topic: {}", payload, spec.unit, tag, spec.topic);
                    Ok(())
                }
                Err(e @ BrokerError::Fatal(_)) => {
                    error!(
                        cycle,
                        sent = outcomes.len(),
                        "Transport lost while publishing {}: {}",
                        spec.name,
                        e
                    );
                    self.state = LoopState::Stopped;
                    return Err(MeterError::Transport(e));
                }
                Err(e) => {
                    self.stats.failed += 1;
                    warn!("❌ Error publishing {}: {}", spec.name, e);
                    Err(e.to_string())
                }
            };

            outcomes.push(PublishOutcome {
                metric: spec.metric,
                topic: spec.topic,
                payload,
                result,
                at: Utc::now(),
            });
        }

        self.stats.cycles = cycle;
        Ok(CycleReport { cycle, factor, outcomes })
    }

    fn ensure_running(&self) -> Result<(), MeterError> {
        if self.state == LoopState::Running {
            Ok(())
        } else {
            Err(MeterError::NotRunning(self.state))
        }
    }
}
