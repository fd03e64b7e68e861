//! IDAT meter publisher
//!
//! Simulated electrical meter for SCADA exercises:
//! - Publishes voltage, current, power, frequency and temperature over MQTT once per tick
//! - Listens on `idat/control/multiplicador` for a remote x10 "alarm" multiplier
//! - Resets the multiplier to x1 on every (re)connection

pub mod broker;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod publisher;

pub use broker::{BrokerClient, LinkStatus, MqttBroker};
pub use config::{ConfigError, MeterConfig, MqttConfig, PublishConfig};
pub use control::{ControlError, ControlListener, ControlState, MessageHandler, Mode, CONTROL_TOPIC};
pub use error::{BrokerError, MeterError};
pub use metrics::{Metric, MetricGenerator, MetricKind, MetricSpec, Reading, METERS};
pub use publisher::{
    stop_channel, CycleReport, IntervalTicker, LoopState, LoopStats, PublishLoop, PublishOutcome,
    StopHandle, StopSignal, Ticker,
};
