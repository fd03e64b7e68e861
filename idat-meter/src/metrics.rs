//! Synthetic meter readings
//!
//! Five fixed metrics are generated once per cycle, in this order:
//! voltage, current, power, frequency, temperature. Power is not drawn at
//! random: it is derived from the voltage and current of the same cycle,
//! before any scaling factor is applied.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Metric identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Voltage,
    Current,
    Power,
    Frequency,
    Temperature,
}

/// How a metric's base value is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    /// Integer uniformly drawn from `[min, max]`, bounds included.
    UniformInteger,
    /// Real uniformly drawn from `[min, max]`, rounded to `precision` decimals.
    UniformFloat { precision: u32 },
    /// `round(voltage × current, 2)` from the current cycle.
    DerivedPower,
}

/// Static description of one published metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    pub metric: Metric,
    pub name: &'static str,
    pub topic: &'static str,
    pub min: f64,
    pub max: f64,
    pub unit: &'static str,
    pub kind: MetricKind,
}

/// The meter's metrics, in generation order.
///
/// Power's range is nominal only; its value always comes from voltage × current.
pub const METERS: [MetricSpec; 5] = [
    MetricSpec {
        metric: Metric::Voltage,
        name: "VOLTAGE",
        topic: "idat/medidor/voltaje",
        min: 216.0,
        max: 230.0,
        unit: "V",
        kind: MetricKind::UniformInteger,
    },
    MetricSpec {
        metric: Metric::Current,
        name: "CURRENT",
        topic: "idat/medidor/corriente",
        min: 5.0,
        max: 15.0,
        unit: "A",
        kind: MetricKind::UniformFloat { precision: 2 },
    },
    MetricSpec {
        metric: Metric::Power,
        name: "POWER",
        topic: "idat/medidor/potencia",
        min: 1000.0,
        max: 3500.0,
        unit: "W",
        kind: MetricKind::DerivedPower,
    },
    MetricSpec {
        metric: Metric::Frequency,
        name: "FREQUENCY",
        topic: "idat/medidor/frecuencia",
        min: 59.0,
        max: 61.0,
        unit: "Hz",
        kind: MetricKind::UniformFloat { precision: 1 },
    },
    MetricSpec {
        metric: Metric::Temperature,
        name: "TEMPERATURE",
        topic: "idat/medidor/temperatura",
        min: 20.0,
        max: 35.0,
        unit: "°C",
        kind: MetricKind::UniformInteger,
    },
];

/// Look up a metric's static description.
pub fn spec_for(metric: Metric) -> &'static MetricSpec {
    // METERS is declared in Metric discriminant order
    &METERS[metric as usize]
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("{metric:?} needs {missing:?} generated earlier in the same cycle")]
    MissingOperand { metric: Metric, missing: Metric },
}

/// Values produced so far in the current cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleState {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
}

impl CycleState {
    pub fn record(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::Voltage => self.voltage = Some(value),
            Metric::Current => self.current = Some(value),
            _ => {}
        }
    }
}

/// One base (unscaled) value for one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub spec: MetricSpec,
    pub base: f64,
}

impl Reading {
    /// Reading for one of the meter's standard metrics.
    pub fn new(metric: Metric, base: f64) -> Self {
        Self {
            spec: *spec_for(metric),
            base,
        }
    }
}

pub struct MetricGenerator<R> {
    rng: R,
}

impl MetricGenerator<StdRng> {
    /// Reproducible generator: same seed, same sequence of cycles.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> MetricGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Produce one base value for `spec`.
    pub fn generate(
        &mut self,
        spec: &MetricSpec,
        cycle: &CycleState,
    ) -> Result<f64, GenerateError> {
        let value = match spec.kind {
            MetricKind::UniformInteger => {
                self.rng.gen_range(spec.min as i64..=spec.max as i64) as f64
            }
            MetricKind::UniformFloat { precision } => {
                round_to(self.rng.gen_range(spec.min..=spec.max), precision)
            }
            MetricKind::DerivedPower => {
                let voltage = cycle.voltage.ok_or(GenerateError::MissingOperand {
                    metric: spec.metric,
                    missing: Metric::Voltage,
                })?;
                let current = cycle.current.ok_or(GenerateError::MissingOperand {
                    metric: spec.metric,
                    missing: Metric::Current,
                })?;
                derive_power(voltage, current)
            }
        };
        Ok(value)
    }

    /// Generate one full cycle over `specs`, feeding voltage and current
    /// forward to the power metric.
    pub fn generate_cycle(&mut self, specs: &[MetricSpec]) -> Result<Vec<Reading>, GenerateError> {
        let mut cycle = CycleState::default();
        let mut readings = Vec::with_capacity(specs.len());

        for spec in specs {
            let base = self.generate(spec, &cycle)?;
            cycle.record(spec.metric, base);
            readings.push(Reading { spec: *spec, base });
        }

        Ok(readings)
    }
}

pub fn derive_power(voltage: f64, current: f64) -> f64 {
    round_to(voltage * current, 2)
}

/// Round half away from zero to `digits` decimals.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (value * scale).round() / scale
}

/// Final published value: `round(base × factor, 2)`.
pub fn scale(base: f64, factor: u8) -> f64 {
    round_to(base * f64::from(factor), 2)
}

/// Text payload for a published value; always carries a fractional part
/// (`220.0`, `1234.56`).
pub fn format_payload(value: f64) -> String {
    format!("{value:?}")
}
