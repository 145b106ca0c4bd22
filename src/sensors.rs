//! Sensor adapters
//!
//! The scheduler talks to an async [`ReadingSource`]. Hardware drivers
//! usually block on I2C/1-Wire I/O, so they implement the synchronous
//! [`SensorArray`] trait and are wrapped in [`BlockingSensors`], which runs
//! every call on tokio's blocking pool.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::{SensorConfig, SensorKind};
use crate::{Channel, Reading};

/// Async source of readings used by the scheduler
#[async_trait]
pub trait ReadingSource: Send {
    /// Take a throw-away sample so the probes settle
    async fn stabilize(&mut self) -> Result<()>;

    async fn measure(&mut self) -> Result<Reading>;
}

/// Reading source shared across scheduler restarts
pub type SharedSource = Arc<Mutex<Box<dyn ReadingSource>>>;

pub fn shared(source: impl ReadingSource + 'static) -> SharedSource {
    let source: Box<dyn ReadingSource> = Box::new(source);
    Arc::new(Mutex::new(source))
}

/// Build the configured sensor stack
pub fn from_config(config: &SensorConfig) -> SharedSource {
    match config.kind {
        SensorKind::Simulated => {
            debug!("using simulated sensors");
            let array = config
                .unavailable
                .iter()
                .fold(SimulatedSensors::new(), |array, &channel| {
                    array.with_unavailable(channel)
                });
            let sensors = BlockingSensors::new(array).with_precision(config.precision);
            shared(HoldLastValue::new(sensors, config.hold_last.iter().copied()))
        }
    }
}

#[async_trait]
impl<R: ReadingSource + ?Sized> ReadingSource for Box<R> {
    async fn stabilize(&mut self) -> Result<()> {
        (**self).stabilize().await
    }

    async fn measure(&mut self) -> Result<Reading> {
        (**self).measure().await
    }
}

/// Blocking sensor driver
pub trait SensorArray: Send + 'static {
    fn stabilize(&mut self) -> Result<()> {
        Ok(())
    }

    fn sample(&mut self) -> Result<Reading>;
}

/// Runs a [`SensorArray`] on the blocking thread pool
pub struct BlockingSensors<S> {
    array: Option<S>,
    precision: Option<i32>,
}

impl<S: SensorArray> BlockingSensors<S> {
    /// Wrap a driver; readings are rounded to 2 decimals
    pub fn new(array: S) -> Self {
        Self {
            array: Some(array),
            precision: Some(2),
        }
    }

    pub fn with_precision(mut self, decimals: Option<i32>) -> Self {
        self.precision = decimals;
        self
    }

    async fn run_blocking<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut array = self
            .array
            .take()
            .context("sensor array was lost by an earlier panicking read")?;

        let (array, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut array);
            (array, result)
        })
        .await
        .context("sensor read panicked")?;

        self.array = Some(array);
        result
    }
}

#[async_trait]
impl<S: SensorArray> ReadingSource for BlockingSensors<S> {
    async fn stabilize(&mut self) -> Result<()> {
        self.run_blocking(|array| array.stabilize()).await
    }

    async fn measure(&mut self) -> Result<Reading> {
        let reading = self.run_blocking(|array| array.sample()).await?;
        Ok(match self.precision {
            Some(decimals) => reading.rounded(decimals),
            None => reading,
        })
    }
}

/// Re-uses the last good value of selected channels when their sensor
/// fails to produce one
pub struct HoldLastValue<R> {
    inner: R,
    channels: BTreeSet<Channel>,
    last: BTreeMap<Channel, f64>,
}

impl<R: ReadingSource> HoldLastValue<R> {
    pub fn new(inner: R, channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            inner,
            channels: channels.into_iter().collect(),
            last: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl<R: ReadingSource> ReadingSource for HoldLastValue<R> {
    async fn stabilize(&mut self) -> Result<()> {
        self.inner.stabilize().await
    }

    async fn measure(&mut self) -> Result<Reading> {
        let mut reading = self.inner.measure().await?;

        for &channel in &self.channels {
            match reading.value(channel) {
                Some(value) => {
                    self.last.insert(channel, value);
                }
                None => {
                    if let Some(&held) = self.last.get(&channel) {
                        debug!("{channel} unavailable, holding last value {held}");
                        reading.set(channel, held);
                    }
                }
            }
        }

        Ok(reading)
    }
}

/// Deterministic stand-in for the real probes
///
/// Every channel oscillates slightly around its baseline. Timestamps strictly
/// increase even when sampled faster than once per second.
pub struct SimulatedSensors {
    baselines: BTreeMap<Channel, f64>,
    unavailable: BTreeSet<Channel>,
    step: u64,
    last_timestamp: i64,
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensors {
    pub fn new() -> Self {
        Self {
            baselines: BTreeMap::from([
                (Channel::Tds, 450.0),
                (Channel::AirTemp, 22.0),
                (Channel::Distance, 12.0),
                (Channel::Humidity, 55.0),
                (Channel::Ph, 7.0),
                (Channel::WaterTemp, 24.0),
            ]),
            unavailable: BTreeSet::new(),
            step: 0,
            last_timestamp: 0,
        }
    }

    pub fn with_baseline(mut self, channel: Channel, value: f64) -> Self {
        self.baselines.insert(channel, value);
        self
    }

    /// Report the channel as not available on every sample
    pub fn with_unavailable(mut self, channel: Channel) -> Self {
        self.unavailable.insert(channel);
        self
    }
}

impl SensorArray for SimulatedSensors {
    fn sample(&mut self) -> Result<Reading> {
        self.step += 1;

        let timestamp = Utc::now().timestamp().max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;

        let mut reading = Reading::new(timestamp);
        for (&channel, &baseline) in &self.baselines {
            if self.unavailable.contains(&channel) {
                reading = reading.with_unavailable(channel);
                continue;
            }

            let phase = self.step as f64 / 8.0 + channel as usize as f64;
            reading.set(channel, baseline + baseline * 0.02 * phase.sin());
        }

        trace!("simulated sample #{}", self.step);
        Ok(reading)
    }
}
