/*!
Market data and its conversion into model input windows
*/
use crate::error::{Error, Result};
use crate::CpuFloat;
use chrono::NaiveDateTime;
use num::NumCast;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tch::{Device, Kind, Tensor};
use tracing::debug;

pub mod polygon;

/// Tick data for a stock
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Tick<D = NaiveDateTime, F = CpuFloat> {
    /// This tick's timestamp
    pub t: D,
    /// The volume traded this tick
    pub v: F,
    /// The volume weighted average price of this tick
    pub vw: F,
    /// The opening price of this tick
    pub o: F,
    /// The closing price of this tick
    pub c: F,
    /// The high price of this tick
    pub h: F,
    /// The low price of this tick
    pub l: F,
    /// The number of trades which occured during this tick
    pub n: F,
}

impl Tick {
    /// The number of fields a tick feeds into a neural network. Time is *not* fed in.
    pub const NN_FIELDS: usize = 7;
    /// The names a tick's fields take in `MarketData`, in the order `push_tick` writes them
    pub const FIELD_NAMES: [&'static str; 7] =
        ["open", "high", "low", "close", "volume", "vwap", "trades"];
}

impl<D, F> Tick<D, F>
where
    F: Copy + NumCast,
{
    /// Push a tick's data points to an input vector. Guaranteed to write `NN_FIELDS` data points
    pub fn push_tick(&self, input: &mut Vec<f64>) {
        input.push(NumCast::from(self.o).unwrap_or(f64::NAN));
        input.push(NumCast::from(self.h).unwrap_or(f64::NAN));
        input.push(NumCast::from(self.l).unwrap_or(f64::NAN));
        input.push(NumCast::from(self.c).unwrap_or(f64::NAN));
        input.push(NumCast::from(self.v).unwrap_or(f64::NAN));
        input.push(NumCast::from(self.vw).unwrap_or(f64::NAN));
        input.push(NumCast::from(self.n).unwrap_or(f64::NAN));
    }
}

/// A raw market data record: named numeric series, oldest value first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketData {
    fields: BTreeMap<String, Vec<f64>>,
}

impl MarketData {
    /// An empty record
    pub fn new() -> MarketData {
        MarketData::default()
    }
    /// Set a field's series, returning the previous one if there was any
    pub fn insert<S: Into<String>>(&mut self, name: S, series: Vec<f64>) -> Option<Vec<f64>> {
        self.fields.insert(name.into(), series)
    }
    /// Builder-style `insert`
    pub fn with<S: Into<String>>(mut self, name: S, series: Vec<f64>) -> MarketData {
        self.insert(name, series);
        self
    }
    /// Get a field's series
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        self.fields.get(name).map(Vec::as_slice)
    }
    /// Iterate over field names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
    /// The number of fields in this record
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    /// Whether this record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a, D, F> From<&'a [Tick<D, F>]> for MarketData
where
    F: Copy + NumCast,
{
    fn from(ticks: &'a [Tick<D, F>]) -> MarketData {
        let mut series = vec![Vec::with_capacity(ticks.len()); <Tick>::NN_FIELDS];
        let mut row = Vec::with_capacity(<Tick>::NN_FIELDS);
        for tick in ticks {
            row.clear();
            tick.push_tick(&mut row);
            for (column, value) in series.iter_mut().zip(row.iter()) {
                column.push(*value);
            }
        }
        let fields = <Tick>::FIELD_NAMES
            .iter()
            .map(|name| name.to_string())
            .zip(series)
            .collect();
        MarketData { fields }
    }
}

/// Turns raw market data into a `(batch, time, features)` input window
pub trait Preprocess {
    /// Build an input window on a given device
    fn window(&self, data: &MarketData, device: Device) -> Result<Tensor>;
}

/// Stacks named market data series, one feature per field, into a single-element batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWindow {
    /// The fields to use, in feature order. `None` uses every field in name order.
    pub fields: Option<Vec<String>>,
    /// Only use this many of the most recent time steps. `None` uses the whole series.
    pub sequence_length: Option<usize>,
}

impl FieldWindow {
    /// Use every field of the market data
    pub fn all_fields() -> FieldWindow {
        FieldWindow::default()
    }
    /// Use the given fields, in order
    pub fn with_fields<I, S>(fields: I) -> FieldWindow
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldWindow {
            fields: Some(fields.into_iter().map(Into::into).collect()),
            sequence_length: None,
        }
    }
    /// Use the seven tick fields, in the order `Tick::push_tick` writes them
    pub fn ticks() -> FieldWindow {
        Self::with_fields(<Tick>::FIELD_NAMES.iter().copied())
    }
    /// Truncate windows to the most recent `sequence_length` steps
    pub fn last(mut self, sequence_length: usize) -> FieldWindow {
        self.sequence_length = Some(sequence_length);
        self
    }
}

impl Preprocess for FieldWindow {
    fn window(&self, data: &MarketData, device: Device) -> Result<Tensor> {
        let columns: Vec<(&str, &[f64])> = match &self.fields {
            Some(fields) => fields
                .iter()
                .map(|name| {
                    data.field(name)
                        .map(|series| (name.as_str(), series))
                        .ok_or_else(|| Error::MissingField(name.clone()))
                })
                .collect::<Result<_>>()?,
            None => data
                .fields
                .iter()
                .map(|(name, series)| (name.as_str(), series.as_slice()))
                .collect(),
        };

        let steps = columns.first().map(|(_, series)| series.len()).unwrap_or(0);
        for (name, series) in columns.iter() {
            if series.len() != steps {
                return Err(Error::RaggedSeries {
                    field: name.to_string(),
                    expected: steps,
                    found: series.len(),
                });
            }
        }
        let time = self.sequence_length.map_or(steps, |length| length.min(steps));
        if time == 0 || columns.is_empty() {
            return Err(Error::EmptyWindow);
        }

        // Row-major (time, features) from column-major series
        let start = steps - time;
        let mut values = Vec::<f32>::with_capacity(time * columns.len());
        for step in start..steps {
            for (name, series) in columns.iter() {
                let value = series[step];
                if !value.is_finite() {
                    return Err(Error::NonFinite {
                        field: name.to_string(),
                        step,
                    });
                }
                values.push(value as f32);
            }
        }
        debug!(time, features = columns.len(), "built input window");
        Ok(Tensor::from_slice(&values)
            .view([1, time as i64, columns.len() as i64])
            .to_kind(Kind::Float)
            .to_device(device))
    }
}
