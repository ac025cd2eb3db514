/*!
An LSTM-with-attention price forecaster written in Rust using PyTorch bindings.

A stacked LSTM encodes a window of market data, multi-head self-attention is added on top of the encoder output
as a residual, and a small feed-forward head turns the last time step into a price. Parameters are laid out like the
equivalent PyTorch module, so converted PyTorch checkpoints can be loaded directly by a [`PricePredictor`].
*/
#![forbid(missing_docs)]

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod predictor;

pub use config::{DeviceSelector, ModelConfig, PredictorConfig};
pub use error::{Error, Result};
pub use model::{Mode, SequenceRegressor};
pub use predictor::PricePredictor;

/// The floating point type to be used for CPU calculations
pub type CpuFloat = f64;
