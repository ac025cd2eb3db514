/*!
Model, device and predictor configuration
*/
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tch::{Cuda, Device};
use tracing::info;

/// The number of attention heads used by the model
pub const ATTENTION_HEADS: usize = 4;

/// A descriptor for an instance of the sequence regressor
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The number of features in each time step
    pub input_size: usize,
    /// The width of the LSTM hidden state, and of the attention layer
    pub hidden_size: usize,
    /// The number of stacked LSTM layers
    pub num_layers: usize,
    /// The number of outputs per batch element
    pub output_size: usize,
    /// The dropout probability applied in training mode
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> ModelConfig {
        ModelConfig {
            input_size: 100,
            hidden_size: 128,
            num_layers: 2,
            output_size: 1,
            dropout: 0.2,
        }
    }
}

impl ModelConfig {
    /// Check this configuration's invariants
    pub fn validate(&self) -> Result<()> {
        let widths = [
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("output_size", self.output_size),
        ];
        for (name, width) in widths.iter() {
            if *width == 0 {
                return Err(Error::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if !(self.dropout >= 0.0 && self.dropout < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.hidden_size % ATTENTION_HEADS != 0 {
            return Err(Error::InvalidConfig(format!(
                "hidden_size {} is not divisible by {} attention heads",
                self.hidden_size, ATTENTION_HEADS
            )));
        }
        Ok(())
    }
    /// The width of the inner layer of the feed-forward head
    pub fn head_size(&self) -> usize {
        self.hidden_size / 2
    }
    /// Read a configuration from JSON, validating it
    pub fn from_reader<R: std::io::Read>(rdr: R) -> Result<ModelConfig> {
        let config: ModelConfig = serde_json::from_reader(rdr)?;
        config.validate()?;
        Ok(config)
    }
    /// Read a configuration from a JSON file, validating it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<ModelConfig> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

/// Which compute device to run on
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DeviceSelector {
    /// The CPU
    Cpu,
    /// A specific CUDA device
    Cuda(usize),
    /// Apple's Metal Performance Shaders
    Mps,
    /// The first CUDA device if there is one, otherwise the CPU
    Auto,
}

impl DeviceSelector {
    /// Acquire the selected device, failing if it is not present
    pub fn acquire(&self) -> Result<Device> {
        let device = match *self {
            DeviceSelector::Cpu => Device::Cpu,
            DeviceSelector::Cuda(index) => {
                let available = if Cuda::is_available() {
                    Cuda::device_count().max(0) as usize
                } else {
                    0
                };
                if index >= available {
                    return Err(Error::DeviceUnavailable(format!(
                        "cuda:{} requested, but {} CUDA device(s) are available",
                        index, available
                    )));
                }
                Device::Cuda(index)
            }
            DeviceSelector::Mps => {
                if !tch::utils::has_mps() {
                    return Err(Error::DeviceUnavailable(
                        "mps requested, but this build has no MPS support".into(),
                    ));
                }
                Device::Mps
            }
            DeviceSelector::Auto => Device::cuda_if_available(),
        };
        info!(selector = %self, ?device, "acquired compute device");
        Ok(device)
    }
}

impl Default for DeviceSelector {
    fn default() -> DeviceSelector {
        DeviceSelector::Auto
    }
}

impl FromStr for DeviceSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<DeviceSelector> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceSelector::Cpu),
            "cuda" | "gpu" => Ok(DeviceSelector::Cuda(0)),
            "mps" => Ok(DeviceSelector::Mps),
            "auto" => Ok(DeviceSelector::Auto),
            other => {
                if let Some(index) = other.strip_prefix("cuda:") {
                    index.parse().map(DeviceSelector::Cuda).map_err(|_| {
                        Error::InvalidConfig(format!("invalid CUDA device index {:?}", index))
                    })
                } else {
                    Err(Error::InvalidConfig(format!("invalid device {:?}", s)))
                }
            }
        }
    }
}

impl Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceSelector::Cpu => write!(f, "cpu"),
            DeviceSelector::Cuda(index) => write!(f, "cuda:{}", index),
            DeviceSelector::Mps => write!(f, "mps"),
            DeviceSelector::Auto => write!(f, "auto"),
        }
    }
}

/// Everything needed to construct a `PricePredictor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// The model architecture the weights were trained for
    #[serde(default)]
    pub model: ModelConfig,
    /// The persisted parameter blob
    pub weights: PathBuf,
    /// The device to run on
    #[serde(default)]
    pub device: DeviceSelector,
}

impl PredictorConfig {
    /// A configuration using the default architecture
    pub fn new<P: Into<PathBuf>>(weights: P, device: DeviceSelector) -> PredictorConfig {
        PredictorConfig {
            model: ModelConfig::default(),
            weights: weights.into(),
            device,
        }
    }
}
