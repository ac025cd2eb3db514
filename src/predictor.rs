/*!
A price predictor: a sequence regressor, its loaded parameters, and a way to turn market data into input windows
*/
use crate::config::{DeviceSelector, ModelConfig, PredictorConfig};
use crate::data::{FieldWindow, MarketData, Preprocess};
use crate::error::{Error, Result};
use crate::model::SequenceRegressor;
use std::path::Path;
use tch::nn::{LSTMState, VarStore};
use tch::{Device, Tensor};
use tracing::{debug, info};

/// Owns a `SequenceRegressor` together with the parameters it was loaded with
pub struct PricePredictor<P = FieldWindow> {
    vs: VarStore,
    model: SequenceRegressor,
    preprocessor: P,
}

impl PricePredictor {
    /// Load a predictor with the default architecture from a persisted parameter blob.
    ///
    /// Every field of the market data passed to `predict_price` becomes a feature, in name order.
    pub fn load<Q: AsRef<Path>>(weights: Q, device: &str) -> Result<PricePredictor> {
        let device: DeviceSelector = device.parse()?;
        let config = PredictorConfig::new(weights.as_ref(), device);
        PricePredictor::new(&config, FieldWindow::all_fields())
    }
}

impl<P: Preprocess> PricePredictor<P> {
    /// Build the model on the configured device, load its parameters and freeze them
    pub fn new(config: &PredictorConfig, preprocessor: P) -> Result<PricePredictor<P>> {
        let device = config.device.acquire()?;
        let mut vs = VarStore::new(device);
        let model = config.model.build(&vs)?;
        vs.load(&config.weights).map_err(|source| Error::Load {
            path: config.weights.clone(),
            source,
        })?;
        vs.freeze();
        info!(
            weights = %config.weights.display(),
            ?device,
            variables = vs.len(),
            "loaded model parameters"
        );
        Ok(PricePredictor {
            vs,
            model,
            preprocessor,
        })
    }

    /// Wrap a `VarStore`.
    ///
    /// An empty store gets freshly initialised parameters. A populated store must hold every parameter of the
    /// model under its usual name; its values are copied into a store of the predictor's own.
    pub fn from_var_store(vs: VarStore, model: &ModelConfig, preprocessor: P) -> Result<PricePredictor<P>> {
        if vs.len() == 0 {
            let model = model.build(&vs)?;
            return Ok(PricePredictor {
                vs,
                model,
                preprocessor,
            });
        }
        let mut own = VarStore::new(vs.device());
        let model = model.build(&own)?;
        own.copy(&vs)?;
        debug!(variables = own.len(), "copied model parameters from an existing store");
        Ok(PricePredictor {
            vs: own,
            model,
            preprocessor,
        })
    }

    /// Write this predictor's parameters to a file. The format is chosen by `tch` from the file extension.
    pub fn save<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        self.vs.save(&path)?;
        debug!(path = %path.as_ref().display(), "saved model parameters");
        Ok(())
    }

    /// This predictor's model configuration
    pub fn config(&self) -> &ModelConfig {
        self.model.config()
    }

    /// The device this predictor runs on
    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// This predictor's model
    pub fn model(&self) -> &SequenceRegressor {
        &self.model
    }

    /// This predictor's preprocessor
    pub fn preprocessor(&self) -> &P {
        &self.preprocessor
    }

    /// Predict a price from a raw market data record
    pub fn predict_price(&self, data: &MarketData) -> Result<f64> {
        let xs = self.preprocessor.window(data, self.device())?;
        let (prediction, _) = self.model.predict(&xs, None)?;
        Ok(prediction.double_value(&[0, 0]))
    }

    /// Run inference on an input window directly, optionally continuing from a previous call's carry
    pub fn predict_window(&self, xs: &Tensor, carry: Option<&LSTMState>) -> Result<(Tensor, LSTMState)> {
        self.model.predict(xs, carry)
    }
}
