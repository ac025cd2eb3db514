/*!
The sequence regressor: an LSTM encoder, residual self-attention and a feed-forward head
*/
use crate::config::{ModelConfig, ATTENTION_HEADS};
use crate::error::{Error, Result};
use tch::nn::{self, LSTMState, Linear, RNN};
use tch::{Device, Kind, Tensor};
use tracing::{debug, warn};

pub mod attention;
pub mod lstm;

pub use attention::SelfAttention;
pub use lstm::LstmEncoder;

/// Whether a forward computation is part of training or inference
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Dropout is active and gradients may be tracked
    Training,
    /// Dropout is disabled
    Inference,
}

impl Mode {
    /// Whether this is `Mode::Training`
    #[inline]
    pub fn is_training(self) -> bool {
        self == Mode::Training
    }
}

/// Maps a `(batch, time, input_size)` window to a `(batch, output_size)` prediction
#[derive(Debug)]
pub struct SequenceRegressor {
    config: ModelConfig,
    device: Device,
    lstm: LstmEncoder,
    attention: SelfAttention,
    fc_hidden: Linear,
    fc_output: Linear,
}

impl ModelConfig {
    /// Build a `SequenceRegressor` over a given `VarStore`, registering its parameters at the store's root
    pub fn build(&self, vs: &nn::VarStore) -> Result<SequenceRegressor> {
        self.validate()?;
        if self.dropout > 0.0 && self.num_layers == 1 {
            warn!(
                dropout = self.dropout,
                "LSTM dropout only applies between layers, and this model has a single layer"
            );
        }
        let root = vs.root();
        let hidden = self.hidden_size as i64;
        let lstm = LstmEncoder::new(
            &root / "lstm",
            self.input_size as i64,
            hidden,
            self.num_layers as i64,
            self.dropout,
        );
        let attention = SelfAttention::new(&root / "attention", hidden, ATTENTION_HEADS as i64);
        // Indices follow the position of each linear layer in a sequential head
        let fc = &root / "fc";
        let fc_hidden = nn::linear(&fc / "0", hidden, self.head_size() as i64, Default::default());
        let fc_output = nn::linear(
            &fc / "3",
            self.head_size() as i64,
            self.output_size as i64,
            Default::default(),
        );
        debug!(config = ?self, device = ?vs.device(), "built sequence regressor");
        Ok(SequenceRegressor {
            config: *self,
            device: vs.device(),
            lstm,
            attention,
            fc_hidden,
            fc_output,
        })
    }
}

impl SequenceRegressor {
    /// This model's configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The device this model's parameters live on
    pub fn device(&self) -> Device {
        self.device
    }

    /// This model's recurrent encoder
    pub fn encoder(&self) -> &LstmEncoder {
        &self.lstm
    }

    /// A zero carry for a given batch size
    pub fn zero_state(&self, batch_dim: i64) -> LSTMState {
        self.lstm.zero_state(batch_dim)
    }

    /// Check an input window's shape. `-1` in the expected shape marks a free dimension.
    fn check_input(&self, xs: &Tensor) -> Result<()> {
        let found = xs.size();
        let width = self.config.input_size as i64;
        match found.as_slice() {
            [batch, time, w] if *batch > 0 && *time > 0 && *w == width => Ok(()),
            _ => Err(Error::ShapeMismatch {
                what: "input window",
                expected: vec![-1, -1, width],
                found,
            }),
        }
    }

    fn check_carry(&self, carry: &LSTMState, batch_dim: i64) -> Result<()> {
        let expected = self.lstm.state_shape(batch_dim).to_vec();
        let LSTMState((h, c)) = carry;
        for &(what, t) in [("carry h", h), ("carry c", c)].iter() {
            let found = t.size();
            if found != expected {
                return Err(Error::ShapeMismatch {
                    what,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Run the model on a window, continuing from `carry` if one is given or from a zero state otherwise.
    ///
    /// Returns the `(batch, output_size)` output and the carry after the last time step. Shapes are checked
    /// before any computation happens.
    pub fn forward(
        &self,
        xs: &Tensor,
        carry: Option<&LSTMState>,
        mode: Mode,
    ) -> Result<(Tensor, LSTMState)> {
        self.check_input(xs)?;
        let batch_dim = xs.size()[0];
        let state = match carry {
            Some(carry) => {
                self.check_carry(carry, batch_dim)?;
                let LSTMState((h, c)) = carry;
                let h = h.to_kind(Kind::Float).to_device(self.device);
                let c = c.to_kind(Kind::Float).to_device(self.device);
                LSTMState((h, c))
            }
            None => self.lstm.zero_state(batch_dim),
        };
        let xs = xs.to_kind(Kind::Float).to_device(self.device);

        let (hidden, state) = self.lstm.seq_mode(&xs, &state, mode);
        let context = hidden.apply(&self.attention);
        let combined = &hidden + context;
        let output = combined
            .select(1, -1)
            .apply(&self.fc_hidden)
            .relu()
            .dropout(self.config.dropout, mode.is_training())
            .apply(&self.fc_output);
        Ok((output, state))
    }

    /// Run the model in inference mode without tracking gradients
    pub fn predict(&self, xs: &Tensor, carry: Option<&LSTMState>) -> Result<(Tensor, LSTMState)> {
        tch::no_grad(|| self.forward(xs, carry, Mode::Inference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(num_layers: usize, dropout: f64) -> ModelConfig {
        ModelConfig {
            input_size: 4,
            hidden_size: 8,
            num_layers,
            output_size: 1,
            dropout,
        }
    }

    fn window(batch: i64, time: i64, width: i64) -> Tensor {
        Tensor::randn([batch, time, width], (Kind::Float, Device::Cpu))
    }

    fn is_mismatch(result: Result<(Tensor, LSTMState)>) -> bool {
        matches!(result, Err(ref err) if err.is_shape_mismatch())
    }

    #[test]
    fn small_model_scenario() {
        tch::manual_seed(42);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(1, 0.0).build(&vs).unwrap();
        let (output, carry) = model.predict(&window(1, 5, 4), None).unwrap();
        assert_eq!(output.size(), vec![1, 1]);
        assert!(output.double_value(&[0, 0]).is_finite());
        assert_eq!(carry.h().size(), vec![1, 1, 8]);
        assert_eq!(carry.c().size(), vec![1, 1, 8]);
    }

    #[test]
    fn parameter_names() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _model = small_config(2, 0.1).build(&vs).unwrap();
        let variables = vs.variables();
        for name in &[
            "lstm.weight_ih_l0",
            "lstm.weight_hh_l1",
            "lstm.bias_ih_l1",
            "attention.in_proj_weight",
            "attention.in_proj_bias",
            "attention.out_proj.weight",
            "fc.0.weight",
            "fc.3.bias",
        ] {
            assert!(variables.contains_key(*name), "missing {}", name);
        }
        assert_eq!(variables["fc.0.weight"].size(), vec![4, 8]);
        assert_eq!(variables["fc.3.weight"].size(), vec![1, 4]);
    }

    #[test]
    fn output_width_follows_config() {
        tch::manual_seed(1);
        for (layers, hidden, outputs) in &[(1, 4, 1), (2, 16, 3), (3, 12, 2)] {
            let config = ModelConfig {
                input_size: 6,
                hidden_size: *hidden,
                num_layers: *layers,
                output_size: *outputs,
                dropout: 0.3,
            };
            let vs = nn::VarStore::new(Device::Cpu);
            let model = config.build(&vs).unwrap();
            let (output, carry) = model.predict(&window(3, 7, 6), None).unwrap();
            assert_eq!(output.size(), vec![3, *outputs as i64]);
            assert_eq!(carry.h().size(), vec![*layers as i64, 3, *hidden as i64]);
        }
    }

    #[test]
    fn invalid_config_does_not_build() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ModelConfig {
            hidden_size: 10,
            ..small_config(1, 0.0)
        };
        assert!(matches!(config.build(&vs), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn inference_is_deterministic() {
        tch::manual_seed(2);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.5).build(&vs).unwrap();
        let xs = window(2, 6, 4);
        let (first, _) = model.predict(&xs, None).unwrap();
        let (second, _) = model.predict(&xs, None).unwrap();
        assert!(first.equal(&second));
    }

    #[test]
    fn wrong_width_is_a_shape_mismatch() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(1, 0.0).build(&vs).unwrap();
        assert!(is_mismatch(model.predict(&window(1, 5, 3), None)));
        let unbatched = Tensor::zeros([5, 4], (Kind::Float, Device::Cpu));
        assert!(is_mismatch(model.predict(&unbatched, None)));
        assert!(is_mismatch(model.predict(&window(1, 0, 4), None)));
    }

    #[test]
    fn wrong_carry_is_a_shape_mismatch() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(1, 0.0).build(&vs).unwrap();
        let carry = model.zero_state(2);
        assert!(is_mismatch(model.predict(&window(1, 5, 4), Some(&carry))));
    }

    #[test]
    fn single_time_step() {
        tch::manual_seed(4);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.0).build(&vs).unwrap();
        let (output, _) = model.predict(&window(2, 1, 4), None).unwrap();
        assert_eq!(output.size(), vec![2, 1]);
    }

    #[test]
    fn explicit_zero_carry_matches_no_carry() {
        tch::manual_seed(6);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.0).build(&vs).unwrap();
        let xs = window(1, 5, 4);
        let (without, _) = model.predict(&xs, None).unwrap();
        let (with, _) = model.predict(&xs, Some(&model.zero_state(1))).unwrap();
        assert!(without.allclose(&with, 1e-6, 1e-7, false));
    }

    #[test]
    fn carry_continues_the_sequence() {
        tch::manual_seed(8);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.0).build(&vs).unwrap();
        let xs = window(2, 10, 4);
        let (_, whole) = model.predict(&xs, None).unwrap();
        let (_, carry) = model.predict(&xs.narrow(1, 0, 4), None).unwrap();
        let (_, continued) = model.predict(&xs.narrow(1, 4, 6), Some(&carry)).unwrap();
        assert!(whole.h().allclose(&continued.h(), 1e-5, 1e-6, false));
        assert!(whole.c().allclose(&continued.c(), 1e-5, 1e-6, false));
    }

    #[test]
    fn batch_elements_are_independent() {
        tch::manual_seed(10);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(1, 0.0).build(&vs).unwrap();
        let xs = window(3, 5, 4);
        let (all, _) = model.predict(&xs, None).unwrap();
        let (last, _) = model.predict(&xs.narrow(0, 2, 1), None).unwrap();
        assert!(all.narrow(0, 2, 1).allclose(&last, 1e-5, 1e-6, false));
    }

    #[test]
    fn training_mode_tracks_gradients() {
        tch::manual_seed(12);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.0).build(&vs).unwrap();
        let xs = window(1, 5, 4);
        let (trained, _) = model.forward(&xs, None, Mode::Training).unwrap();
        let (inferred, _) = model.predict(&xs, None).unwrap();
        assert!(trained.requires_grad());
        assert!(!inferred.requires_grad());
        // Without dropout both modes compute the same function
        assert!(trained.detach().allclose(&inferred, 1e-5, 1e-6, false));
    }

    #[test]
    fn training_mode_applies_dropout() {
        tch::manual_seed(14);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.5).build(&vs).unwrap();
        let xs = window(4, 6, 4);
        let (first, _) = model.forward(&xs, None, Mode::Training).unwrap();
        let (second, _) = model.forward(&xs, None, Mode::Training).unwrap();
        assert!(!first.equal(&second));
        let (inferred, _) = model.predict(&xs, None).unwrap();
        let (again, _) = model.predict(&xs, None).unwrap();
        assert!(inferred.equal(&again));
    }

    #[test]
    fn double_precision_carry_is_accepted() {
        tch::manual_seed(16);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = small_config(2, 0.0).build(&vs).unwrap();
        let xs = window(1, 5, 4);
        let (_, carry) = model.predict(&xs.narrow(1, 0, 2), None).unwrap();
        let double = LSTMState((carry.h().to_kind(Kind::Double), carry.c().to_kind(Kind::Double)));
        let (from_float, _) = model.predict(&xs.narrow(1, 2, 3), Some(&carry)).unwrap();
        let (from_double, state) = model.predict(&xs.narrow(1, 2, 3), Some(&double)).unwrap();
        assert_eq!(state.h().kind(), Kind::Float);
        assert!(from_float.allclose(&from_double, 1e-5, 1e-6, false));
    }
}
