/*!
A stacked, batch-first LSTM whose dropout is controlled per call
*/
use super::Mode;
use std::borrow::Borrow;
use tch::nn::{self, Init, LSTMState, RNN};
use tch::{Device, Kind, Tensor};

/// A multi-layer LSTM encoder.
///
/// Parameters are registered as `weight_ih_l{k}`, `weight_hh_l{k}`, `bias_ih_l{k}` and `bias_hh_l{k}`, the names
/// PyTorch uses, so checkpoints of an `nn.LSTM` map onto this encoder one to one.
#[derive(Debug)]
pub struct LstmEncoder {
    flat_weights: Vec<Tensor>,
    input_size: i64,
    hidden_size: i64,
    num_layers: i64,
    dropout: f64,
    device: Device,
}

impl LstmEncoder {
    /// Register a new encoder's parameters under a given path
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        input_size: i64,
        hidden_size: i64,
        num_layers: i64,
        dropout: f64,
    ) -> LstmEncoder {
        let vs = vs.borrow();
        let gates = 4 * hidden_size;
        let bound = 1.0 / (hidden_size as f64).sqrt();
        let init = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let mut flat_weights = Vec::with_capacity(4 * num_layers as usize);
        for layer in 0..num_layers {
            let layer_input = if layer == 0 { input_size } else { hidden_size };
            flat_weights.push(vs.var(
                &format!("weight_ih_l{}", layer),
                &[gates, layer_input],
                init,
            ));
            flat_weights.push(vs.var(
                &format!("weight_hh_l{}", layer),
                &[gates, hidden_size],
                init,
            ));
            flat_weights.push(vs.var(&format!("bias_ih_l{}", layer), &[gates], init));
            flat_weights.push(vs.var(&format!("bias_hh_l{}", layer), &[gates], init));
        }
        LstmEncoder {
            flat_weights,
            input_size,
            hidden_size,
            num_layers,
            dropout,
            device: vs.device(),
        }
    }

    /// The expected number of input features
    pub fn input_size(&self) -> i64 {
        self.input_size
    }

    /// The shape each of the carried `(h, c)` tensors has for a given batch size
    pub fn state_shape(&self, batch_dim: i64) -> [i64; 3] {
        [self.num_layers, batch_dim, self.hidden_size]
    }

    /// Run a `(batch, time, input_size)` sequence from a given state.
    ///
    /// Dropout between layers is only applied in `Mode::Training`.
    pub fn seq_mode(&self, input: &Tensor, state: &LSTMState, mode: Mode) -> (Tensor, LSTMState) {
        let LSTMState((h, c)) = state;
        let flat_weights = self.flat_weights.iter().collect::<Vec<_>>();
        let (output, h, c) = input.lstm(
            &[h, c],
            &flat_weights,
            true,
            self.num_layers,
            self.dropout,
            mode.is_training(),
            false,
            true,
        );
        (output, LSTMState((h, c)))
    }
}

impl RNN for LstmEncoder {
    type State = LSTMState;

    fn zero_state(&self, batch_dim: i64) -> LSTMState {
        let shape = self.state_shape(batch_dim);
        let h = Tensor::zeros(shape, (Kind::Float, self.device));
        let c = Tensor::zeros(shape, (Kind::Float, self.device));
        LSTMState((h, c))
    }

    fn step(&self, input: &Tensor, state: &LSTMState) -> LSTMState {
        let input = input.unsqueeze(1);
        let (_output, state) = self.seq_init(&input, state);
        state
    }

    fn seq_init(&self, input: &Tensor, state: &LSTMState) -> (Tensor, LSTMState) {
        self.seq_mode(input, state, Mode::Inference)
    }
}
