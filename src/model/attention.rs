/*!
Multi-head self-attention over a batch-first sequence
*/
use std::borrow::Borrow;
use tch::nn::{self, Init, Module};
use tch::{Kind, Tensor};

/// Multi-head self-attention with a packed query/key/value projection.
///
/// Parameters are `in_proj_weight`, `in_proj_bias` and `out_proj.{weight,bias}`, matching PyTorch's
/// `nn.MultiheadAttention`. No attention dropout is applied.
#[derive(Debug)]
pub struct SelfAttention {
    in_proj_weight: Tensor,
    in_proj_bias: Tensor,
    out_proj: nn::Linear,
    embed_dim: i64,
    heads: i64,
}

impl SelfAttention {
    /// Register a new attention block's parameters under a given path.
    ///
    /// `embed_dim` must be divisible by `heads`; `ModelConfig::validate` guarantees this for the model.
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(vs: P, embed_dim: i64, heads: i64) -> SelfAttention {
        let vs = vs.borrow();
        // Xavier-uniform over the packed (3E, E) projection
        let bound = (6.0 / (4 * embed_dim) as f64).sqrt();
        let in_proj_weight = vs.var(
            "in_proj_weight",
            &[3 * embed_dim, embed_dim],
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        let in_proj_bias = vs.zeros("in_proj_bias", &[3 * embed_dim]);
        let out_proj = nn::linear(vs / "out_proj", embed_dim, embed_dim, Default::default());
        SelfAttention {
            in_proj_weight,
            in_proj_bias,
            out_proj,
            embed_dim,
            heads,
        }
    }

    fn head_dim(&self) -> i64 {
        self.embed_dim / self.heads
    }

    /// Attend over a `(batch, time, embed_dim)` sequence, returning the per-head attention weights as well as the
    /// context. Weights have shape `(batch, heads, time, time)`.
    pub fn attend(&self, xs: &Tensor) -> (Tensor, Tensor) {
        let size = xs.size();
        let (batch, time) = (size[0], size[1]);
        let head_dim = self.head_dim();

        let qkv = xs.matmul(&self.in_proj_weight.transpose(0, 1)) + &self.in_proj_bias;
        let qkv = qkv.chunk(3, -1);
        let split_heads = |t: &Tensor| t.reshape([batch, time, self.heads, head_dim]).transpose(1, 2);
        let q = split_heads(&qkv[0]);
        let k = split_heads(&qkv[1]);
        let v = split_heads(&qkv[2]);

        let scale = 1.0 / (head_dim as f64).sqrt();
        let weights = (q.matmul(&k.transpose(-2, -1)) * scale).softmax(-1, Kind::Float);
        let context = weights
            .matmul(&v)
            .transpose(1, 2)
            .contiguous()
            .view([batch, time, self.embed_dim]);
        (context.apply(&self.out_proj), weights)
    }
}

impl Module for SelfAttention {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.attend(xs).0
    }
}
