use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use super::activation::elu;

/// Gated residual block: `norm(skip(x) + sigmoid(g) * v)` where `[v, g]` is a
/// two-way split of an ELU MLP over `x`. Used to fuse concatenated encodings.
#[derive(Module, Debug)]
pub struct GatedResidual<B: Backend> {
    skip_proj: Option<Linear<B>>,
    hidden: Linear<B>,
    dropout: Dropout,
    gate: Linear<B>,
    norm: LayerNorm<B>,
    alpha: f32,
}

impl<B: Backend> GatedResidual<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let skip = match &self.skip_proj {
            Some(proj) => proj.forward(x.clone()),
            None => x.clone(),
        };

        let h = elu(self.hidden.forward(x), self.alpha);
        let h = self.dropout.forward(h);

        let mut halves = self.gate.forward(h).chunk(2, 1);
        let value = halves.remove(0);
        let gate = activation::sigmoid(halves.remove(0));

        self.norm.forward(skip + gate * value)
    }
}

#[derive(Config, Debug)]
pub struct GatedResidualConfig {
    d_input: usize,
    d_output: usize,

    #[config(default = "None")]
    d_hidden: Option<usize>,

    #[config(default = 0.0)]
    dropout: f64,

    #[config(default = 1.0)]
    alpha: f32,
}

impl GatedResidualConfig {
    pub fn init<B: Backend>(&self) -> GatedResidual<B> {
        let d_hidden = self.d_hidden.unwrap_or(self.d_output);

        let skip_proj = if self.d_input != self.d_output {
            Some(LinearConfig::new(self.d_input, self.d_output).init())
        } else {
            None
        };

        GatedResidual {
            skip_proj,
            hidden: LinearConfig::new(self.d_input, d_hidden).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            gate: LinearConfig::new(d_hidden, self.d_output * 2).init(),
            norm: LayerNormConfig::new(self.d_output).init(),
            alpha: self.alpha,
        }
    }
}
