use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

use crate::modules::activation::elu;

/// Conditional VAE over the scene destination.
#[derive(Module, Debug)]
pub struct DestinationVae<B: Backend> {
    latent_dim: usize,
    dest_encoder: Linear<B>,
    posterior: Linear<B>,
    decoder_hidden: Linear<B>,
    decoder_out: Linear<B>,
}

impl<B: Backend> DestinationVae<B> {
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Posterior `(mu, logvar)` of the latent given context and true destination.
    pub fn posterior(
        &self,
        context: Tensor<B, 2>,
        destination: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let dest = elu(self.dest_encoder.forward(destination), 1.0);
        let stats = self.posterior.forward(Tensor::cat(vec![context, dest], 1));

        let mut halves = stats.chunk(2, 1);
        let mu = halves.remove(0);
        let logvar = halves.remove(0);
        (mu, logvar)
    }

    pub fn decode(&self, context: Tensor<B, 2>, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = elu(self.decoder_hidden.forward(Tensor::cat(vec![context, z], 1)), 1.0);
        self.decoder_out.forward(h)
    }

    /// Reparameterized reconstruction: `z = mu + exp(logvar / 2) * noise`.
    pub fn reconstruct(
        &self,
        context: Tensor<B, 2>,
        destination: Tensor<B, 2>,
        noise: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
        let (mu, logvar) = self.posterior(context.clone(), destination);
        let z = mu.clone() + (logvar.clone() * 0.5).exp() * noise;

        (self.decode(context, z), mu, logvar)
    }
}

#[derive(Config, Debug)]
pub struct DestinationVaeConfig {
    d_context: usize,

    #[config(default = 16)]
    d_dest_encoder: usize,

    #[config(default = 16)]
    latent_dim: usize,

    #[config(default = 64)]
    d_hidden: usize,
}

impl DestinationVaeConfig {
    pub fn init<B: Backend>(&self) -> DestinationVae<B> {
        DestinationVae {
            latent_dim: self.latent_dim,
            dest_encoder: LinearConfig::new(2, self.d_dest_encoder).init(),
            posterior: LinearConfig::new(self.d_context + self.d_dest_encoder, self.latent_dim * 2)
                .init(),
            decoder_hidden: LinearConfig::new(self.d_context + self.latent_dim, self.d_hidden).init(),
            decoder_out: LinearConfig::new(self.d_hidden, 2).init(),
        }
    }
}
