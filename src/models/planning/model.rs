use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use super::destination::{DestinationVae, DestinationVaeConfig};
use crate::data::TrajectoryBatch;
use crate::losses::NLL_PARAMS;
use crate::models::predictor::{ForwardMode, PredictorOutput, SceneEncoding, TrajectoryPredictor};
use crate::modules::activation::{bivariate_params, elu};
use crate::modules::gated::{GatedResidual, GatedResidualConfig};

/// Reference predictor: LSTM ego-history encoder, masked mean over neighbor
/// encodings, planned-trajectory encoder, gated fusion into a scene context,
/// a destination CVAE and an LSTM decoder conditioned on destination and maneuver.
#[derive(Module, Debug)]
pub struct PlanningPredictor<B: Backend> {
    horizon: usize,
    history_embed: Linear<B>,
    history_lstm: Lstm<B>,
    neighbor_embed: Linear<B>,
    plan_embed: Linear<B>,
    fusion: GatedResidual<B>,
    lateral_head: Linear<B>,
    longitudinal_head: Linear<B>,
    destination: DestinationVae<B>,
    decoder_input: Linear<B>,
    decoder_lstm: Lstm<B>,
    output_proj: Linear<B>,
}

impl<B: Backend> PlanningPredictor<B> {
    fn encode_history(&self, history: Tensor<B, 3>) -> Tensor<B, 2> {
        let emb = elu(self.history_embed.forward(history), 1.0);
        let (_, hidden_state) = self.history_lstm.forward(emb, None);

        let [batch, d_seq, d_hidden] = hidden_state.dims();
        hidden_state
            .slice([0..batch, d_seq - 1..d_seq, 0..d_hidden])
            .squeeze(1)
    }

    fn encode_neighbors(&self, neighbors: Tensor<B, 4>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, slots, steps, coords] = neighbors.dims();
        let flat = neighbors.reshape([batch, slots, steps * coords]);
        let emb = elu(self.neighbor_embed.forward(flat), 1.0);

        let mask: Tensor<B, 3> = mask.unsqueeze_dim(2);
        let pooled = (emb * mask.clone()).sum_dim(1) / mask.sum_dim(1).clamp_min(1.0);

        pooled.squeeze(1)
    }

    fn encode_plan(&self, plan: Tensor<B, 3>, mask: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, steps, coords] = plan.dims();
        let flat = (plan * mask).reshape([batch, steps * coords]);

        elu(self.plan_embed.forward(flat), 1.0)
    }
}

impl<B: Backend> TrajectoryPredictor<B> for PlanningPredictor<B> {
    fn latent_dim(&self) -> usize {
        self.destination.latent_dim()
    }

    fn encode(&self, batch: &TrajectoryBatch<B>, mode: ForwardMode) -> SceneEncoding<B> {
        let history = self.encode_history(batch.history.clone());
        let social = self.encode_neighbors(batch.neighbors.clone(), batch.neighbor_mask.clone());
        let plan = self.encode_plan(batch.plan.clone(), batch.plan_mask.clone());

        let context = self
            .fusion
            .forward(Tensor::cat(vec![history, social, plan], 1));

        let lateral = activation::softmax(self.lateral_head.forward(context.clone()), 1);
        let longitudinal = activation::softmax(self.longitudinal_head.forward(context.clone()), 1);

        let conditioning = match mode {
            ForwardMode::TeacherForced => {
                Tensor::cat(vec![batch.lateral.clone(), batch.longitudinal.clone()], 1)
            }
            ForwardMode::Generative => Tensor::cat(vec![lateral.clone(), longitudinal.clone()], 1),
        };

        SceneEncoding {
            context,
            lateral,
            longitudinal,
            conditioning,
        }
    }

    fn forward(
        &self,
        batch: &TrajectoryBatch<B>,
        destination: Tensor<B, 2>,
        noise: Tensor<B, 2>,
        mode: ForwardMode,
    ) -> PredictorOutput<B> {
        let encoding = self.encode(batch, mode);
        let (generated, mu, logvar) =
            self.destination
                .reconstruct(encoding.context.clone(), destination.clone(), noise);
        let future = self.predict(&encoding, destination);

        PredictorOutput {
            future,
            lateral: encoding.lateral,
            longitudinal: encoding.longitudinal,
            destination: generated,
            mu,
            logvar,
        }
    }

    fn sample_destination(&self, encoding: &SceneEncoding<B>, noise: Tensor<B, 2>) -> Tensor<B, 2> {
        self.destination.decode(encoding.context.clone(), noise)
    }

    fn predict(&self, encoding: &SceneEncoding<B>, destination: Tensor<B, 2>) -> Tensor<B, 3> {
        let input = Tensor::cat(
            vec![
                encoding.context.clone(),
                destination,
                encoding.conditioning.clone(),
            ],
            1,
        );
        let step: Tensor<B, 3> = elu(self.decoder_input.forward(input), 1.0).unsqueeze_dim(1);
        let (_, hidden_state) = self
            .decoder_lstm
            .forward(step.repeat(1, self.horizon), None);

        bivariate_params(self.output_proj.forward(hidden_state))
    }
}

#[derive(Config, Debug)]
pub struct PlanningPredictorConfig {
    #[config(default = 16)]
    pub history_len: usize,

    #[config(default = 25)]
    pub horizon: usize,

    #[config(default = 3)]
    pub num_lateral: usize,

    #[config(default = 2)]
    pub num_longitudinal: usize,

    #[config(default = 32)]
    pub d_embed: usize,

    #[config(default = 64)]
    pub d_encoder: usize,

    #[config(default = 128)]
    pub d_decoder: usize,

    #[config(default = 112)]
    pub d_context: usize,

    #[config(default = 16)]
    pub d_dest_encoder: usize,

    #[config(default = 16)]
    pub latent_dim: usize,

    #[config(default = 64)]
    pub d_dest_hidden: usize,

    #[config(default = 0.0)]
    pub dropout: f64,
}

impl PlanningPredictorConfig {
    pub fn init<B: Backend>(&self) -> PlanningPredictor<B> {
        let fusion = GatedResidualConfig::new(self.d_encoder * 3, self.d_context)
            .with_dropout(self.dropout)
            .init();

        let destination = DestinationVaeConfig::new(self.d_context)
            .with_d_dest_encoder(self.d_dest_encoder)
            .with_latent_dim(self.latent_dim)
            .with_d_hidden(self.d_dest_hidden)
            .init();

        let d_decoder_input = self.d_context + 2 + self.num_lateral + self.num_longitudinal;

        PlanningPredictor {
            horizon: self.horizon,
            history_embed: LinearConfig::new(2, self.d_embed).init(),
            history_lstm: LstmConfig::new(self.d_embed, self.d_encoder, true).init(),
            neighbor_embed: LinearConfig::new(self.history_len * 2, self.d_encoder).init(),
            plan_embed: LinearConfig::new(self.horizon * 2, self.d_encoder).init(),
            fusion,
            lateral_head: LinearConfig::new(self.d_context, self.num_lateral).init(),
            longitudinal_head: LinearConfig::new(self.d_context, self.num_longitudinal).init(),
            destination,
            decoder_input: LinearConfig::new(d_decoder_input, self.d_decoder).init(),
            decoder_lstm: LstmConfig::new(self.d_decoder, self.d_decoder, true).init(),
            output_proj: LinearConfig::new(self.d_decoder, NLL_PARAMS).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SceneBatcher, SceneItem, SceneLayout};
    use crate::placement::Placement;
    use burn::backend::NdArray;
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> PlanningPredictorConfig {
        PlanningPredictorConfig::new()
            .with_history_len(4)
            .with_horizon(3)
            .with_d_embed(4)
            .with_d_encoder(6)
            .with_d_decoder(8)
            .with_d_context(10)
            .with_d_dest_encoder(4)
            .with_latent_dim(3)
            .with_d_dest_hidden(6)
    }

    fn batch(config: &PlanningPredictorConfig) -> TrajectoryBatch<TestBackend> {
        let layout = SceneLayout {
            history_len: config.history_len,
            horizon: config.horizon,
            max_neighbors: 2,
            num_lateral: config.num_lateral,
            num_longitudinal: config.num_longitudinal,
        };
        let item = SceneItem {
            history: vec![[0.0, 0.0], [1.0, 0.1], [2.0, 0.2]],
            neighbors: vec![vec![[0.0, 3.0], [1.0, 3.0]]],
            plan: vec![[3.0, 0.3], [4.0, 0.4], [5.0, 0.5]],
            future: vec![[3.0, 0.3], [4.0, 0.4]],
            lateral: 1,
            longitudinal: 0,
        };
        SceneBatcher::new(Placement::default(), layout).batch(vec![item.clone(), item])
    }

    #[test]
    fn forward_shapes_follow_the_config() {
        let config = tiny_config();
        let model: PlanningPredictor<TestBackend> = config.init();
        let batch = batch(&config);

        let output = model.forward(
            &batch,
            batch.destination.clone(),
            Tensor::zeros([2, 3]),
            ForwardMode::TeacherForced,
        );

        assert_eq!(output.future.dims(), [2, 3, NLL_PARAMS]);
        assert_eq!(output.lateral.dims(), [2, 3]);
        assert_eq!(output.longitudinal.dims(), [2, 2]);
        assert_eq!(output.destination.dims(), [2, 2]);
        assert_eq!(output.mu.dims(), [2, 3]);
        assert_eq!(output.logvar.dims(), [2, 3]);
    }

    #[test]
    fn generative_mode_conditions_on_predicted_maneuvers() {
        let config = tiny_config();
        let model: PlanningPredictor<TestBackend> = config.init();
        let batch = batch(&config);

        let encoding = model.encode(&batch, ForwardMode::Generative);
        let conditioning = encoding.conditioning.into_data().convert::<f32>().value;
        let predicted = Tensor::cat(vec![encoding.lateral, encoding.longitudinal], 1)
            .into_data()
            .convert::<f32>()
            .value;

        assert_eq!(conditioning, predicted);
    }
}
