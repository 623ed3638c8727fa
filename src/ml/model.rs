use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::domain::error::TrainError;
use crate::ml::kmeans::nearest_centroids;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct AutoencoderConfig {
    /// Token alphabet size (256 for bytes)
    pub ntokens:            usize,
    pub d_model:            usize,
    /// Feed-forward width inside each transformer block
    pub d_hid:              usize,
    /// Total blocks per model, split evenly around pooling/expansion
    pub nlayers:            usize,
    pub nhead:              usize,
    pub dropout:            f64,
    /// Sequence length (chunk size)
    pub max_len:            usize,
    pub compression_factor: usize,
}

impl AutoencoderConfig {
    /// Width of one latent vector.
    pub fn d_latent(&self) -> usize {
        self.d_model / self.compression_factor
    }

    /// Number of latent vectors per sequence.
    pub fn latent_len(&self) -> usize {
        self.max_len / self.compression_factor
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        if self.nlayers % 2 != 0 {
            return Err(TrainError::OddLayerCount(self.nlayers));
        }
        if self.compression_factor == 0 || self.d_model % self.compression_factor != 0 {
            return Err(TrainError::WidthNotDivisible {
                d_model:            self.d_model,
                compression_factor: self.compression_factor,
            });
        }
        if self.nhead == 0 || self.d_model % self.nhead != 0 {
            return Err(TrainError::HeadsNotDivisible { d_model: self.d_model, nhead: self.nhead });
        }
        if self.max_len % self.compression_factor != 0 {
            return Err(TrainError::SequenceNotDivisible {
                chunk_size:         self.max_len,
                compression_factor: self.compression_factor,
            });
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Autoencoder<B> {
        Autoencoder { encoder: self.init_encoder(device), decoder: self.init_decoder(device) }
    }

    pub fn init_encoder<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        Encoder {
            token_embedding:    EmbeddingConfig::new(self.ntokens, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_len, self.d_model).init(device),
            pre_layers:         self.build_blocks(device),
            post_layers:        self.build_blocks(device),
            final_norm:         LayerNormConfig::new(self.d_model).init(device),
            to_latent:          LinearConfig::new(self.d_model, self.d_latent()).init(device),
            dropout:            DropoutConfig::new(self.dropout).init(),
            compression_factor: self.compression_factor,
            codebook:           None,
        }
    }

    pub fn init_decoder<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        Decoder {
            from_latent:        LinearConfig::new(self.d_latent(), self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_len, self.d_model).init(device),
            pre_layers:         self.build_blocks(device),
            post_layers:        self.build_blocks(device),
            final_norm:         LayerNormConfig::new(self.d_model).init(device),
            head:               LinearConfig::new(self.d_model, self.ntokens).init(device),
            dropout:            DropoutConfig::new(self.dropout).init(),
            expansion_factor:   self.compression_factor,
        }
    }

    /// Half of `nlayers` transformer blocks.
    fn build_blocks<B: Backend>(&self, device: &B::Device) -> Vec<TransformerBlock<B>> {
        (0..self.nlayers / 2).map(|_| self.build_block(device)).collect()
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> TransformerBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.nhead)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_hid).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_hid, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        TransformerBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

// ─── Transformer Block ────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> TransformerBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let attn_output = self.self_attn.forward(MhaInput::self_attn(x.clone())).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

fn run_blocks<B: Backend>(blocks: &[TransformerBlock<B>], mut x: Tensor<B, 3>) -> Tensor<B, 3> {
    for block in blocks {
        x = block.forward(x);
    }
    x
}

fn position_ids<B: Backend>(batch_size: usize, seq_len: usize, device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::<B, 1, Int>::arange(0..seq_len as i64, device)
        .unsqueeze::<2>()
        .expand([batch_size, seq_len])
}

// ─── Codebook ─────────────────────────────────────────────────────────────────

/// `size` learned centroids of width `dim`, stored as one [size, dim] parameter.
#[derive(Module, Debug)]
pub struct Codebook<B: Backend> {
    pub centroids: Param<Tensor<B, 2>>,
}

impl<B: Backend> Codebook<B> {
    pub fn from_tensor(centroids: Tensor<B, 2>) -> Self {
        Self { centroids: Param::from_tensor(centroids) }
    }

    /// Placeholder with the right shape, overwritten by a checkpoint load.
    pub fn zeros(size: usize, dim: usize, device: &B::Device) -> Self {
        Self::from_tensor(Tensor::zeros([size, dim], device))
    }

    pub fn size(&self) -> usize { self.centroids.val().dims()[0] }

    pub fn dim(&self) -> usize { self.centroids.val().dims()[1] }

    /// Snap every latent vector to its nearest centroid (Euclidean).
    pub fn quantize(&self, soft: Tensor<B, 3>) -> QuantizedLatent<B> {
        let [batch_size, latent_len, dim] = soft.dims();
        let flat      = soft.clone().detach().reshape([batch_size * latent_len, dim]);
        let centroids = self.centroids.val();

        let codes = nearest_centroids(flat, centroids.clone().detach());
        let hard  = centroids
            .select(0, codes.clone())
            .reshape([batch_size, latent_len, dim]);

        // Forward value of `hard`, gradient of `soft`
        let straight_through = soft.clone() + (hard.clone() - soft.clone()).detach();

        QuantizedLatent {
            straight_through,
            hard,
            soft,
            codes: codes.reshape([batch_size, latent_len]),
        }
    }
}

// ─── Encoder ──────────────────────────────────────────────────────────────────

/// Everything the quantised encoder produces for one batch.
#[derive(Debug, Clone)]
pub struct QuantizedLatent<B: Backend> {
    /// Hard values forward, soft gradients backward; fed to the decoder
    pub straight_through: Tensor<B, 3>,
    /// Selected centroids (gradient flows into the codebook)
    pub hard:             Tensor<B, 3>,
    /// Pre-quantisation encoder output
    pub soft:             Tensor<B, 3>,
    /// Selected centroid index per latent position, [batch, latent_len]
    pub codes:            Tensor<B, 2, Int>,
}

/// Encoder output, tagged by how the encoder was configured.
#[derive(Debug, Clone)]
pub enum EncoderOutput<B: Backend> {
    Continuous(Tensor<B, 3>),
    Quantized(QuantizedLatent<B>),
}

impl<B: Backend> EncoderOutput<B> {
    /// The tensor the decoder consumes.
    pub fn decoder_input(&self) -> Tensor<B, 3> {
        match self {
            EncoderOutput::Continuous(latent) => latent.clone(),
            EncoderOutput::Quantized(q)       => q.straight_through.clone(),
        }
    }

    /// Pre-quantisation latents, whatever the mode.
    pub fn soft(&self) -> Tensor<B, 3> {
        match self {
            EncoderOutput::Continuous(latent) => latent.clone(),
            EncoderOutput::Quantized(q)       => q.soft.clone(),
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, EncoderOutput::Quantized(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VqMode {
    Continuous,
    Quantized,
}

/// Token ids → pooled latent vectors, optionally snapped to a codebook.
///
/// The encoder is continuous until a codebook is installed with
/// [`Encoder::with_codebook`]; there is no separate mode flag.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub pre_layers:         Vec<TransformerBlock<B>>,
    pub post_layers:        Vec<TransformerBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub to_latent:          Linear<B>,
    pub dropout:            Dropout,
    pub compression_factor: usize,
    pub codebook:           Option<Codebook<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn mode(&self) -> VqMode {
        if self.codebook.is_some() { VqMode::Quantized } else { VqMode::Continuous }
    }

    /// Install (or replace) the codebook; the encoder is quantised afterwards.
    pub fn with_codebook(mut self, codebook: Codebook<B>) -> Self {
        self.codebook = Some(codebook);
        self
    }

    /// input_ids: [batch, seq_len] → latents: [batch, seq_len / cf, d_latent]
    pub fn encode_continuous(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let tok_emb = self.token_embedding.forward(input_ids);
        let pos_emb = self.position_embedding.forward(position_ids(batch_size, seq_len, &device));

        let x = self.dropout.forward(tok_emb + pos_emb);
        let x = run_blocks(&self.pre_layers, x);

        // Mean-pool every `cf` adjacent positions
        let [_, _, d_model] = x.dims();
        let cf     = self.compression_factor;
        let pooled = x
            .reshape([batch_size, seq_len / cf, cf, d_model])
            .mean_dim(2)
            .reshape([batch_size, seq_len / cf, d_model]);

        let x = run_blocks(&self.post_layers, pooled);
        self.to_latent.forward(self.final_norm.forward(x))
    }

    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> EncoderOutput<B> {
        let soft = self.encode_continuous(input_ids);
        match &self.codebook {
            None           => EncoderOutput::Continuous(soft),
            Some(codebook) => EncoderOutput::Quantized(codebook.quantize(soft)),
        }
    }
}

// ─── Decoder ──────────────────────────────────────────────────────────────────

/// Latent vectors → per-position token logits.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub from_latent:        Linear<B>,
    pub position_embedding: Embedding<B>,
    pub pre_layers:         Vec<TransformerBlock<B>>,
    pub post_layers:        Vec<TransformerBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub head:               Linear<B>,
    pub dropout:            Dropout,
    pub expansion_factor:   usize,
}

impl<B: Backend> Decoder<B> {
    /// latents: [batch, latent_len, d_latent] → logits: [batch, latent_len * cf, ntokens]
    pub fn forward(&self, latents: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, latent_len, _] = latents.dims();
        let x = run_blocks(&self.pre_layers, self.from_latent.forward(latents));

        // Repeat every latent position `cf` times
        let [_, _, d_model] = x.dims();
        let cf      = self.expansion_factor;
        let seq_len = latent_len * cf;
        let expanded = x
            .reshape([batch_size, latent_len, 1, d_model])
            .expand([batch_size, latent_len, cf, d_model])
            .reshape([batch_size, seq_len, d_model]);

        let pos_emb = self.position_embedding.forward(
            position_ids(batch_size, seq_len, &expanded.device())
        );
        let x = self.dropout.forward(expanded + pos_emb);
        let x = run_blocks(&self.post_layers, x);
        self.head.forward(self.final_norm.forward(x))
    }
}

// ─── Autoencoder ──────────────────────────────────────────────────────────────

/// Encoder and decoder trained jointly by one optimizer.
#[derive(Module, Debug)]
pub struct Autoencoder<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
}

pub struct AutoencoderOutput<B: Backend> {
    pub latent: EncoderOutput<B>,
    /// [batch, seq_len, ntokens]
    pub logits: Tensor<B, 3>,
}

impl<B: Backend> Autoencoder<B> {
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> AutoencoderOutput<B> {
        let latent = self.encoder.forward(input_ids);
        let logits = self.decoder.forward(latent.decoder_input());
        AutoencoderOutput { latent, logits }
    }

    pub fn vq_mode(&self) -> VqMode {
        self.encoder.mode()
    }

    pub fn with_codebook(self, codebook: Codebook<B>) -> Self {
        Self { encoder: self.encoder.with_codebook(codebook), decoder: self.decoder }
    }
}
