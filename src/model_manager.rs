use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, linear};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::Deserialize;
use tokenizers::{
    EncodeInput,
    Encoding,
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};
use tracing::{debug, info};

use crate::{
    catalog::{Catalog, settings},
    embedding::Embedder,
    error::Result,
    hashing_model::{HashingEmbedder, TermOverlapScorer},
    reranker::RelevanceScorer,
};

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_RERANK_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-12-v2";
pub const EMBED_MODEL_ENV: &str = "VEDARAG_EMBED_MODEL";
pub const RERANK_MODEL_ENV: &str = "VEDARAG_RERANK_MODEL";
pub const OFFLINE_ENV: &str = "VEDARAG_OFFLINE_MODELS";

/// Longest token sequence fed to either model.
const MAX_SEQUENCE_TOKENS: usize = 256;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Which models to load, after flag/env/catalog resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub embedding_model: String,
    pub rerank_model: String,
    pub offline: bool,
}

/// Command-line overrides, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub embedding_model: Option<String>,
    pub rerank_model: Option<String>,
    pub offline: bool,
}

impl ModelSpec {
    /// Resolve model ids from, in order: explicit overrides, the
    /// `VEDARAG_EMBED_MODEL` / `VEDARAG_RERANK_MODEL` environment variables,
    /// the catalog settings table, and the built-in defaults.
    pub fn resolve(
        overrides: &ModelOverrides,
        catalog: Option<&Catalog>,
    ) -> Result<Self> {
        let embedding_model = resolve_one(
            overrides.embedding_model.as_deref(),
            EMBED_MODEL_ENV,
            catalog,
            settings::EMBEDDING_MODEL,
            DEFAULT_EMBEDDING_MODEL,
        )?;
        let rerank_model = resolve_one(
            overrides.rerank_model.as_deref(),
            RERANK_MODEL_ENV,
            catalog,
            settings::RERANK_MODEL,
            DEFAULT_RERANK_MODEL,
        )?;
        let offline = overrides.offline
            || std::env::var(OFFLINE_ENV)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);

        Ok(Self {
            embedding_model,
            rerank_model,
            offline,
        })
    }

    /// The deterministic hashing models.
    pub fn offline() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            rerank_model: DEFAULT_RERANK_MODEL.to_string(),
            offline: true,
        }
    }
}

fn resolve_one(
    explicit: Option<&str>,
    env_var: &str,
    catalog: Option<&Catalog>,
    setting: &str,
    default: &str,
) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }
    if let Ok(id) = std::env::var(env_var)
        && !id.is_empty()
    {
        return Ok(id);
    }
    if let Some(catalog) = catalog
        && let Some(id) = catalog.get_setting(setting)?
    {
        return Ok(id);
    }
    Ok(default.to_string())
}

/// Models constructed once at startup and shared by reference.
#[derive(Clone)]
pub struct ModelHandles {
    pub embedder: Arc<dyn Embedder>,
    pub scorer: Arc<dyn RelevanceScorer>,
}

impl ModelHandles {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self { embedder, scorer }
    }

    /// Load both models described by `spec`.
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        Ok(Self {
            embedder: load_embedder(spec)?,
            scorer: load_scorer(spec)?,
        })
    }

    /// Hashing embedder plus term-overlap scorer; needs no model files.
    pub fn offline() -> Self {
        Self {
            embedder: Arc::new(HashingEmbedder::default()),
            scorer: Arc::new(TermOverlapScorer),
        }
    }
}

impl std::fmt::Debug for ModelHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandles")
            .field("embedder", &self.embedder.model_id())
            .field("scorer", &self.scorer.model_id())
            .finish()
    }
}

pub fn load_embedder(spec: &ModelSpec) -> Result<Arc<dyn Embedder>> {
    if spec.offline {
        return Ok(Arc::new(HashingEmbedder::default()));
    }
    Ok(Arc::new(BertEmbedder::load(&spec.embedding_model)?))
}

pub fn load_scorer(spec: &ModelSpec) -> Result<Arc<dyn RelevanceScorer>> {
    if spec.offline {
        return Ok(Arc::new(TermOverlapScorer));
    }
    Ok(Arc::new(CrossEncoder::load(&spec.rerank_model)?))
}

/// Local paths of the three files a BERT checkpoint needs.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// A model id is either a local directory or a Hugging Face repo id.
fn fetch_model_files(model_id: &str) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        debug!(path = %local.display(), "loading model from local directory");
        return Ok(ModelFiles {
            config: local.join("config.json"),
            tokenizer: local.join("tokenizer.json"),
            weights: local.join("model.safetensors"),
        });
    }

    info!(model = model_id, "fetching model from the Hugging Face hub");
    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_progress(false)
        .build()?;
    let repo = api.model(model_id.to_string());
    Ok(ModelFiles {
        config: repo.get("config.json")?,
        tokenizer: repo.get("tokenizer.json")?,
        weights: repo.get("model.safetensors")?,
    })
}

#[derive(Deserialize)]
struct HiddenSize {
    hidden_size: usize,
}

struct LoadedBert {
    model: BertModel,
    tokenizer: Tokenizer,
    hidden_size: usize,
    vb: VarBuilder<'static>,
}

fn load_bert(files: &ModelFiles, device: &Device, prefix: Option<&str>) -> Result<LoadedBert> {
    let raw_config = std::fs::read_to_string(&files.config)?;
    let config: BertConfig = serde_json::from_str(&raw_config)?;
    let HiddenSize { hidden_size } = serde_json::from_str(&raw_config)?;

    let mut tokenizer = Tokenizer::from_file(&files.tokenizer)?;
    tokenizer
        .with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }))
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQUENCE_TOKENS,
            ..Default::default()
        }))?;

    // SAFETY: the weights file is not modified while mapped.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(
            std::slice::from_ref(&files.weights),
            DType::F32,
            device,
        )?
    };
    let model = match prefix {
        Some(prefix) => BertModel::load(vb.pp(prefix), &config)?,
        None => BertModel::load(vb.clone(), &config)?,
    };

    Ok(LoadedBert {
        model,
        tokenizer,
        hidden_size,
        vb,
    })
}

/// Stack per-sequence ids, type ids and attention masks into `[B, T]`
/// tensors. The tokenizer pads every encoding in a batch to one length.
fn batch_tensors(
    encodings: &[Encoding],
    device: &Device,
) -> Result<(Tensor, Tensor, Tensor)> {
    let mut ids = Vec::with_capacity(encodings.len());
    let mut type_ids = Vec::with_capacity(encodings.len());
    let mut masks = Vec::with_capacity(encodings.len());
    for enc in encodings {
        ids.push(Tensor::new(enc.get_ids(), device)?);
        type_ids.push(Tensor::new(enc.get_type_ids(), device)?);
        masks.push(Tensor::new(enc.get_attention_mask(), device)?);
    }
    Ok((
        Tensor::stack(&ids, 0)?,
        Tensor::stack(&type_ids, 0)?,
        Tensor::stack(&masks, 0)?,
    ))
}

/// Mean over real tokens of `hidden` `[B, T, H]`, weighted by `mask` `[B, T]`.
fn masked_mean(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(hidden.dtype())?;
    let weights = mask.unsqueeze(2)?.broadcast_as(hidden.shape())?;
    let summed = (hidden * &weights)?.sum(1)?;
    let counts = mask.sum_keepdim(1)?.clamp(1e-9, f64::MAX)?;
    Ok(summed.broadcast_div(&counts)?)
}

/// Sentence-transformers style bi-encoder: BERT with masked mean pooling.
pub struct BertEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl BertEmbedder {
    pub fn load(model_id: &str) -> Result<Self> {
        let device = default_device();
        let files = fetch_model_files(model_id)?;
        let loaded = load_bert(&files, &device, None)?;
        info!(model = model_id, dimension = loaded.hidden_size, "loaded embedding model");

        Ok(Self {
            model_id: model_id.to_string(),
            model: loaded.model,
            tokenizer: loaded.tokenizer,
            device,
            dimension: loaded.hidden_size,
        })
    }
}

impl Embedder for BertEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true)?;
        let (ids, type_ids, mask) = batch_tensors(&encodings, &self.device)?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;
        let pooled = masked_mean(&hidden, &mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

/// BERT sequence classifier scoring a `(query, passage)` pair as one input.
pub struct CrossEncoder {
    model_id: String,
    model: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

impl CrossEncoder {
    pub fn load(model_id: &str) -> Result<Self> {
        let device = default_device();
        let files = fetch_model_files(model_id)?;
        let loaded = load_bert(&files, &device, Some("bert"))?;
        let h = loaded.hidden_size;
        let pooler = linear(h, h, loaded.vb.pp("bert.pooler.dense"))?;
        let classifier = linear(h, 1, loaded.vb.pp("classifier"))?;
        info!(model = model_id, "loaded relevance model");

        Ok(Self {
            model_id: model_id.to_string(),
            model: loaded.model,
            pooler,
            classifier,
            tokenizer: loaded.tokenizer,
            device,
        })
    }
}

impl RelevanceScorer for CrossEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let pairs: Vec<EncodeInput> = passages
            .iter()
            .map(|p| (query.to_string(), p.to_string()).into())
            .collect();
        let encodings = self.tokenizer.encode_batch(pairs, true)?;
        let (ids, type_ids, mask) = batch_tensors(&encodings, &self.device)?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;
        // [CLS] token -> pooler -> tanh -> single logit.
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?.squeeze(1)?;
        Ok(logits.to_device(&Device::Cpu)?.to_vec1::<f32>()?)
    }
}
