use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use std::{fs, path::Path};

use super::{default_dtype, select_device, snapshot, ModelBackend, ModelSettings};

// ---------------------------------------------------------
// generation_config.json (subset)
// ---------------------------------------------------------
#[derive(Debug, Default, Clone, Deserialize)]
struct GenerationDefaults {
    #[serde(default)]
    do_sample: Option<bool>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    eos_token_id: Option<EosIds>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EosIds {
    One(u32),
    Many(Vec<u32>),
}

impl EosIds {
    fn into_vec(self) -> Vec<u32> {
        match self {
            EosIds::One(id) => vec![id],
            EosIds::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sampling {
    /// `None` means greedy argmax.
    temperature: Option<f64>,
    top_p: Option<f64>,
    seed: Option<u64>,
}

// ---------------------------------------------------------
// PUBLIC BACKEND
// ---------------------------------------------------------
pub struct LlamaBackend {
    name: String,
    model: Llama,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    eos_ids: Vec<u32>,
    sampling: Sampling,
}

impl LlamaBackend {
    pub fn load(settings: &ModelSettings) -> Result<Self> {
        let device = select_device(settings.device)?;
        let dtype = settings.dtype.unwrap_or_else(|| default_dtype(&device));

        let snapshot = snapshot::resolve(settings)?;
        info!(
            device = ?device,
            dtype = ?dtype,
            shards = snapshot.weights.len(),
            "model snapshot resolved"
        );

        // ---- Tokenizer ----
        let tokenizer = Tokenizer::from_file(&snapshot.tokenizer)
            .map_err(|e| anyhow!("tokenizer error: {e}"))?;
        check_emoji_round_trip(&tokenizer);

        // ---- Config ----
        let llama_config: LlamaConfig = read_json(&snapshot.config)?;
        let config = llama_config.into_config(false);

        let defaults: GenerationDefaults = match &snapshot.generation_config {
            Some(path) => read_json(path)?,
            None => GenerationDefaults::default(),
        };

        let eos_ids = resolve_eos_ids(&defaults, &config, &tokenizer);
        let sampling = resolve_sampling(&defaults, &settings.sampling);
        debug!(?eos_ids, ?sampling, "generation defaults");

        // ---- Weights ----
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&snapshot.weights, dtype, &device)? };
        let model = Llama::load(vb, &config).context("failed to build llama model")?;

        info!(model = %settings.source, "model loaded");

        Ok(Self {
            name: settings.source.clone(),
            model,
            config,
            tokenizer,
            device,
            dtype,
            eos_ids,
            sampling,
        })
    }
}

impl ModelBackend for LlamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenizer encode error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    fn generate(&self, prompt_tokens: &[u32], max_new_tokens: usize) -> Result<Vec<u32>> {
        if prompt_tokens.is_empty() {
            bail!("cannot generate from an empty token sequence");
        }

        // Fresh KV cache per call; the model weights stay untouched.
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let mut lp = LogitsProcessor::new(
            self.sampling.seed.unwrap_or_else(seed),
            self.sampling.temperature,
            self.sampling.top_p,
        );

        let context_limit = self.config.max_position_embeddings;
        let mut tokens = prompt_tokens.to_vec();
        let mut pos = 0usize;

        for _ in 0..max_new_tokens {
            if tokens.len() >= context_limit {
                warn!(context_limit, "context window full, stopping generation");
                break;
            }

            // first step: whole prompt; later: last token only
            let ctx = if pos == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };

            let input = Tensor::new(ctx, &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .forward(&input, pos, &mut cache)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;

            pos += ctx.len();

            let next_id = lp.sample(&logits)?;
            tokens.push(next_id);

            if self.eos_ids.contains(&next_id) {
                break;
            }
        }

        debug!(
            prompt_tokens = prompt_tokens.len(),
            new_tokens = tokens.len() - prompt_tokens.len(),
            "generation finished"
        );
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("tokenizer decode error: {e}"))
    }
}

// ---------------------------------------------------------
// Helpers
// ---------------------------------------------------------
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Catches byte-level decoding regressions early; a broken tokenizer still loads.
fn check_emoji_round_trip(tokenizer: &Tokenizer) {
    let round_trip = tokenizer
        .encode("😊", false)
        .and_then(|enc| tokenizer.decode(enc.get_ids(), false));

    match round_trip {
        Ok(decoded) if !decoded.contains('\u{FFFD}') => {
            info!("tokenizer emoji test OK: {decoded}");
        }
        Ok(decoded) => warn!(%decoded, "tokenizer emits replacement characters"),
        Err(err) => warn!(%err, "tokenizer emoji round-trip failed"),
    }
}

fn resolve_eos_ids(
    defaults: &GenerationDefaults,
    config: &Config,
    tokenizer: &Tokenizer,
) -> Vec<u32> {
    if let Some(ids) = defaults.eos_token_id.clone() {
        return ids.into_vec();
    }

    match &config.eos_token_id {
        Some(LlamaEosToks::Single(id)) => vec![*id],
        Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
        None => ["<|eot_id|>", "<|end_of_text|>", "</s>"]
            .iter()
            .filter_map(|tok| tokenizer.token_to_id(tok))
            .collect(),
    }
}

fn resolve_sampling(
    defaults: &GenerationDefaults,
    overrides: &super::SamplingOverrides,
) -> Sampling {
    let sampled = defaults.do_sample.unwrap_or(false);
    let temperature = overrides
        .temperature
        .or(if sampled { defaults.temperature } else { None })
        .filter(|t| *t > 0.0);
    let top_p = overrides
        .top_p
        .or(if sampled { defaults.top_p } else { None })
        .filter(|p| *p > 0.0 && *p < 1.0);

    Sampling {
        temperature,
        top_p,
        seed: overrides.seed,
    }
}

/// Nanosecond clock, so requests within the same second still sample differently.
fn seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::SamplingOverrides;

    fn defaults(json: &str) -> GenerationDefaults {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reads_llama3_generation_config() {
        let d = defaults(
            r#"{"bos_token_id":128000,"do_sample":true,"eos_token_id":[128001,128008,128009],
                "temperature":0.6,"top_p":0.9,"transformers_version":"4.45.0"}"#,
        );
        assert_eq!(d.eos_token_id.unwrap().into_vec(), vec![128001, 128008, 128009]);

        let d = defaults(r#"{"eos_token_id":2}"#);
        assert_eq!(d.eos_token_id.unwrap().into_vec(), vec![2]);
    }

    #[test]
    fn seeds_differ_within_one_second() {
        let first = seed();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_ne!(first, seed());
    }

    #[test]
    fn sampling_follows_generation_config() {
        let d = defaults(r#"{"do_sample":true,"temperature":0.6,"top_p":0.9}"#);
        let s = resolve_sampling(&d, &SamplingOverrides::default());
        assert_eq!(s.temperature, Some(0.6));
        assert_eq!(s.top_p, Some(0.9));
    }

    #[test]
    fn greedy_when_sampling_disabled() {
        let d = defaults(r#"{"do_sample":false,"temperature":0.6,"top_p":0.9}"#);
        let s = resolve_sampling(&d, &SamplingOverrides::default());
        assert_eq!(s.temperature, None);
        assert_eq!(s.top_p, None);
    }

    #[test]
    fn overrides_win() {
        let d = defaults(r#"{"do_sample":true,"temperature":0.6}"#);
        let s = resolve_sampling(
            &d,
            &SamplingOverrides {
                temperature: Some(0.0),
                top_p: Some(0.5),
                seed: Some(42),
            },
        );
        assert_eq!(s.temperature, None);
        assert_eq!(s.top_p, Some(0.5));
        assert_eq!(s.seed, Some(42));
    }
}
