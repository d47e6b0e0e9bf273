pub mod llama;
pub mod snapshot;

use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device};
use tracing::{info, warn};

pub use llama::LlamaBackend;

/// Tokenizer + causal model pair the generation service drives.
///
/// All calls are blocking and may take seconds; callers are expected to run them off the
/// async executor. Implementations are loaded once and shared read-only across requests.
pub trait ModelBackend: Send + Sync {
    /// Model id or directory the backend was loaded from.
    fn name(&self) -> &str;

    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Returns the prompt tokens followed by at most `max_new_tokens` generated tokens.
    fn generate(&self, prompt_tokens: &[u32], max_new_tokens: usize) -> Result<Vec<u32>>;

    /// Decodes with special tokens skipped.
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Encode, generate and decode in one go. The result still starts with the prompt.
    fn complete(&self, prompt: &str, max_new_tokens: usize) -> Result<String> {
        let prompt_tokens = self.encode(prompt).context("encode failed")?;
        let tokens = self
            .generate(&prompt_tokens, max_new_tokens)
            .context("generation failed")?;
        self.decode(&tokens).context("decode failed")
    }
}

// ---------------------------------------------------------
// Load settings
// ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// First CUDA device when one is usable, CPU otherwise.
    Auto,
    Cpu,
    Cuda(usize),
}

impl FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(0)),
            other => {
                let id = other
                    .strip_prefix("cuda:")
                    .ok_or_else(|| anyhow!("unknown device `{other}`"))?;
                let id = id
                    .parse::<usize>()
                    .map_err(|e| anyhow!("invalid CUDA ordinal `{id}`: {e}"))?;
                Ok(DevicePreference::Cuda(id))
            }
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => f.write_str("auto"),
            DevicePreference::Cpu => f.write_str("cpu"),
            DevicePreference::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// Sampling knobs that win over the snapshot's `generation_config.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Hub model id, or a local directory holding a merged/fine-tuned snapshot.
    pub source: String,
    pub revision: String,
    pub hf_token: Option<String>,
    pub device: DevicePreference,
    /// `None` picks f16 on CUDA and f32 on CPU.
    pub dtype: Option<DType>,
    pub sampling: SamplingOverrides,
}

pub fn parse_dtype(s: &str) -> Result<DType> {
    match s.trim().to_ascii_lowercase().as_str() {
        "f16" | "fp16" | "float16" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        "f32" | "fp32" | "float32" => Ok(DType::F32),
        other => bail!("unsupported dtype `{other}` (expected f16, bf16 or f32)"),
    }
}

pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda(id) => Device::new_cuda(id).map_err(|err| {
            anyhow!(
                "failed to initialize CUDA device {id} ({err}). Build with the `cuda` feature \
                 and ensure CUDA libraries are available."
            )
        }),
        DevicePreference::Auto => match Device::cuda_if_available(0) {
            Ok(device) => Ok(device),
            Err(err) => {
                warn!(?err, "CUDA probe failed, falling back to CPU");
                Ok(Device::Cpu)
            }
        },
    }
}

pub fn default_dtype(device: &Device) -> DType {
    if device.is_cuda() {
        DType::F16
    } else {
        DType::F32
    }
}

/// Loads the process-wide backend. Called once at startup.
pub fn load_backend(settings: &ModelSettings) -> Result<LlamaBackend> {
    info!(source = %settings.source, device = %settings.device, "loading model backend");
    LlamaBackend::load(settings)
}
