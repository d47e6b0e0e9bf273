//! Deployment configuration, read from the environment (and `.env` files via dotenvy).

use std::{fmt::Display, net::SocketAddr, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};

use crate::cleaner::{CleanerConfig, CleaningPolicy, DEFAULT_QUOTE_INDEX, PERSONA_INSTRUCTION};
use crate::inference::{parse_dtype, DevicePreference, ModelSettings, SamplingOverrides};
use crate::service::ServiceOptions;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const BASE_MODEL: &str = "meta-llama/Llama-3.2-1B-Instruct";
pub const FINETUNED_MODEL_DIR: &str = "./llama-finetuned";
const EXTRA_ENV_FILE: &str = "config/coach.env";

/// The two services the system ships: the instruct model behind a persona prompt, and the
/// merged fine-tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Base,
    Finetuned,
}

impl Variant {
    fn model(self) -> &'static str {
        match self {
            Variant::Base => BASE_MODEL,
            Variant::Finetuned => FINETUNED_MODEL_DIR,
        }
    }

    fn default_max_tokens(self) -> usize {
        match self {
            Variant::Base => 100,
            Variant::Finetuned => 150,
        }
    }

    fn policy(self) -> CleaningPolicy {
        match self {
            Variant::Base => CleaningPolicy::QuoteColon,
            Variant::Finetuned => CleaningPolicy::NthQuote,
        }
    }

    fn strips_prompt_echo(self) -> bool {
        matches!(self, Variant::Base)
    }
}

impl FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" | "instruct" => Ok(Variant::Base),
            "finetuned" | "fine-tuned" | "merged" => Ok(Variant::Finetuned),
            other => Err(anyhow!(
                "unknown variant `{other}` (expected `base` or `finetuned`)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub variant: Variant,
    pub bind: SocketAddr,
    pub model: ModelSettings,
    pub service: ServiceOptions,
    pub cleaner: CleanerConfig,
}

impl ServerConfig {
    /// Loads `.env` and `config/coach.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        dotenvy::from_filename(EXTRA_ENV_FILE).ok();
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let variant: Variant = parse_opt(&get, "COACH_VARIANT")?.unwrap_or(Variant::Base);

        let bind = get("COACH_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("COACH_BIND: invalid socket address `{bind}`"))?;

        let dtype = match get("COACH_DTYPE") {
            Some(raw) => Some(parse_dtype(&raw).context("COACH_DTYPE")?),
            None => None,
        };

        let model = ModelSettings {
            source: get("COACH_MODEL").unwrap_or_else(|| variant.model().to_string()),
            revision: get("COACH_REVISION").unwrap_or_else(|| "main".to_string()),
            hf_token: get("HF_TOKEN"),
            device: parse_opt(&get, "COACH_DEVICE")?.unwrap_or(DevicePreference::Auto),
            dtype,
            sampling: SamplingOverrides {
                temperature: parse_opt(&get, "COACH_TEMPERATURE")?,
                top_p: parse_opt(&get, "COACH_TOP_P")?,
                seed: parse_opt(&get, "COACH_SEED")?,
            },
        };

        let default_max_tokens =
            parse_opt(&get, "COACH_MAX_TOKENS")?.unwrap_or(variant.default_max_tokens());
        if default_max_tokens == 0 {
            bail!("COACH_MAX_TOKENS must be positive");
        }

        let service = ServiceOptions {
            default_max_tokens,
            strip_prompt_echo: parse_opt(&get, "COACH_STRIP_PROMPT_ECHO")?
                .unwrap_or(variant.strips_prompt_echo()),
        };

        let quote_index = parse_opt(&get, "COACH_QUOTE_INDEX")?.unwrap_or(DEFAULT_QUOTE_INDEX);
        if quote_index == 0 {
            bail!("COACH_QUOTE_INDEX must be at least 1");
        }

        let cleaner = CleanerConfig {
            policy: parse_opt(&get, "COACH_CLEANER")?.unwrap_or(variant.policy()),
            persona_phrase: lookup("COACH_PERSONA_PHRASE")
                .unwrap_or_else(|| PERSONA_INSTRUCTION.to_string()),
            quote_index,
        };

        Ok(Self {
            variant,
            bind,
            model,
            service,
            cleaner,
        })
    }
}

fn parse_opt<T, F>(get: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("{key}: invalid value `{raw}`: {e}"))
        })
        .transpose()
}
