use anyhow::{anyhow, bail, Context, Result};
use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use super::ModelSettings;

const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";
const GENERATION_CONFIG_FILE: &str = "generation_config.json";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";

/// Files needed to bring up a model, resolved to local paths.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub generation_config: Option<PathBuf>,
    pub weights: Vec<PathBuf>,
}

/// A source naming an existing directory is a local artifact (e.g. the merged fine-tune
/// output); anything else is treated as a hub model id.
pub fn resolve(settings: &ModelSettings) -> Result<Snapshot> {
    let local = Path::new(&settings.source);
    if local.is_dir() {
        info!(dir = %local.display(), "using local model snapshot");
        return from_dir(local);
    }

    info!(
        repo = %settings.source,
        revision = %settings.revision,
        "fetching model snapshot from the hub"
    );
    from_hub(settings)
}

pub fn from_dir(dir: &Path) -> Result<Snapshot> {
    let tokenizer = require(dir, TOKENIZER_FILE)?;
    let config = require(dir, CONFIG_FILE)?;
    let generation_config = Some(dir.join(GENERATION_CONFIG_FILE)).filter(|p| p.is_file());

    let index_path = dir.join(WEIGHTS_INDEX_FILE);
    let weights = if index_path.is_file() {
        let index = read_index(&index_path)?;
        shard_files(&index)?
            .into_iter()
            .map(|file| require(dir, &file))
            .collect::<Result<Vec<_>>>()?
    } else {
        vec![require(dir, SINGLE_WEIGHTS_FILE)?]
    };

    Ok(Snapshot {
        tokenizer,
        config,
        generation_config,
        weights,
    })
}

fn from_hub(settings: &ModelSettings) -> Result<Snapshot> {
    let api = ApiBuilder::new()
        .with_token(settings.hf_token.clone())
        .build()
        .context("failed to build hub client")?;
    let repo = api.repo(Repo::with_revision(
        settings.source.clone(),
        RepoType::Model,
        settings.revision.clone(),
    ));

    let tokenizer = fetch(&repo, TOKENIZER_FILE)?;
    let config = fetch(&repo, CONFIG_FILE)?;
    let generation_config = repo.get(GENERATION_CONFIG_FILE).ok();

    let weights = match repo.get(WEIGHTS_INDEX_FILE) {
        Ok(index_path) => {
            let index = read_index(&index_path)?;
            shard_files(&index)?
                .iter()
                .map(|file| fetch(&repo, file))
                .collect::<Result<Vec<_>>>()?
        }
        Err(_) => vec![fetch(&repo, SINGLE_WEIGHTS_FILE)?],
    };

    Ok(Snapshot {
        tokenizer,
        config,
        generation_config,
        weights,
    })
}

fn fetch(repo: &ApiRepo, file: &str) -> Result<PathBuf> {
    repo.get(file)
        .map_err(|e| anyhow!("failed to fetch `{file}` from the hub: {e}"))
}

fn require(dir: &Path, file: &str) -> Result<PathBuf> {
    let path = dir.join(file);
    if !path.is_file() {
        bail!("snapshot file missing: {}", path.display());
    }
    Ok(path)
}

fn read_index(path: &Path) -> Result<serde_json::Value> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Distinct shard file names listed in a safetensors index, in stable order.
pub fn shard_files(index: &serde_json::Value) -> Result<Vec<String>> {
    let files = index["weight_map"]
        .as_object()
        .ok_or_else(|| anyhow!("safetensors index: weight_map is not an object"))?
        .values()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("invalid shard entry in safetensors index"))
        })
        .collect::<Result<BTreeSet<_>>>()?;

    if files.is_empty() {
        bail!("safetensors index lists no shards");
    }
    Ok(files.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shard_files_are_deduplicated_and_sorted() {
        let index = json!({
            "metadata": { "total_size": 1 },
            "weight_map": {
                "lm_head.weight": "model-00002-of-00002.safetensors",
                "model.embed_tokens.weight": "model-00001-of-00002.safetensors",
                "model.norm.weight": "model-00002-of-00002.safetensors"
            }
        });
        assert_eq!(
            shard_files(&index).unwrap(),
            vec![
                "model-00001-of-00002.safetensors".to_string(),
                "model-00002-of-00002.safetensors".to_string(),
            ]
        );
    }

    #[test]
    fn shard_files_rejects_malformed_index() {
        assert!(shard_files(&json!({ "weight_map": [] })).is_err());
        assert!(shard_files(&json!({ "weight_map": { "a": 1 } })).is_err());
        assert!(shard_files(&json!({ "weight_map": {} })).is_err());
    }

    #[test]
    fn local_dir_with_single_weights_file() {
        let dir = std::env::temp_dir().join(format!("coach-snapshot-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for file in [TOKENIZER_FILE, CONFIG_FILE, SINGLE_WEIGHTS_FILE] {
            fs::write(dir.join(file), b"{}").unwrap();
        }

        let snapshot = from_dir(&dir).unwrap();
        assert_eq!(snapshot.weights, vec![dir.join(SINGLE_WEIGHTS_FILE)]);
        assert!(snapshot.generation_config.is_none());

        fs::remove_file(dir.join(SINGLE_WEIGHTS_FILE)).unwrap();
        assert!(from_dir(&dir).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
