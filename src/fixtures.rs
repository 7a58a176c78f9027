//! Fixture resolution with a single-flight cache
//!
//! Turning a model name into a converted model directory (or an artifact
//! name into a downloaded file) is expensive. [`Fixtures`] guarantees each
//! key is resolved at most once per session: the first requester runs the
//! [`FixtureProvider`], concurrent requesters await the same cell, and later
//! requesters reuse the stored outcome. Failures are stored too, so a broken
//! fixture fails every dependent case without being retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{ArtifactSpec, Catalog, ModelSpec};
use crate::config::HarnessConfig;
use crate::error::{ParityError, Result};
use crate::runner::run_variant;
use crate::variant::CommandLine;

/// Written into a converted model directory once conversion succeeded
pub const COMPLETE_MARKER: &str = ".parity-complete";

/// External collaborator that produces fixtures by name
#[async_trait]
pub trait FixtureProvider: Send + Sync {
    async fn resolve_model(&self, name: &str) -> Result<PathBuf>;
    async fn resolve_artifact(&self, name: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixtureKind {
    Model,
    Artifact,
}

/// Cache counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

type Slot = Arc<OnceCell<std::result::Result<PathBuf, String>>>;

/// Session-scoped fixture cache in front of a [`FixtureProvider`]
pub struct Fixtures {
    provider: Arc<dyn FixtureProvider>,
    slots: Mutex<HashMap<(FixtureKind, String), Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    cleanup_dir: Option<PathBuf>,
}

impl Fixtures {
    pub fn new(provider: Arc<dyn FixtureProvider>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cleanup_dir: None,
        }
    }

    /// Remove `dir` when the session is torn down.
    #[must_use]
    pub fn with_cleanup(mut self, dir: PathBuf) -> Self {
        self.cleanup_dir = Some(dir);
        self
    }

    pub async fn model(&self, name: &str) -> Result<PathBuf> {
        self.resolve(FixtureKind::Model, name).await
    }

    pub async fn artifact(&self, name: &str) -> Result<PathBuf> {
        self.resolve(FixtureKind::Artifact, name).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn resolve(&self, kind: FixtureKind, name: &str) -> Result<PathBuf> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry((kind, name.to_string())).or_default().clone()
        };

        let mut populated_here = false;
        let outcome = slot
            .get_or_init(|| {
                populated_here = true;
                self.populate(kind, name)
            })
            .await;

        if populated_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("fixture cache hit");
        }

        outcome.clone().map_err(|reason| ParityError::fixture(name, reason))
    }

    async fn populate(
        &self,
        kind: FixtureKind,
        name: &str,
    ) -> std::result::Result<PathBuf, String> {
        let resolved = match kind {
            FixtureKind::Model => self.provider.resolve_model(name).await,
            FixtureKind::Artifact => self.provider.resolve_artifact(name).await,
        };
        resolved.map_err(|e| match e {
            ParityError::FixtureResolution { reason, .. } => reason,
            other => other.to_string(),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.slots.lock().unwrap_or_else(PoisonError::into_inner).len();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// End of session: forget every resolved fixture and delete the cache
    /// directory if one was registered.
    pub async fn teardown(&self) -> Result<()> {
        let dropped = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let n = slots.len();
            slots.clear();
            n
        };
        debug!(entries = dropped, "fixture cache cleared");

        if let Some(dir) = &self.cleanup_dir {
            if tokio::fs::try_exists(dir).await? {
                info!("Removing fixture cache {}", dir.display());
                tokio::fs::remove_dir_all(dir).await?;
            }
        }
        Ok(())
    }
}

/// Resolves the models and artifacts declared in a [`Catalog`]
pub struct CatalogProvider {
    catalog: Catalog,
    cache_dir: PathBuf,
    converter: Vec<String>,
    convert_timeout: Duration,
    offline: bool,
    #[cfg(feature = "downloads")]
    client: reqwest::Client,
}

impl CatalogProvider {
    pub fn new(catalog: Catalog, config: &HarnessConfig) -> Result<Self> {
        #[cfg(feature = "downloads")]
        let client = reqwest::Client::builder()
            .user_agent(concat!("sample-parity/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ParityError::config(format!("HTTP client initialization failed: {e}")))?;

        Ok(Self {
            catalog,
            cache_dir: config.cache_dir.clone(),
            converter: config.converter.clone(),
            convert_timeout: config.convert_timeout(),
            offline: config.offline,
            #[cfg(feature = "downloads")]
            client,
        })
    }

    pub fn model_dir(&self, name: &str) -> PathBuf {
        self.cache_dir.join("models").join(name)
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join("artifacts").join(name)
    }

    /// The converter invocation for `spec`, writing into `output`.
    pub fn converter_command(&self, spec: &ModelSpec, output: &Path) -> Result<CommandLine> {
        let output = output.to_string_lossy();
        let mut argv = self.converter.iter().map(|arg| {
            arg.replace("{model_id}", &spec.hub_id)
                .replace("{model}", &spec.name)
                .replace("{output}", &output)
        });
        let program = argv
            .next()
            .ok_or_else(|| ParityError::config("converter command must not be empty"))?;
        Ok(CommandLine {
            variant: format!("convert:{}", spec.name),
            program: PathBuf::from(program),
            args: argv.map(Into::into).collect(),
            env: Vec::new(),
            stdin: None,
        })
    }

    async fn convert(&self, spec: &ModelSpec) -> Result<PathBuf> {
        let dir = self.model_dir(&spec.name);
        if tokio::fs::try_exists(dir.join(COMPLETE_MARKER)).await? {
            debug!("Using converted model {}", dir.display());
            return Ok(dir);
        }
        if tokio::fs::try_exists(&dir).await? {
            warn!("Discarding incomplete conversion at {}", dir.display());
            tokio::fs::remove_dir_all(&dir).await?;
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let command = self.converter_command(spec, &dir)?;
        info!("Converting model {} ({}) into {}", spec.name, spec.hub_id, dir.display());
        run_variant(&command, Some(self.convert_timeout))
            .await
            .map_err(|e| ParityError::fixture(&spec.name, e.to_string()))?;

        if !tokio::fs::try_exists(&dir).await? {
            return Err(ParityError::fixture(
                &spec.name,
                format!("converter finished but produced no {}", dir.display()),
            ));
        }
        tokio::fs::write(dir.join(COMPLETE_MARKER), &spec.hub_id).await?;
        Ok(dir)
    }

    async fn fetch(&self, spec: &ArtifactSpec) -> Result<PathBuf> {
        let path = self.artifact_path(&spec.name);
        if tokio::fs::try_exists(&path).await? {
            if checksum_matches(&path, spec.sha256.as_deref()).await? {
                debug!("Using cached artifact {}", path.display());
                return Ok(path);
            }
            warn!("Cached artifact {} failed checksum; refetching", path.display());
            tokio::fs::remove_file(&path).await?;
        }
        if self.offline {
            return Err(ParityError::fixture(
                &spec.name,
                "not cached and offline mode forbids downloads",
            ));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.download(spec, &path).await?;

        if !checksum_matches(&path, spec.sha256.as_deref()).await? {
            tokio::fs::remove_file(&path).await?;
            return Err(ParityError::fixture(&spec.name, "checksum mismatch after download"));
        }
        Ok(path)
    }

    #[cfg(feature = "downloads")]
    async fn download(&self, spec: &ArtifactSpec, path: &Path) -> Result<()> {
        info!("Downloading {} -> {}", spec.url, path.display());
        let fail = |e: reqwest::Error| ParityError::fixture(&spec.name, e.to_string());
        let response = self
            .client
            .get(&spec.url)
            .send()
            .await
            .map_err(fail)?
            .error_for_status()
            .map_err(fail)?;
        let bytes = response.bytes().await.map_err(fail)?;

        let mut part = path.as_os_str().to_os_string();
        part.push(".part");
        let part = PathBuf::from(part);
        tokio::fs::write(&part, &bytes).await?;
        tokio::fs::rename(&part, path).await?;
        Ok(())
    }

    #[cfg(not(feature = "downloads"))]
    async fn download(&self, spec: &ArtifactSpec, _path: &Path) -> Result<()> {
        Err(ParityError::fixture(
            &spec.name,
            "download feature not enabled; build with --features downloads",
        ))
    }
}

#[async_trait]
impl FixtureProvider for CatalogProvider {
    async fn resolve_model(&self, name: &str) -> Result<PathBuf> {
        let spec = self
            .catalog
            .model(name)
            .ok_or_else(|| ParityError::fixture(name, "model is not declared in the case table"))?;

        let Some(local) = &spec.local_path else {
            return self.convert(spec).await;
        };
        if tokio::fs::try_exists(local).await? {
            Ok(local.clone())
        } else {
            Err(ParityError::fixture(
                name,
                format!("pre-converted model {} does not exist", local.display()),
            ))
        }
    }

    async fn resolve_artifact(&self, name: &str) -> Result<PathBuf> {
        let spec = self.catalog.artifact(name).ok_or_else(|| {
            ParityError::fixture(name, "artifact is not declared in the case table")
        })?;
        self.fetch(spec).await
    }
}

/// `true` when no checksum is declared or the file's sha256 matches.
pub async fn checksum_matches(path: &Path, expected: Option<&str>) -> Result<bool> {
    let Some(expected) = expected else {
        return Ok(true);
    };
    let bytes = tokio::fs::read(path).await?;
    let actual = format!("{:x}", Sha256::digest(&bytes));
    Ok(actual.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn provider(cache: &Path) -> CatalogProvider {
        let config = HarnessConfig { cache_dir: cache.to_path_buf(), ..HarnessConfig::default() };
        CatalogProvider::new(Catalog::builtin(), &config).unwrap()
    }

    #[test]
    fn converter_template_is_substituted() {
        let p = provider(Path::new("/cache"));
        let spec = Catalog::builtin().model("SmolLM-135M").cloned().unwrap();
        let cmd = p.converter_command(&spec, &p.model_dir("SmolLM-135M")).unwrap();
        assert_eq!(cmd.program, PathBuf::from("optimum-cli"));
        let rendered = cmd.to_string();
        assert!(rendered.contains("--model HuggingFaceTB/SmolLM-135M"));
        assert!(rendered.ends_with("/cache/models/SmolLM-135M"));
    }

    #[tokio::test]
    async fn unknown_model_is_a_fixture_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider(dir.path()).resolve_model("Nope-1B").await.unwrap_err();
        assert!(matches!(err, ParityError::FixtureResolution { .. }));
    }

    #[tokio::test]
    async fn completed_conversion_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let model_dir = p.model_dir("SmolLM-135M");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join(COMPLETE_MARKER), "HuggingFaceTB/SmolLM-135M").unwrap();

        let resolved = p.resolve_model("SmolLM-135M").await.unwrap();
        assert_eq!(resolved, model_dir);
    }

    #[tokio::test]
    async fn offline_mode_refuses_to_download() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig {
            cache_dir: dir.path().to_path_buf(),
            offline: true,
            ..HarnessConfig::default()
        };
        let p = CatalogProvider::new(Catalog::builtin(), &config).unwrap();
        let err = p.resolve_artifact("adapter_model.safetensors").await.unwrap_err();
        assert!(err.to_string().contains("offline"));
    }

    #[tokio::test]
    async fn cached_artifact_with_matching_checksum_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::builtin();
        catalog.artifacts[0].sha256 = Some(format!("{:x}", Sha256::digest(b"weights")));
        let config = HarnessConfig {
            cache_dir: dir.path().to_path_buf(),
            offline: true,
            ..HarnessConfig::default()
        };
        let p = CatalogProvider::new(catalog, &config).unwrap();
        let path = p.artifact_path("adapter_model.safetensors");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"weights").unwrap();

        assert_eq!(p.resolve_artifact("adapter_model.safetensors").await.unwrap(), path);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert!(checksum_matches(&path, None).await.unwrap());
        assert!(!checksum_matches(&path, Some("00")).await.unwrap());
        let good = format!("{:x}", Sha256::digest(b"abc"));
        assert!(checksum_matches(&path, Some(&good.to_uppercase())).await.unwrap());
    }
}
