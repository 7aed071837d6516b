// gemflows — Recipe fetching (local files or the remote catalog, with cache)

use crate::config::RecipesConfig;
use crate::workflow::parser::strip_yaml_ext;
use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Where a recipe's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeSource {
    Remote,
    LocalDev,
}

impl RecipeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipeSource::Remote => "remote",
            RecipeSource::LocalDev => "local_dev",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecipeFetch {
    pub data: String,
    pub source: RecipeSource,
    /// Catalog path without extension (e.g. `marketing/blog_post`), or the
    /// local path as given.
    pub recipe_name: String,
    /// Set for remote recipes.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub base_url: String,
    pub cache_ttl: Duration,
    pub cache_dir: PathBuf,
    pub github_api: String,
    pub github_repo: String,
    pub github_dir: String,
}

impl FetcherOptions {
    /// Options from config; `base_url_override` (e.g. a CLI flag) wins over
    /// the configured catalog URL. A zero TTL means the default hour.
    pub fn from_config(cfg: &RecipesConfig, base_url_override: Option<&str>) -> Self {
        let base_url = base_url_override
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(&cfg.base_url)
            .to_string();

        Self {
            base_url,
            cache_ttl: match cfg.cache_ttl_secs {
                0 => DEFAULT_CACHE_TTL,
                secs => Duration::from_secs(secs),
            },
            cache_dir: default_cache_dir(),
            github_api: GITHUB_API_BASE.to_string(),
            github_repo: cfg.github_repo.clone(),
            github_dir: cfg.github_dir.clone(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gemflows")
        .join("recipes")
}

pub struct RecipeFetcher {
    client: Client,
    opts: FetcherOptions,
}

impl RecipeFetcher {
    pub fn new(opts: FetcherOptions) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("gemflows/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, opts })
    }

    /// Load a recipe by local path or catalog name.
    ///
    /// An existing local file is read directly. Anything else is fetched from
    /// the catalog; a fresh cache entry short-circuits the request, and a
    /// cached copy of any age is used when the catalog cannot be reached.
    pub async fn get(&self, name_or_path: &str) -> anyhow::Result<RecipeFetch> {
        let name_or_path = name_or_path.trim();
        if name_or_path.is_empty() {
            anyhow::bail!("recipe name or path is required");
        }

        if tokio::fs::metadata(name_or_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            let data = tokio::fs::read_to_string(name_or_path)
                .await
                .with_context(|| format!("read local recipe {}", name_or_path))?;
            return Ok(RecipeFetch {
                data,
                source: RecipeSource::LocalDev,
                recipe_name: name_or_path.to_string(),
                url: None,
            });
        }

        let mut base = self.opts.base_url.trim().to_string();
        if base.is_empty() {
            anyhow::bail!("remote recipes are not configured: set GEMFLOWS_RECIPES_BASE_URL");
        }
        if !base.ends_with('/') {
            base.push('/');
        }

        let recipe_path = normalize_recipe_path(name_or_path);
        let url = format!("{}{}", base, recipe_path);
        let recipe_name = strip_yaml_ext(&recipe_path)
            .unwrap_or(&recipe_path)
            .to_string();
        let remote = |data: String| RecipeFetch {
            data,
            source: RecipeSource::Remote,
            recipe_name: recipe_name.clone(),
            url: Some(url.clone()),
        };

        let cache_path = self.cache_path(&url);
        if let Some(data) = read_cache(&cache_path, Some(self.opts.cache_ttl)).await {
            tracing::debug!(url = %url, "Recipe served from cache");
            return Ok(remote(data));
        }

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                if let Some(data) = read_cache(&cache_path, None).await {
                    tracing::warn!(url = %url, error = %e, "Catalog unreachable, using cached recipe");
                    return Ok(remote(data));
                }
                return Err(anyhow::Error::from(e).context("fetch remote recipe"));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            if let Some(data) = read_cache(&cache_path, None).await {
                tracing::warn!(url = %url, status = %status, "Catalog error, using cached recipe");
                return Ok(remote(data));
            }
            anyhow::bail!(
                "recipe not found in catalog (HTTP {}): {}",
                status.as_u16(),
                url
            );
        }

        let data = response.text().await.context("read remote recipe")?;
        if let Err(e) = write_cache(&cache_path, &data).await {
            tracing::debug!(path = %cache_path.display(), error = %e, "Failed to cache recipe");
        }
        Ok(remote(data))
    }

    /// Recipe keys available in the catalog's GitHub directory at `git_ref`.
    pub async fn list_remote_keys(&self, git_ref: &str) -> anyhow::Result<Vec<String>> {
        let git_ref = match git_ref.trim() {
            "" => "main",
            r => r,
        };
        let url = format!(
            "{}/repos/{}/contents/{}",
            self.opts.github_api.trim_end_matches('/'),
            self.opts.github_repo,
            self.opts.github_dir
        );

        let response = self
            .client
            .get(&url)
            .query(&[("ref", git_ref)])
            .send()
            .await
            .context("list remote recipes")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "list remote recipes failed (HTTP {}): {}",
                status.as_u16(),
                body.trim()
            );
        }

        #[derive(Deserialize)]
        struct Entry {
            name: String,
            #[serde(rename = "type")]
            kind: String,
        }

        let entries: Vec<Entry> = response.json().await?;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for entry in entries.iter().filter(|e| e.kind == "file") {
            let Some(key) = strip_yaml_ext(&entry.name) else {
                continue;
            };
            if !key.is_empty() && seen.insert(key.to_string()) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.opts.cache_dir.join(format!("{:x}.yaml", digest))
    }
}

/// Catalog path for a recipe name: leading `/` removed, `.yaml` appended
/// unless a YAML extension is already present.
pub fn normalize_recipe_path(name: &str) -> String {
    let name = name.trim().trim_start_matches('/');
    if strip_yaml_ext(name).is_some() {
        name.to_string()
    } else {
        format!("{}.yaml", name)
    }
}

/// Read a cache entry. With `ttl`, entries older than the TTL are ignored.
async fn read_cache(path: &Path, ttl: Option<Duration>) -> Option<String> {
    if let Some(ttl) = ttl {
        let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
        if modified.elapsed().map(|age| age > ttl).unwrap_or(false) {
            return None;
        }
    }
    tokio::fs::read_to_string(path).await.ok()
}

async fn write_cache(path: &Path, data: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await
}
