//! Package fetch strategies and the provisioner cache

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Source Detection
// ─────────────────────────────────────────────────────────────────

/// Recognized package source kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A git repository (git:// scheme)
    Git,
    /// A gzip-tar archive over HTTP(S)
    GzipArchive,
}

impl SourceKind {
    /// Classify a package URL, rejecting anything that is neither a git
    /// source nor a recognized archive.
    pub fn detect(url: &str) -> Result<SourceKind> {
        let parsed = Url::parse(url).map_err(|_| Error::UnsupportedSource {
            url: url.to_string(),
        })?;

        match parsed.scheme() {
            "git" => Ok(SourceKind::Git),
            "http" | "https"
                if parsed.path().ends_with(".tar.gz") || parsed.path().ends_with(".tgz") =>
            {
                Ok(SourceKind::GzipArchive)
            }
            _ => Err(Error::UnsupportedSource {
                url: url.to_string(),
            }),
        }
    }
}

/// Last path segment of a URL (repository or archive file name)
fn url_basename(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

// ─────────────────────────────────────────────────────────────────
// Artifact Provisioner
// ─────────────────────────────────────────────────────────────────

/// Fetches and caches problem definition packages.
///
/// The cache layout is `<cache_root>/<package_name>/` containing either a
/// cloned repository or a downloaded-and-extracted archive. Resolution is
/// idempotent: a second resolve of the same package updates in place and
/// returns the same local path.
pub struct ArtifactProvisioner {
    cache_root: PathBuf,
    http: reqwest::Client,
}

impl ArtifactProvisioner {
    /// Create a provisioner rooted at `cache_root`
    pub fn new(cache_root: impl Into<PathBuf>, download_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            cache_root: cache_root.into(),
            http,
        })
    }

    /// The injected cache root
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Resolve a package to its local problem definition directory.
    pub async fn resolve(&self, name: &str, url: &str) -> Result<PathBuf> {
        let kind = SourceKind::detect(url)?;

        let package_dir = self.cache_root.join(name);
        tokio::fs::create_dir_all(&package_dir)
            .await
            .map_err(|e| Error::fetch_failed(name, format!("cache directory: {}", e)))?;

        let path = match kind {
            SourceKind::Git => self.fetch_git(name, url, &package_dir).await?,
            SourceKind::GzipArchive => self.fetch_archive(name, url, &package_dir).await?,
        };

        info!(package = %name, path = %path.display(), "Package resolved");
        Ok(path)
    }

    /// Clone the repository on first resolution, pull on subsequent ones.
    async fn fetch_git(&self, name: &str, url: &str, package_dir: &Path) -> Result<PathBuf> {
        let local_dir = package_dir.join(url_basename(url));

        let local = local_dir.to_string_lossy();
        if local_dir.exists() {
            debug!(package = %name, dir = %local_dir.display(), "Updating existing clone");
            run_git(name, &["-C", &local, "pull"]).await?;
        } else {
            debug!(package = %name, url = %url, "Cloning repository");
            run_git(name, &["clone", url, &local]).await?;
        }

        Ok(local_dir)
    }

    /// Download the archive into the package directory, then extract it.
    async fn fetch_archive(&self, name: &str, url: &str, package_dir: &Path) -> Result<PathBuf> {
        let file_name = url_basename(url);
        let archive_path = package_dir.join(&file_name);

        debug!(package = %name, url = %url, "Downloading archive");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch_failed(name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::fetch_failed(
                name,
                format!("HTTP status {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::fetch_failed(name, e.to_string()))?;

        tokio::fs::write(&archive_path, &bytes)
            .await
            .map_err(|e| Error::fetch_failed(name, format!("write archive: {}", e)))?;

        extract_archive(name, &archive_path, package_dir).await
    }
}

/// Extract `<dir>/<stem>.tar.gz` into `<dir>/<stem>/`, overwriting any
/// previous extraction.
async fn extract_archive(name: &str, archive_path: &Path, package_dir: &Path) -> Result<PathBuf> {
    let stem = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.split('.').next().unwrap_or(n).to_string())
        .ok_or_else(|| Error::ExtractFailed {
            name: name.to_string(),
            message: "archive has no file name".to_string(),
        })?;

    let extract_dir = package_dir.join(stem);
    tokio::fs::create_dir_all(&extract_dir)
        .await
        .map_err(|e| Error::ExtractFailed {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    let output = Command::new("tar")
        .arg("-xzf")
        .arg(archive_path)
        .arg("-C")
        .arg(&extract_dir)
        .output()
        .await
        .map_err(|e| Error::ExtractFailed {
            name: name.to_string(),
            message: format!("failed to spawn tar: {}", e),
        })?;

    if !output.status.success() {
        return Err(Error::ExtractFailed {
            name: name.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(extract_dir)
}

/// Run a git subcommand, mapping failures to `FetchFailed`
async fn run_git(name: &str, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::fetch_failed(name, format!("failed to spawn git: {}", e)))?;

    if !output.status.success() {
        return Err(Error::fetch_failed(
            name,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
