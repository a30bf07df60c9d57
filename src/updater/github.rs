use super::{DownloadedUpdate, ProgressCallback, UpdateInfo, UpdateSource};
use crate::constants::{GITHUB_API_BASE, HTTP_TIMEOUT_SECONDS, REPO_NAME, REPO_OWNER};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use semver::Version;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Directories below the unpack root that are searched for the executable.
const MAX_ARCHIVE_DEPTH: usize = 3;

#[derive(Debug, Clone, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

/// Naming of published release archives and of the executable inside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    pub binary_name: String,
    /// Trailing part of the asset name for this platform, e.g. `linux-x86_64.tar.gz`.
    pub asset_suffix: String,
}

impl ReleaseLayout {
    pub fn new(binary_name: impl Into<String>, asset_suffix: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            asset_suffix: asset_suffix.into(),
        }
    }

    pub fn for_current_platform(binary_name: impl Into<String>) -> Self {
        Self::new(binary_name, platform_suffix())
    }

    pub fn executable_name(&self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.exe", self.binary_name)
        } else {
            self.binary_name.clone()
        }
    }

    fn backup_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(format!("{}.backup", self.executable_name()))
    }

    fn staging_dir(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(format!(".{}-update", self.binary_name))
    }

    /// Assets named after the binary win over any other asset for the platform.
    fn select_asset<'a>(&self, assets: &'a [GitHubAsset]) -> Option<&'a GitHubAsset> {
        let for_platform = |asset: &&GitHubAsset| asset.name.ends_with(&self.asset_suffix);
        assets
            .iter()
            .filter(for_platform)
            .find(|asset| asset.name.starts_with(&self.binary_name))
            .or_else(|| assets.iter().find(for_platform))
    }

    /// Breadth-first, so the shallowest match wins.
    async fn locate_binary(&self, root: &Path) -> Result<PathBuf> {
        let wanted = self.executable_name();
        let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);

        while let Some((dir, depth)) = queue.pop_front() {
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if depth < MAX_ARCHIVE_DEPTH {
                        queue.push_back((path, depth + 1));
                    }
                } else if entry.file_name().to_str() == Some(wanted.as_str()) {
                    return Ok(path);
                }
            }
        }

        Err(anyhow!("The update archive does not contain {}", wanted))
    }
}

/// Release feed backed by the GitHub "latest release" endpoint.
pub struct GitHubReleaseSource {
    current_version: Version,
    feed_url: String,
    layout: ReleaseLayout,
    client: reqwest::Client,
}

impl GitHubReleaseSource {
    pub fn new(
        current_version: &str,
        feed_url: Option<String>,
        layout: ReleaseLayout,
    ) -> Result<Self> {
        let version = Version::parse(current_version)
            .map_err(|e| anyhow!("Invalid version format: {}", e))?;

        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", layout.binary_name, current_version))
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            current_version: version,
            feed_url: feed_url.unwrap_or_else(Self::default_feed_url),
            layout,
            client,
        })
    }

    pub fn default_feed_url() -> String {
        format!(
            "{}/{}/{}/releases/latest",
            GITHUB_API_BASE, REPO_OWNER, REPO_NAME
        )
    }

    fn evaluate(&self, release: GitHubRelease) -> Result<Option<UpdateInfo>> {
        // Drafts and prereleases are never offered
        if release.draft || release.prerelease {
            info!("Latest release {} is not final, ignoring", release.tag_name);
            return Ok(None);
        }

        let latest_version_str = release
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&release.tag_name);
        let latest_version = Version::parse(latest_version_str)
            .map_err(|e| anyhow!("Invalid latest version format: {}", e))?;

        if latest_version <= self.current_version {
            return Ok(None);
        }

        let asset = self.layout.select_asset(&release.assets).ok_or_else(|| {
            anyhow!("No asset found for current platform: {}", self.layout.asset_suffix)
        })?;

        Ok(Some(UpdateInfo {
            current_version: self.current_version.to_string(),
            latest_version: latest_version.to_string(),
            download_url: asset.browser_download_url.clone(),
            release_notes: release.body.unwrap_or_default(),
        }))
    }

    /// Unpacks `archive` into a fresh `staging` directory.
    async fn unpack(&self, archive: &Path, staging: &Path) -> Result<()> {
        if staging.exists() {
            fs::remove_dir_all(staging).await.ok();
        }
        fs::create_dir_all(staging)
            .await
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let mut command = if cfg!(target_os = "windows") {
            let mut command = Command::new("powershell");
            command.args(["-NoProfile", "-NonInteractive", "-Command"]).arg(format!(
                "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
                archive.display(),
                staging.display()
            ));
            command
        } else {
            let mut command = Command::new("tar");
            command.arg("-xzf").arg(archive).arg("-C").arg(staging);
            command
        };

        let output = command
            .output()
            .await
            .context("Failed to run the archive extractor")?;
        if !output.status.success() {
            fs::remove_dir_all(staging).await.ok();
            return Err(anyhow!(
                "Archive extraction failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    /// Swaps the new executable in through a rename, which is safe while the old one runs.
    #[cfg(not(target_os = "windows"))]
    async fn replace_binary(&self, staged: &Path, current_exe: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let incoming = current_exe.with_extension("incoming");
        fs::copy(staged, &incoming)
            .await
            .context("Failed to stage the new executable")?;
        fs::set_permissions(&incoming, std::fs::Permissions::from_mode(0o755))
            .await
            .context("Failed to mark the new executable as runnable")?;
        fs::rename(&incoming, current_exe)
            .await
            .context("Failed to replace the executable")?;
        Ok(())
    }

    /// A running executable cannot be overwritten on Windows. A detached script waits for this
    /// process to exit, copies the staged binary over it and starts it again.
    #[cfg(target_os = "windows")]
    async fn replace_binary(&self, staged: &Path, current_exe: &Path) -> Result<()> {
        let install_dir = current_exe
            .parent()
            .ok_or_else(|| anyhow!("Failed to get current directory"))?;
        let script_path = install_dir.join(format!("{}-update.bat", self.layout.binary_name));
        let script = format!(
            "@echo off\r\n\
             timeout /t 2 /nobreak >nul\r\n\
             copy /Y \"{staged}\" \"{target}\"\r\n\
             rmdir /S /Q \"{staging}\"\r\n\
             start \"\" \"{target}\"\r\n\
             del \"%~f0\"\r\n",
            staged = staged.display(),
            target = current_exe.display(),
            staging = self.layout.staging_dir(install_dir).display(),
        );

        fs::write(&script_path, script)
            .await
            .context("Failed to write the update script")?;
        std::process::Command::new("cmd")
            .arg("/C")
            .arg(&script_path)
            .spawn()
            .context("Failed to launch the update script")?;
        Ok(())
    }
}

#[async_trait]
impl UpdateSource for GitHubReleaseSource {
    async fn check(&self) -> Result<Option<UpdateInfo>> {
        info!("Checking for updates at {}", self.feed_url);

        let response = self
            .client
            .get(&self.feed_url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch release info: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Release feed request failed: {}", response.status()));
        }

        let release: GitHubRelease = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse release info: {}", e))?;

        self.evaluate(release)
    }

    async fn download(
        &self,
        info: &UpdateInfo,
        progress: ProgressCallback,
    ) -> Result<DownloadedUpdate> {
        info!("Starting update download from: {}", info.download_url);

        let response = self
            .client
            .get(&info.download_url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to start download: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Download failed: {}", response.status()));
        }

        let total_size = response.content_length().unwrap_or(0);
        let mut downloaded = 0u64;

        let archive = NamedTempFile::new()
            .map_err(|e| anyhow!("Failed to create temp file: {}", e))?
            .into_temp_path();
        let mut file = fs::File::create(&archive)
            .await
            .map_err(|e| anyhow!("Failed to create download file: {}", e))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| anyhow!("Download chunk error: {}", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| anyhow!("Failed to write chunk: {}", e))?;

            downloaded += chunk.len() as u64;
            if total_size > 0 {
                progress((downloaded as f32 / total_size as f32) * 100.0);
            }
        }

        file.flush()
            .await
            .map_err(|e| anyhow!("Failed to flush file: {}", e))?;
        drop(file);
        progress(100.0);

        info!("Downloaded {} bytes", downloaded);
        Ok(DownloadedUpdate {
            info: info.clone(),
            archive,
        })
    }

    async fn install(&self, update: DownloadedUpdate) -> Result<()> {
        let current_exe =
            std::env::current_exe().context("Failed to get current executable path")?;
        let install_dir = current_exe
            .parent()
            .ok_or_else(|| anyhow!("Failed to get current directory"))?;

        let backup_path = self.layout.backup_path(install_dir);
        fs::copy(&current_exe, &backup_path)
            .await
            .with_context(|| format!("Failed to back up to {}", backup_path.display()))?;

        info!("Installing version {}", update.info.latest_version);
        let staging = self.layout.staging_dir(install_dir);
        self.unpack(&update.archive, &staging).await?;

        let staged = self.layout.locate_binary(&staging).await?;
        debug!("Found new executable at {}", staged.display());
        self.replace_binary(&staged, &current_exe).await?;

        // On Windows the update script still needs the staged copy
        #[cfg(not(target_os = "windows"))]
        fs::remove_dir_all(&staging).await.ok();
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        #[cfg(not(target_os = "windows"))]
        {
            let current_exe = std::env::current_exe()
                .map_err(|e| anyhow!("Failed to get current executable path: {}", e))?;
            std::process::Command::new(current_exe)
                .args(std::env::args_os().skip(1))
                .spawn()
                .map_err(|e| anyhow!("Failed to relaunch: {}", e))?;
        }

        info!("Exiting to complete update");
        std::process::exit(0);
    }
}

fn platform_suffix() -> &'static str {
    #[cfg(target_os = "windows")]
    return "windows-x86_64.zip";

    #[cfg(target_os = "macos")]
    return "macos-aarch64.tar.gz";

    #[cfg(target_os = "linux")]
    return "linux-x86_64.tar.gz";

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    return "unknown";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout() -> ReleaseLayout {
        ReleaseLayout::new("sheetshell", "linux-x86_64.tar.gz")
    }

    fn source(version: &str) -> GitHubReleaseSource {
        GitHubReleaseSource::new(version, None, layout()).unwrap()
    }

    fn asset(name: &str, url: &str) -> serde_json::Value {
        json!({ "name": name, "browser_download_url": url })
    }

    fn release(tag: &str, draft: bool, prerelease: bool) -> GitHubRelease {
        serde_json::from_value(json!({
            "tag_name": tag,
            "body": "Fixes",
            "draft": draft,
            "prerelease": prerelease,
            "assets": [
                asset("sheetshell-linux-x86_64.tar.gz", "https://example.invalid/pkg"),
                asset("checksums.txt", "https://example.invalid/sums"),
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(source("1.0.0").current_version, Version::new(1, 0, 0));
        assert!(GitHubReleaseSource::new("not-a-version", None, layout()).is_err());
    }

    #[test]
    fn test_feed_override() {
        let feed = Some("http://localhost/feed".to_string());
        let source = GitHubReleaseSource::new("1.0.0", feed, layout()).unwrap();
        assert_eq!(source.feed_url, "http://localhost/feed");
        assert!(GitHubReleaseSource::default_feed_url().ends_with("/releases/latest"));
    }

    #[test]
    fn newer_release_is_offered() {
        let info = source("1.0.0")
            .evaluate(release("v1.2.0", false, false))
            .unwrap()
            .unwrap();

        assert_eq!(info.current_version, "1.0.0");
        assert_eq!(info.latest_version, "1.2.0");
        assert_eq!(info.download_url, "https://example.invalid/pkg");
        assert_eq!(info.release_notes, "Fixes");
    }

    #[test]
    fn same_or_older_release_is_not_offered() {
        let source = source("1.2.0");

        assert_eq!(source.evaluate(release("1.2.0", false, false)).unwrap(), None);
        assert_eq!(source.evaluate(release("v1.1.9", false, false)).unwrap(), None);
    }

    #[test]
    fn drafts_and_prereleases_are_skipped() {
        let source = source("1.0.0");

        assert_eq!(source.evaluate(release("v2.0.0", true, false)).unwrap(), None);
        assert_eq!(source.evaluate(release("v2.0.0", false, true)).unwrap(), None);
    }

    #[test]
    fn missing_platform_asset_is_an_error() {
        let mut release = release("v2.0.0", false, false);
        release.assets.retain(|asset| asset.name == "checksums.txt");

        assert!(source("1.0.0").evaluate(release).is_err());
    }

    #[test]
    fn asset_named_after_the_binary_is_preferred() {
        let assets: Vec<GitHubAsset> = serde_json::from_value(json!([
            asset("debug-symbols-linux-x86_64.tar.gz", "https://example.invalid/dbg"),
            asset("sheetshell-2.0.0-linux-x86_64.tar.gz", "https://example.invalid/app"),
        ]))
        .unwrap();

        let chosen = layout().select_asset(&assets).unwrap();
        assert_eq!(chosen.browser_download_url, "https://example.invalid/app");

        let other = ReleaseLayout::new("sheetshell", "macos-aarch64.tar.gz");
        assert!(other.select_asset(&assets).is_none());
    }

    #[test]
    fn install_paths_follow_the_binary_name() {
        let layout = ReleaseLayout::new("tabulate", "linux-x86_64.tar.gz");
        let dir = Path::new("/opt/tabulate");

        assert_eq!(layout.staging_dir(dir), dir.join(".tabulate-update"));
        assert_eq!(
            layout.backup_path(dir),
            dir.join(format!("{}.backup", layout.executable_name()))
        );
    }

    #[tokio::test]
    async fn binary_is_found_below_a_versioned_directory() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout();
        let bin_dir = root.path().join("sheetshell-2.0.0").join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(root.path().join("README.txt"), "notes").unwrap();
        std::fs::write(bin_dir.join(layout.executable_name()), "new build").unwrap();

        let found = layout.locate_binary(root.path()).await.unwrap();

        assert_eq!(found, bin_dir.join(layout.executable_name()));
    }

    #[tokio::test]
    async fn directory_named_like_the_binary_is_not_a_match() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout();
        std::fs::create_dir(root.path().join(layout.executable_name())).unwrap();

        let err = layout.locate_binary(root.path()).await.unwrap_err();

        assert!(err.to_string().contains("does not contain"));
    }

    #[tokio::test]
    async fn binary_too_deep_is_not_searched() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout();
        let deep = root.path().join("a").join("b").join("c").join("d");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join(layout.executable_name()), "new build").unwrap();

        assert!(layout.locate_binary(root.path()).await.is_err());
    }
}
