//! Download and unpack the Traefik release for this platform.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, info};

use super::ProxyError;

const RELEASES_URL: &str = "https://github.com/traefik/traefik/releases/download";

#[cfg(windows)]
pub const BINARY_NAME: &str = "traefik.exe";
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "traefik";

/// Release asset OS/arch names for the running platform.
pub fn platform_asset() -> Result<(&'static str, &'static str), ProxyError> {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        "linux" => "linux",
        "windows" => "windows",
        "freebsd" => "freebsd",
        other => {
            return Err(ProxyError::UnsupportedPlatform(format!(
                "{other}/{}",
                std::env::consts::ARCH
            )))
        }
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armv7",
        other => {
            return Err(ProxyError::UnsupportedPlatform(format!(
                "{}/{other}",
                std::env::consts::OS
            )))
        }
    };
    Ok((os, arch))
}

pub fn download_url(version: &str, os: &str, arch: &str) -> String {
    let ext = if os == "windows" { "zip" } else { "tar.gz" };
    format!("{RELEASES_URL}/{version}/traefik_{version}_{os}_{arch}.{ext}")
}

/// Download `version` and place the binary at `dest`.
pub async fn install(version: &str, dest: &Path) -> Result<(), ProxyError> {
    let (os, arch) = platform_asset()?;
    let url = download_url(version, os, arch);
    info!(version, %url, "downloading reverse proxy");

    let bytes = (|| fetch(&url))
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(3)
                .with_jitter(),
        )
        .when(is_transient)
        .notify(|err: &ProxyError, dur: Duration| {
            debug!("download failed: {}, retrying in {:?}", err, dur);
        })
        .await?;

    let is_zip = url.ends_with(".zip");
    let binary = tokio::task::spawn_blocking(move || {
        if is_zip {
            extract_from_zip(&bytes)
        } else {
            extract_from_tar_gz(&bytes)
        }
    })
    .await
    .map_err(|e| ProxyError::Archive(format!("extraction task failed: {e}")))??;

    write_executable(dest, &binary)?;
    info!(path = %dest.display(), "reverse proxy installed");
    Ok(())
}

async fn fetch(url: &str) -> Result<Vec<u8>, ProxyError> {
    let download_err = |source| ProxyError::Download {
        url: url.to_string(),
        source,
    };
    let response = reqwest::get(url).await.map_err(download_err)?;
    if !response.status().is_success() {
        return Err(ProxyError::DownloadStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let bytes = response.bytes().await.map_err(download_err)?;
    Ok(bytes.to_vec())
}

/// Network hiccups and server errors are worth another attempt; a 404 for
/// an unknown version is not.
fn is_transient(err: &ProxyError) -> bool {
    match err {
        ProxyError::Download { .. } => true,
        ProxyError::DownloadStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

fn is_binary_entry(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(BINARY_NAME)
}

pub fn extract_from_tar_gz(data: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let decoder = flate2::read::GzDecoder::new(data);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| ProxyError::Archive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ProxyError::Archive(e.to_string()))?;
        let is_binary = entry
            .path()
            .map(|p| is_binary_entry(&p))
            .unwrap_or(false);
        if is_binary {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| ProxyError::Archive(e.to_string()))?;
            return Ok(buf);
        }
    }
    Err(ProxyError::BinaryNotInArchive(BINARY_NAME))
}

#[cfg(windows)]
fn extract_from_zip(data: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let cursor = std::io::Cursor::new(data);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| ProxyError::Archive(e.to_string()))?;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ProxyError::Archive(e.to_string()))?;
        if file.enclosed_name().is_some_and(|p| is_binary_entry(&p)) {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| ProxyError::Archive(e.to_string()))?;
            return Ok(buf);
        }
    }
    Err(ProxyError::BinaryNotInArchive(BINARY_NAME))
}

#[cfg(not(windows))]
fn extract_from_zip(_data: &[u8]) -> Result<Vec<u8>, ProxyError> {
    Err(ProxyError::Archive(
        "zip releases are only used on windows".to_string(),
    ))
}

fn write_executable(dest: &Path, binary: &[u8]) -> Result<(), ProxyError> {
    let io_err = |source| ProxyError::Io {
        path: dest.to_path_buf(),
        source,
    };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = dest.with_extension("download");
    std::fs::write(&tmp, binary).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755)).map_err(io_err)?;
    }
    std::fs::rename(&tmp, dest).map_err(io_err)
}
