use std::fs::File;
use std::path::Path;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use crate::config::InstallConfig;
use crate::error::{GovmError, IoResultExt, Result};
use crate::version::Version;

/// A Go release as listed by the download catalog.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Release {
    /// The release name, e.g. `go1.22.0`.
    pub version: String,
    pub stable: bool,
    #[serde(default)]
    pub files: Vec<ReleaseFile>,
}

/// One downloadable file of a release.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReleaseFile {
    pub filename: String,
    pub os: String,
    pub arch: String,
    /// Hex-encoded SHA-256 of the file.
    pub sha256: String,
    pub size: u64,
    /// `archive`, `installer` or `source`.
    pub kind: String,
}

impl Release {
    /// The parsed version, or `None` for names this tool cannot manage.
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// The binary archive for a platform, e.g. (`linux`, `amd64`).
    pub fn archive_for(&self, os: &str, arch: &str) -> Option<&ReleaseFile> {
        self.files
            .iter()
            .find(|f| f.os == os && f.arch == arch && f.kind == "archive")
    }
}

/// Returns the current platform in Go's naming, e.g. (`darwin`, `arm64`).
pub fn current_platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        "linux" => "linux",
        "freebsd" => "freebsd",
        _ => "unknown",
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "armv6l",
        _ => "unknown",
    };
    (os, arch)
}

/// Where releases are listed and fetched from.
///
/// The installer only talks to this trait, so it can run against a mirror
/// or an in-process source.
pub trait ReleaseSource {
    /// Lists every release, newest first.
    fn catalog(&self) -> Result<Vec<Release>>;

    /// Writes the bytes of `file` to `dest`.
    ///
    /// Transient network failures are reported as [`GovmError::Download`];
    /// the caller decides whether to retry.
    fn fetch(&self, file: &ReleaseFile, dest: &Path) -> Result<()>;
}

/// The official catalog at `go.dev/dl`, or a mirror with the same layout.
#[derive(Debug, Clone)]
pub struct GoDevSource {
    client: Client,
    base_url: String,
}

impl GoDevSource {
    pub fn new(config: &InstallConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("govm/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GovmError::config("http client", e.to_string()))?;
        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    fn file_url(&self, file: &ReleaseFile) -> String {
        format!("{}{}", self.base_url, file.filename)
    }
}

impl ReleaseSource for GoDevSource {
    fn catalog(&self) -> Result<Vec<Release>> {
        let url = format!("{}?mode=json&include=all", self.base_url);
        debug!(%url, "fetching release catalog");
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(&url, e))?;
        response
            .json::<Vec<Release>>()
            .map_err(|e| download_error(&url, e))
    }

    fn fetch(&self, file: &ReleaseFile, dest: &Path) -> Result<()> {
        let url = self.file_url(file);
        debug!(%url, dest = %dest.display(), "downloading archive");
        let mut response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(&url, e))?;
        let mut out = File::create(dest).at(dest)?;
        response
            .copy_to(&mut out)
            .map_err(|e| download_error(&url, e))?;
        out.sync_all().at(dest)
    }
}

// A 4xx will not get better on retry, so it is reported as a bad request
// rather than a download failure.
fn download_error(url: &str, e: reqwest::Error) -> GovmError {
    match e.status() {
        Some(status) if status.is_client_error() => {
            GovmError::config(url, format!("server answered {}", status))
        }
        _ => GovmError::Download {
            url: url.to_string(),
            attempts: 1,
            message: e.to_string(),
        },
    }
}
