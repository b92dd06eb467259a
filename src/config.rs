use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::camera::CameraDescriptor;
use crate::offline::WorkerSettings;

/// Application shell cached on install.
const DEFAULT_PRECACHE: &[&str] = &[
  "/",
  "/index.html",
  "/qr-scanner.js",
  "/qr-scanner.css",
  "https://cdnjs.cloudflare.com/ajax/libs/html5-qrcode/2.3.8/html5-qrcode.min.js",
  "/src/header.png",
  "/src/fm-main-fullscreen-hi.png",
  "/src/fm-next.png",
  "/src/fm-clear.png",
  "/src/fm-save.png",
  "/src/fm-add.png",
  "/src/fm-right.png",
  "/src/fm-trash.png",
  "/icons/icon-192.png",
  "/icons/icon-512.png",
  "/icons/icon-180.png",
  "/manifest.json",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub scanner: ScannerConfig,
  #[serde(default)]
  pub export: ExportConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
  /// Zoom applied when a stream starts, clamped to what the device supports
  pub zoom: f64,
  pub duplicate_notice_ms: u64,
  /// How long the "scanner stopped" warning stays up
  pub error_notice_ms: u64,
  /// Enables the flashlight key binding
  pub torch_control: bool,
  pub devices: Vec<DeviceConfig>,
  /// Also list entries of /dev/serial/by-id
  pub discover_serial: bool,
}

impl Default for ScannerConfig {
  fn default() -> Self {
    Self {
      zoom: 2.0,
      duplicate_notice_ms: 2000,
      error_notice_ms: 4000,
      torch_control: false,
      devices: Vec::new(),
      discover_serial: true,
    }
  }
}

impl ScannerConfig {
  pub fn duplicate_notice(&self) -> Duration {
    Duration::from_millis(self.duplicate_notice_ms)
  }

  pub fn error_notice(&self) -> Duration {
    Duration::from_millis(self.error_notice_ms)
  }

  pub fn camera_descriptors(&self) -> Vec<CameraDescriptor> {
    self
      .devices
      .iter()
      .map(|d| CameraDescriptor {
        id: d.id.clone(),
        label: d.label.clone().unwrap_or_else(|| d.id.clone()),
      })
      .collect()
  }

  pub fn discover_dir(&self) -> Option<PathBuf> {
    self
      .discover_serial
      .then(|| PathBuf::from("/dev/serial/by-id"))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
  /// Path of the device file
  pub id: String,
  pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
  /// Where manifests are written (defaults to the current directory)
  pub dir: Option<PathBuf>,
  pub success_notice_ms: u64,
}

impl Default for ExportConfig {
  fn default() -> Self {
    Self {
      dir: None,
      success_notice_ms: 3000,
    }
  }
}

impl ExportConfig {
  pub fn dir(&self) -> PathBuf {
    self.dir.clone().unwrap_or_else(|| PathBuf::from("."))
  }

  pub fn success_notice(&self) -> Duration {
    Duration::from_millis(self.success_notice_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Origin the precache paths are resolved against
  pub origin: String,
  pub precache_name: String,
  pub runtime_name: String,
  pub offline_fallback: Option<String>,
  pub skip_waiting_on_install: bool,
  /// SQLite file for the caches (defaults to the data directory)
  pub database: Option<PathBuf>,
  pub timeout_secs: u64,
  pub precache: Vec<String>,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      precache_name: "qr-scanner-v1".to_string(),
      runtime_name: "qr-scanner-runtime".to_string(),
      offline_fallback: Some("/offline.html".to_string()),
      skip_waiting_on_install: true,
      database: None,
      timeout_secs: 30,
      precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl OfflineConfig {
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid offline origin {}: {}", self.origin, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn worker_settings(&self) -> Result<WorkerSettings> {
    Ok(WorkerSettings {
      origin: self.origin_url()?,
      precache_name: self.precache_name.clone(),
      runtime_name: self.runtime_name.clone(),
      precache: self.precache.clone(),
      offline_fallback: self.offline_fallback.clone(),
      skip_waiting_on_install: self.skip_waiting_on_install,
    })
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qrscan.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qrscan/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("qrscan.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qrscan").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.scanner.zoom <= 0.0 {
      return Err(eyre!("scanner.zoom must be positive"));
    }
    Ok(config)
  }
}
