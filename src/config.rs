use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::Rotation;

/// Fixed number of camera positions on the kiosk.
pub const SLOT_COUNT: usize = 5;

const DEFAULT_STORAGE_DIR: &str = "tmp";
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_URL_TEMPLATE: &str = "rtsp://{user}:{pass}@{host}:554/stream1";
const DEFAULT_LOCAL_DEVICE: &str = "/dev/video0";
const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FRAME_BUDGET: u32 = 15;
const DEFAULT_MAX_WORKERS: usize = 8;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GATE: &str = "2";
const DEFAULT_SCANNER: &str = "keyboard";
const DEFAULT_BAUD: u32 = 9600;

#[derive(Debug, Deserialize, Default)]
struct KioskConfigFile {
    storage: Option<StorageConfigFile>,
    cameras: Option<CamerasConfigFile>,
    upload: Option<UploadConfigFile>,
    scanner: Option<ScannerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    protocol: Option<String>,
    user: Option<String>,
    pass: Option<String>,
    url_template: Option<String>,
    local_device: Option<String>,
    snapshot_timeout_secs: Option<u64>,
    frame_budget: Option<u32>,
    max_workers: Option<usize>,
    slots: Option<Vec<SlotConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct SlotConfigFile {
    address: Option<String>,
    rotation: Option<u32>,
    protocol: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    server_url: Option<String>,
    timeout_secs: Option<u64>,
    gate: Option<String>,
    require_success_status: Option<bool>,
    on_reload: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ScannerConfigFile {
    source: Option<String>,
    baud: Option<u32>,
}

/// Capture protocol of a camera slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Single authenticated snapshot GET.
    Http,
    /// Decoding session on a stream URL.
    Rtsp,
}

impl Protocol {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "https" | "snapshot" => Ok(Self::Http),
            "rtsp" | "stream" => Ok(Self::Rtsp),
            other => Err(anyhow!("unknown camera protocol '{}'; expected http or rtsp", other)),
        }
    }
}

/// Where pallet codes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScannerSource {
    /// HID scanner typing into the controlling terminal.
    Keyboard,
    /// Serial (USB VCP / Bluetooth SPP) device path.
    Serial(PathBuf),
}

impl ScannerSource {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("keyboard") {
            Self::Keyboard
        } else {
            Self::Serial(PathBuf::from(trimmed))
        }
    }
}

/// What happens to queued uploads when the upload worker is rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadPolicy {
    Drain,
    Discard,
}

impl ReloadPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "discard" => Ok(Self::Discard),
            other => Err(anyhow!("upload.on_reload must be drain or discard (got '{}')", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub storage: StorageSettings,
    pub cameras: CameraSettings,
    pub upload: UploadSettings,
    pub scanner: ScannerSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub dir: PathBuf,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub protocol: Protocol,
    pub user: String,
    pub pass: String,
    pub url_template: String,
    pub local_device: String,
    pub snapshot_timeout: Duration,
    pub frame_budget: u32,
    pub max_workers: usize,
    /// Always `SLOT_COUNT` entries; unconfigured slots have an empty address.
    pub slots: Vec<SlotSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct SlotSettings {
    pub address: String,
    pub rotation: Rotation,
    /// Overrides `CameraSettings::protocol` for this slot.
    pub protocol: Option<Protocol>,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub server_url: String,
    pub timeout: Duration,
    pub gate: String,
    pub require_success_status: bool,
    pub on_reload: ReloadPolicy,
}

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub source: ScannerSource,
    pub baud: u32,
}

/// Immutable per-slot view taken at the start of a capture round.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSlotConfig {
    pub index: usize,
    pub protocol: Protocol,
    pub address: String,
    pub url_template: String,
    pub user: String,
    pub pass: String,
    pub rotation: Rotation,
    pub local_device: String,
    pub snapshot_timeout: Duration,
    pub frame_budget: u32,
}

impl KioskConfig {
    /// Built-in defaults, ignoring files and environment.
    pub fn from_defaults() -> Result<Self> {
        Self::from_file(KioskConfigFile::default())
    }

    /// Load from the file named by `KIOSK_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("KIOSK_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: KioskConfigFile) -> Result<Self> {
        let storage = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            dir: storage
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            jpeg_quality: storage.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let cams = file.cameras.unwrap_or_default();
        let protocol = match cams.protocol.as_deref() {
            Some(value) => Protocol::parse(value)?,
            None => Protocol::Rtsp,
        };
        let file_slots = cams.slots.unwrap_or_default();
        if file_slots.len() > SLOT_COUNT {
            return Err(anyhow!(
                "at most {} camera slots can be configured (got {})",
                SLOT_COUNT,
                file_slots.len()
            ));
        }
        let mut slots = Vec::with_capacity(SLOT_COUNT);
        for (index, slot) in file_slots.into_iter().enumerate() {
            let rotation = Rotation::from_degrees(slot.rotation.unwrap_or(0))
                .with_context(|| format!("camera slot {}", index))?;
            let protocol = slot
                .protocol
                .as_deref()
                .map(Protocol::parse)
                .transpose()
                .with_context(|| format!("camera slot {}", index))?;
            slots.push(SlotSettings {
                address: slot.address.unwrap_or_default(),
                rotation,
                protocol,
            });
        }
        slots.resize_with(SLOT_COUNT, SlotSettings::default);

        let cameras = CameraSettings {
            protocol,
            user: cams.user.unwrap_or_default(),
            pass: cams.pass.unwrap_or_default(),
            url_template: cams
                .url_template
                .unwrap_or_else(|| DEFAULT_URL_TEMPLATE.to_string()),
            local_device: cams
                .local_device
                .unwrap_or_else(|| DEFAULT_LOCAL_DEVICE.to_string()),
            snapshot_timeout: Duration::from_secs(
                cams.snapshot_timeout_secs
                    .unwrap_or(DEFAULT_SNAPSHOT_TIMEOUT_SECS),
            ),
            frame_budget: cams.frame_budget.unwrap_or(DEFAULT_FRAME_BUDGET),
            max_workers: cams.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            slots,
        };

        let upload = file.upload.unwrap_or_default();
        let upload = UploadSettings {
            server_url: upload.server_url.unwrap_or_default(),
            timeout: Duration::from_secs(upload.timeout_secs.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS)),
            gate: upload.gate.unwrap_or_else(|| DEFAULT_GATE.to_string()),
            require_success_status: upload.require_success_status.unwrap_or(false),
            on_reload: match upload.on_reload.as_deref() {
                Some(value) => ReloadPolicy::parse(value)?,
                None => ReloadPolicy::Drain,
            },
        };

        let scanner = file.scanner.unwrap_or_default();
        let scanner = ScannerSettings {
            source: ScannerSource::parse(scanner.source.as_deref().unwrap_or(DEFAULT_SCANNER)),
            baud: scanner.baud.unwrap_or(DEFAULT_BAUD),
        };

        Ok(Self {
            storage,
            cameras,
            upload,
            scanner,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("KIOSK_SERVER_URL") {
            if !url.trim().is_empty() {
                self.upload.server_url = url;
            }
        }
        if let Ok(timeout) = std::env::var("KIOSK_UPLOAD_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("KIOSK_UPLOAD_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.upload.timeout = Duration::from_secs(seconds);
        }
        if let Ok(scanner) = std::env::var("KIOSK_SCANNER") {
            if !scanner.trim().is_empty() {
                self.scanner.source = ScannerSource::parse(&scanner);
            }
        }
        if let Ok(user) = std::env::var("KIOSK_CAMERA_USER") {
            self.cameras.user = user;
        }
        if let Ok(pass) = std::env::var("KIOSK_CAMERA_PASS") {
            self.cameras.pass = pass;
        }
        if let Ok(dir) = std::env::var("KIOSK_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                self.storage.dir = PathBuf::from(dir);
            }
        }
        if let Ok(protocol) = std::env::var("KIOSK_PROTOCOL") {
            self.cameras.protocol = Protocol::parse(&protocol)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(1..=100).contains(&self.storage.jpeg_quality) {
            return Err(anyhow!(
                "storage.jpeg_quality must be within 1..=100 (got {})",
                self.storage.jpeg_quality
            ));
        }
        if self.cameras.frame_budget == 0 {
            return Err(anyhow!("cameras.frame_budget must be greater than zero"));
        }
        if self.cameras.max_workers == 0 {
            return Err(anyhow!("cameras.max_workers must be greater than zero"));
        }
        if self.cameras.snapshot_timeout.is_zero() {
            return Err(anyhow!("cameras.snapshot_timeout_secs must be greater than zero"));
        }
        if self.upload.timeout.is_zero() {
            return Err(anyhow!("upload.timeout_secs must be greater than zero"));
        }
        self.upload.server_url = self.upload.server_url.trim().to_string();
        if !self.upload.server_url.is_empty() {
            url::Url::parse(&self.upload.server_url)
                .with_context(|| format!("invalid upload.server_url '{}'", self.upload.server_url))?;
        }
        for slot in &mut self.cameras.slots {
            slot.address = slot.address.trim().to_string();
        }
        Ok(())
    }

    /// Per-slot snapshot for one capture round, in index order.
    pub fn slot_snapshot(&self) -> Vec<CameraSlotConfig> {
        let cams = &self.cameras;
        cams.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| CameraSlotConfig {
                index,
                protocol: slot.protocol.unwrap_or(cams.protocol),
                address: slot.address.clone(),
                url_template: cams.url_template.clone(),
                user: cams.user.clone(),
                pass: cams.pass.clone(),
                rotation: slot.rotation,
                local_device: cams.local_device.clone(),
                snapshot_timeout: cams.snapshot_timeout,
                frame_budget: cams.frame_budget,
            })
            .collect()
    }

    pub fn uploads_enabled(&self) -> bool {
        !self.upload.server_url.is_empty()
    }
}

fn read_config_file(path: &Path) -> Result<KioskConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_all_five_slots() -> Result<()> {
        let cfg = KioskConfig::from_defaults()?;
        assert_eq!(cfg.cameras.slots.len(), SLOT_COUNT);
        assert_eq!(cfg.storage.dir, PathBuf::from("tmp"));
        assert_eq!(cfg.storage.jpeg_quality, 85);
        assert_eq!(cfg.cameras.snapshot_timeout, Duration::from_secs(5));
        assert_eq!(cfg.scanner.source, ScannerSource::Keyboard);
        assert_eq!(cfg.scanner.baud, 9600);
        assert!(!cfg.uploads_enabled());
        Ok(())
    }

    #[test]
    fn slot_protocol_overrides_global() -> Result<()> {
        let file: KioskConfigFile = serde_json::from_str(
            r#"{"cameras": {"protocol": "http", "slots": [
                {"address": "10.0.0.5"},
                {"address": "10.0.0.6", "protocol": "rtsp", "rotation": 90}
            ]}}"#,
        )?;
        let cfg = KioskConfig::from_file(file)?;
        let slots = cfg.slot_snapshot();
        assert_eq!(slots[0].protocol, Protocol::Http);
        assert_eq!(slots[1].protocol, Protocol::Rtsp);
        assert_eq!(slots[1].rotation, Rotation::Cw90);
        assert_eq!(slots[4].address, "");
        Ok(())
    }

    #[test]
    fn rejects_more_than_five_slots_and_odd_rotations() -> Result<()> {
        let six: KioskConfigFile =
            serde_json::from_str(r#"{"cameras": {"slots": [{}, {}, {}, {}, {}, {}]}}"#)?;
        assert!(KioskConfig::from_file(six).is_err());

        let skewed: KioskConfigFile =
            serde_json::from_str(r#"{"cameras": {"slots": [{"rotation": 45}]}}"#)?;
        assert!(KioskConfig::from_file(skewed).is_err());
        Ok(())
    }

    #[test]
    fn scanner_source_parsing() {
        assert_eq!(ScannerSource::parse("KEYBOARD"), ScannerSource::Keyboard);
        assert_eq!(
            ScannerSource::parse("/dev/ttyUSB0"),
            ScannerSource::Serial(PathBuf::from("/dev/ttyUSB0"))
        );
    }
}
