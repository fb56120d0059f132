use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;
use toml::Value;

use tetra_protocol::transport::serial::DEFAULT_BAUD_RATE;
use tetra_protocol::{
    AckMode, ClassifierConfig, Command, CompactCalibration, DeviceId, EngineConfig,
    RetryPolicy, TriggerRule,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unrecognized fields in {section}: {fields:?}")]
    UnknownFields { section: String, fields: Vec<String> },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One configured terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// Serial port. When absent the port is found by the terminal's ISSI.
    pub port: Option<String>,
    pub issi: Option<String>,
    pub ack: AckMode,
    /// Send the init sequence after connecting.
    pub init: bool,
    /// Replaces the default init sequence when non-empty.
    pub init_commands: Vec<String>,
    /// Enable all TNP1 service profiles after connecting.
    pub tnp1_profiles: bool,
    pub poll_signal: bool,
    pub poll_gps: bool,
}

impl DeviceConfig {
    /// Commands sent once after the terminal is connected.
    pub fn startup_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.init {
            commands.push(Command::Init(self.init_commands.clone()));
        }
        if self.tnp1_profiles {
            commands.push(Command::EnableTnp1Profiles);
        }
        commands
    }
}

/// Everything read from the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub baud_rate: u32,
    pub engine: EngineConfig,
    pub devices: Vec<DeviceConfig>,
    pub triggers: Vec<TriggerRule>,
    /// Automation name to AT commands.
    pub profiles: HashMap<String, Vec<String>>,
}

impl AppConfig {
    pub fn device(&self, id: DeviceId) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }
}

/// Build an `AppConfig` from a TOML string.
pub fn from_toml_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let root: ConfigRoot = toml::from_str(toml_str)?;

    check_extra("top level", &root.extra)?;
    if let Some(engine) = &root.engine {
        check_extra("engine", &engine.extra)?;
    }
    for (i, device) in root.devices.iter().enumerate() {
        check_extra(&format!("devices[{i}]"), &device.extra)?;
    }
    for (i, trigger) in root.triggers.iter().enumerate() {
        check_extra(&format!("triggers[{i}]"), &trigger.extra)?;
    }

    let mut engine = EngineConfig::default();
    if let Some(dto) = root.engine {
        apply_engine_patch(&mut engine, dto)?;
    }

    let mut seen = HashSet::new();
    let mut devices = Vec::with_capacity(root.devices.len());
    for dto in root.devices {
        if !seen.insert(dto.id) {
            return Err(ConfigError::Invalid(format!("duplicate device id {}", dto.id)));
        }
        if let Some(issi) = &dto.issi
            && (issi.is_empty() || !issi.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(ConfigError::Invalid(format!(
                "device {}: issi {issi:?} must be digits only",
                dto.id
            )));
        }
        if dto.port.is_none() && dto.issi.is_none() {
            return Err(ConfigError::Invalid(format!(
                "device {} needs a port or an issi",
                dto.id
            )));
        }
        devices.push(DeviceConfig {
            id: DeviceId(dto.id),
            port: dto.port,
            issi: dto.issi,
            ack: dto.ack.unwrap_or_default().into(),
            init: dto.init.unwrap_or(false),
            init_commands: dto.init_commands.unwrap_or_default(),
            tnp1_profiles: dto.tnp1_profiles.unwrap_or(false),
            poll_signal: dto.poll_signal.unwrap_or(false),
            poll_gps: dto.poll_gps.unwrap_or(false),
        });
    }

    let profiles = root.profiles.unwrap_or_default();
    let mut triggers = Vec::with_capacity(root.triggers.len());
    for (i, dto) in root.triggers.into_iter().enumerate() {
        triggers.push(build_trigger(i, dto, &profiles, &seen)?);
    }

    Ok(AppConfig {
        baud_rate: root.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
        engine,
        devices,
        triggers,
        profiles,
    })
}

/// Build an `AppConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<AppConfig, ConfigError> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build an `AppConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let f = File::open(path)?;
    from_reader(f)
}

/// Upper bound for `engine.max_retries`.
const MAX_RETRIES_LIMIT: u8 = 10;

fn apply_engine_patch(dst: &mut EngineConfig, src: EngineDto) -> Result<(), ConfigError> {
    let classifier = ClassifierConfig::default();
    let text_threshold = src.text_threshold.unwrap_or(classifier.text_threshold);
    if !(0.0..=1.0).contains(&text_threshold) {
        return Err(ConfigError::Invalid(format!(
            "engine.text_threshold {text_threshold} is outside 0..=1"
        )));
    }
    dst.classifier = ClassifierConfig {
        text_threshold,
        compact: CompactCalibration {
            lat_offset: src
                .compact_lat_offset
                .unwrap_or(classifier.compact.lat_offset),
            lon_offset: src
                .compact_lon_offset
                .unwrap_or(classifier.compact.lon_offset),
        },
    };

    let retry = RetryPolicy::default();
    let max_retries = src.max_retries.unwrap_or(retry.max_retries);
    if max_retries > MAX_RETRIES_LIMIT {
        return Err(ConfigError::Invalid(format!(
            "engine.max_retries {max_retries} is above {MAX_RETRIES_LIMIT}"
        )));
    }
    dst.retry = RetryPolicy {
        max_retries,
        delay: src
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(retry.delay),
    };

    if let Some(talk_groups) = src.talk_groups {
        dst.known_talk_groups = talk_groups;
    }
    Ok(())
}

fn build_trigger(
    index: usize,
    dto: TriggerDto,
    profiles: &HashMap<String, Vec<String>>,
    devices: &HashSet<u8>,
) -> Result<TriggerRule, ConfigError> {
    let empty = |s: &Option<String>| s.as_deref().is_none_or(str::is_empty);
    if empty(&dto.status) && empty(&dto.text) {
        return Err(ConfigError::Invalid(format!(
            "triggers[{index}] needs a status or a text"
        )));
    }
    if !profiles.contains_key(&dto.automation) {
        return Err(ConfigError::Invalid(format!(
            "triggers[{index}] refers to unknown profile {:?}",
            dto.automation
        )));
    }
    let source_device = dto.source_device.unwrap_or(1);
    let target_device = dto.target_device.unwrap_or(1);
    for id in [source_device, target_device] {
        if !devices.is_empty() && !devices.contains(&id) {
            warn!("triggers[{index}] refers to unconfigured device {id}");
        }
    }
    Ok(TriggerRule {
        status: dto.status,
        text: dto.text,
        issis: dto.issis.unwrap_or_default(),
        source_device: DeviceId(source_device),
        automation: dto.automation,
        target_device: DeviceId(target_device),
    })
}

fn check_extra(section: &str, extra: &HashMap<String, Value>) -> Result<(), ConfigError> {
    if extra.is_empty() {
        return Ok(());
    }
    Err(ConfigError::UnknownFields {
        section: section.to_string(),
        fields: sorted_keys(extra),
    })
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<String> {
    let mut v: Vec<String> = map.keys().cloned().collect();
    v.sort_unstable();
    v
}

/// Reloads the config file when its modification time changes.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Interval at which the file is checked.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let modified = modified_time(&path);
        Self { path, modified }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the freshly loaded config if the file changed since the last
    /// call, `None` otherwise. A failed load is reported once per change.
    pub fn poll(&mut self) -> Option<Result<AppConfig, ConfigError>> {
        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.modified {
            return None;
        }
        debug!("{} changed, reloading", self.path.display());
        self.modified = modified;
        Some(from_file(&self.path))
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// ----------------------- DTOs for input shape -----------------------

#[derive(Deserialize)]
struct ConfigRoot {
    baud_rate: Option<u32>,

    #[serde(default)]
    engine: Option<EngineDto>,

    #[serde(default)]
    devices: Vec<DeviceDto>,

    #[serde(default)]
    triggers: Vec<TriggerDto>,

    #[serde(default)]
    profiles: Option<HashMap<String, Vec<String>>>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct EngineDto {
    text_threshold: Option<f64>,
    compact_lat_offset: Option<f64>,
    compact_lon_offset: Option<f64>,
    retry_delay_ms: Option<u64>,
    max_retries: Option<u8>,
    talk_groups: Option<Vec<String>>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct DeviceDto {
    id: u8,
    port: Option<String>,
    issi: Option<String>,
    ack: Option<AckModeDto>,
    init: Option<bool>,
    init_commands: Option<Vec<String>>,
    tnp1_profiles: Option<bool>,
    poll_signal: Option<bool>,
    poll_gps: Option<bool>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AckModeDto {
    #[default]
    None,
    Text,
    Status,
}

impl From<AckModeDto> for AckMode {
    fn from(dto: AckModeDto) -> Self {
        match dto {
            AckModeDto::None => AckMode::None,
            AckModeDto::Text => AckMode::Text,
            AckModeDto::Status => AckMode::Status,
        }
    }
}

#[derive(Deserialize)]
struct TriggerDto {
    status: Option<String>,
    text: Option<String>,
    issis: Option<Vec<String>>,
    source_device: Option<u8>,
    automation: String,
    target_device: Option<u8>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const EXAMPLE: &str = r#"
baud_rate = 38400

[engine]
text_threshold = 0.9
compact_lat_offset = 1.5
retry_delay_ms = 2500
max_retries = 1
talk_groups = ["262", "26200"]

[[devices]]
id = 1
port = "/dev/ttyUSB0"
ack = "text"
init = true
tnp1_profiles = true
poll_signal = true

[[devices]]
id = 2
issi = "2621234"
ack = "status"
init_commands = ["ATE0"]

[[triggers]]
status = "8002"
issis = ["1234567"]
automation = "alarm"
target_device = 2

[[triggers]]
text = "Hilfe"
source_device = 2
automation = "alarm"

[profiles]
alarm = ["AT+CTGS=1,262", "AT+CTSP=1,3,2"]
"#;

    #[test]
    fn test_full_example() {
        let cfg = from_toml_str(EXAMPLE).unwrap();
        assert_eq!(cfg.baud_rate, 38400);

        assert_eq!(cfg.engine.classifier.text_threshold, 0.9);
        assert_eq!(cfg.engine.classifier.compact.lat_offset, 1.5);
        assert_eq!(cfg.engine.classifier.compact.lon_offset, 43.044569);
        assert_eq!(cfg.engine.retry.delay, Duration::from_millis(2500));
        assert_eq!(cfg.engine.retry.max_retries, 1);
        assert_eq!(cfg.engine.known_talk_groups, ["262", "26200"]);

        let first = cfg.device(DeviceId(1)).unwrap();
        assert_eq!(first.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(first.ack, AckMode::Text);
        assert!(first.init && first.tnp1_profiles && first.poll_signal && !first.poll_gps);
        let second = cfg.device(DeviceId(2)).unwrap();
        assert_eq!(second.port, None);
        assert_eq!(second.ack, AckMode::Status);
        assert_eq!(second.init_commands, ["ATE0"]);
        assert!(!second.tnp1_profiles);
        assert_eq!(
            first.startup_commands(),
            vec![Command::Init(Vec::new()), Command::EnableTnp1Profiles]
        );
        assert!(second.startup_commands().is_empty());

        assert_eq!(cfg.triggers.len(), 2);
        assert_eq!(cfg.triggers[0].source_device, DeviceId(1));
        assert_eq!(cfg.triggers[0].target_device, DeviceId(2));
        assert_eq!(cfg.triggers[1].text.as_deref(), Some("Hilfe"));
        assert_eq!(cfg.triggers[1].target_device, DeviceId(1));
        assert_eq!(cfg.profiles["alarm"].len(), 2);
    }

    #[test]
    fn test_defaults() {
        let cfg = from_toml_str("").unwrap();
        assert_eq!(cfg.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(cfg.engine, EngineConfig::default());
        assert!(cfg.devices.is_empty() && cfg.triggers.is_empty() && cfg.profiles.is_empty());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = from_toml_str("bogus = 1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFields { ref section, .. } if section == "top level"));

        let err = from_toml_str("[[devices]]\nid = 1\nport = \"x\"\nbaud = 9600").unwrap_err();
        let ConfigError::UnknownFields { section, fields } = err else {
            panic!("expected unknown fields");
        };
        assert_eq!(section, "devices[0]");
        assert_eq!(fields, ["baud"]);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            from_toml_str("[engine]\ntext_threshold = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml_str("[[devices]]\nid = 1\nport = \"a\"\n[[devices]]\nid = 1\nport = \"b\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml_str("[[devices]]\nid = 1"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml_str("[engine]\nmax_retries = 255"),
            Err(ConfigError::Invalid(_))
        ));
        assert_eq!(
            from_toml_str("[engine]\nmax_retries = 10")
                .unwrap()
                .engine
                .retry
                .max_retries,
            10
        );
        assert!(matches!(
            from_toml_str("[[devices]]\nid = 1\nissi = \"1\u{e4}234567\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml_str("[[devices]]\nid = 1\nissi = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml_str("[[devices]]\nid = 1\nport = \"a\"\nack = \"loud\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_trigger_validation() {
        let no_match = "[[triggers]]\nautomation = \"a\"\n[profiles]\na = []";
        assert!(matches!(from_toml_str(no_match), Err(ConfigError::Invalid(_))));
        let unknown_profile = "[[triggers]]\nstatus = \"1\"\nautomation = \"missing\"";
        assert!(matches!(from_toml_str(unknown_profile), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_watcher_reloads_on_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "baud_rate = 9600").unwrap();
        let mut watcher = ConfigWatcher::new(file.path());
        assert!(watcher.poll().is_none());

        // Make sure the modification time moves even on coarse filesystems.
        let later = SystemTime::now() + Duration::from_secs(5);
        std::fs::write(file.path(), "baud_rate = 19200\n").unwrap();
        file.as_file().set_modified(later).unwrap();

        let cfg = watcher.poll().unwrap().unwrap();
        assert_eq!(cfg.baud_rate, 19200);
        assert!(watcher.poll().is_none());

        std::fs::write(file.path(), "baud_rate = \"fast\"\n").unwrap();
        file.as_file()
            .set_modified(later + Duration::from_secs(5))
            .unwrap();
        assert!(matches!(watcher.poll(), Some(Err(ConfigError::Parse(_)))));
        assert!(watcher.poll().is_none());
    }

    #[test]
    fn test_from_reader() {
        let cfg = from_reader(EXAMPLE.as_bytes()).unwrap();
        assert_eq!(cfg.devices.len(), 2);
    }

    #[test]
    fn test_shipped_example_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/tetraterm.example.toml");
        let cfg = from_file(path).unwrap();
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.engine.classifier.compact, CompactCalibration::default());
        assert!(cfg.profiles.contains_key("alarm"));
    }
}
