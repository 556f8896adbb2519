//! Node configuration: defaults, INI reading (`[easystorage]` section) and the JSON form the
//! engine receives on create.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};

/// Section of the INI file holding node settings. Other sections are ignored.
pub const INI_SECTION: &str = "easystorage";

pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_DISC_PORT: u16 = 8090;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const DEFAULT_NAT: &str = "auto";

/// Node settings. Serializes to the JSON document the engine's create primitive takes:
/// absent options are omitted and the bootstrap node is sent as a one-element list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    pub api_port: u16,
    pub disc_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Signed peer record of a node to bootstrap from.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "as_list"
    )]
    pub bootstrap_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat: Option<String>,
}

fn as_list<S: Serializer>(node: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(node.iter())
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            disc_port: DEFAULT_DISC_PORT,
            data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            bootstrap_node: None,
            nat: Some(DEFAULT_NAT.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: expected `[section]` or `key=value`")]
    Syntax { line: usize },
    #[error("line {line}: invalid value for `{key}`")]
    InvalidValue { line: usize, key: String },
}

impl NodeConfig {
    /// Defaults overlaid with the `[easystorage]` section of the file at `path`.
    pub fn read_ini(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_ini(BufReader::new(File::open(path)?))?;
        Ok(config)
    }

    /// Overlay recognised keys from INI text. Unrecognised keys and sections are skipped.
    pub fn apply_ini<R: BufRead>(&mut self, reader: R) -> Result<(), ConfigError> {
        let mut section = String::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = idx + 1;
            let text = strip_comment(&line).trim();
            if text.is_empty() {
                continue;
            }
            if let Some(rest) = text.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or(ConfigError::Syntax { line: lineno })?;
                section = name.trim().to_string();
                continue;
            }
            let split = text
                .find(['=', ':'])
                .ok_or(ConfigError::Syntax { line: lineno })?;
            let (key, value) = (&text[..split], &text[split + 1..]);
            if section == INI_SECTION {
                self.set(key.trim(), value.trim(), lineno)?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        let port = |v: &str| {
            v.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                line,
                key: key.to_string(),
            })
        };
        match key {
            "bootstrap-node" => self.bootstrap_node = Some(value.to_string()),
            "data-dir" => self.data_dir = Some(PathBuf::from(value)),
            "log-level" => self.log_level = Some(value.to_string()),
            "nat" => self.nat = Some(value.to_string()),
            "api-port" => self.api_port = port(value)?,
            "disc-port" => self.disc_port = port(value)?,
            _ => {}
        }
        Ok(())
    }

    /// JSON document passed to the engine's create primitive. Fails only for a data dir that
    /// is not valid UTF-8.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Drop full-line comments (`;` or `#`) and inline `;` comments preceded by whitespace.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with(';') || trimmed.starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b';' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_node() {
        let c = NodeConfig::default();
        assert_eq!(c.api_port, 8080);
        assert_eq!(c.disc_port, 8090);
        assert_eq!(c.data_dir.as_deref(), Some(Path::new("./data")));
        assert_eq!(c.log_level.as_deref(), Some("INFO"));
        assert_eq!(c.bootstrap_node, None);
        assert_eq!(c.nat.as_deref(), Some("auto"));
    }

    #[test]
    fn reads_recognised_keys_in_section() {
        let text = "\
; node settings
[other]
api-port = 1

[easystorage]
bootstrap-node = spr:CiUIAhIh
data-dir=/var/lib/easystorage
log-level = DEBUG ; inline comment
nat: extip:1.2.3.4
api-port=9000
disc-port = 9010
colour = blue
";
        let mut c = NodeConfig::default();
        c.apply_ini(text.as_bytes()).unwrap();
        assert_eq!(c.api_port, 9000);
        assert_eq!(c.disc_port, 9010);
        assert_eq!(c.bootstrap_node.as_deref(), Some("spr:CiUIAhIh"));
        assert_eq!(
            c.data_dir.as_deref(),
            Some(Path::new("/var/lib/easystorage"))
        );
        assert_eq!(c.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(c.nat.as_deref(), Some("extip:1.2.3.4"));
    }

    #[test]
    fn keys_outside_section_are_ignored() {
        let mut c = NodeConfig::default();
        c.apply_ini("api-port=1\n".as_bytes()).unwrap();
        assert_eq!(c.api_port, DEFAULT_API_PORT);
    }

    #[test]
    fn syntax_errors_report_line() {
        let mut c = NodeConfig::default();
        let err = c
            .apply_ini("[easystorage]\n\nnot a pair\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 3 }));
        let err = c.apply_ini("[easystorage\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 1 }));
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut c = NodeConfig::default();
        let err = c
            .apply_ini("[easystorage]\napi-port=70000\n".as_bytes())
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { line, key } => {
                assert_eq!(line, 2);
                assert_eq!(key, "api-port");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn read_ini_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[easystorage]\ndisc-port=7000").unwrap();
        let c = NodeConfig::read_ini(f.path()).unwrap();
        assert_eq!(c.disc_port, 7000);
        assert_eq!(c.api_port, DEFAULT_API_PORT);
        assert!(matches!(
            NodeConfig::read_ini("/nonexistent/easystorage.ini"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn json_omits_absent_fields() {
        let c = NodeConfig {
            api_port: 9000,
            disc_port: 9010,
            data_dir: None,
            log_level: None,
            bootstrap_node: None,
            nat: None,
        };
        let v: serde_json::Value = serde_json::from_str(&c.to_json().unwrap()).unwrap();
        assert_eq!(v, serde_json::json!({"api-port": 9000, "disc-port": 9010}));
    }

    #[test]
    fn json_wraps_bootstrap_node_in_list() {
        let c = NodeConfig {
            bootstrap_node: Some("spr:abc123".into()),
            ..NodeConfig::default()
        };
        let v: serde_json::Value = serde_json::from_str(&c.to_json().unwrap()).unwrap();
        assert_eq!(v["bootstrap-node"], serde_json::json!(["spr:abc123"]));
        assert_eq!(v["data-dir"], "./data");
        assert_eq!(v["nat"], "auto");
        assert_eq!(v["log-level"], "INFO");
    }

    #[test]
    fn serialized_form_is_the_engine_document() {
        let c = NodeConfig {
            bootstrap_node: Some("spr:abc".into()),
            data_dir: None,
            ..NodeConfig::default()
        };
        assert_eq!(
            serde_json::to_value(&c).unwrap(),
            serde_json::json!({
                "api-port": 8080,
                "disc-port": 8090,
                "log-level": "INFO",
                "bootstrap-node": ["spr:abc"],
                "nat": "auto",
            })
        );
        assert_eq!(
            c.to_json().unwrap(),
            r#"{"api-port":8080,"disc-port":8090,"log-level":"INFO","bootstrap-node":["spr:abc"],"nat":"auto"}"#
        );
    }
}
