use std::{fs::File, path::Path};

use chrono::{Local, NaiveDateTime};
use serde::Deserialize;

use crate::errors::{Error, Result};

pub const DEFAULT_EDITOR_NAME: &str = "PLanes";
pub const DEFAULT_EDITOR_VERSION: &str = "0.8.8";
const MAX_ZOOM: u8 = 22;
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

#[derive(Deserialize, Debug, Clone)]
pub struct UserConfig {
    pub data_path: String,
    #[serde(default = "default_dest_path")]
    pub dest_path: String,
    /// Local time the conditions are resolved for. Defaults to now.
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    #[serde(default)]
    pub editor_mode: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_min_zoom")]
    pub view_min_zoom: u8,
    #[serde(default = "default_min_zoom")]
    pub split_min_zoom: u8,
    #[serde(default = "default_editor_name")]
    pub editor_name: String,
    #[serde(default = "default_editor_version")]
    pub editor_version: String,
}

fn default_dest_path() -> String {
    "output".to_string()
}

fn default_zoom() -> u8 {
    17
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_zoom() -> u8 {
    15
}

fn default_editor_name() -> String {
    DEFAULT_EDITOR_NAME.to_string()
}

fn default_editor_version() -> String {
    DEFAULT_EDITOR_VERSION.to_string()
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<UserConfig> {
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("could not open {}: {}", path.display(), e)))?;
        let config: UserConfig = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM || self.split_min_zoom > MAX_ZOOM || self.view_min_zoom > MAX_ZOOM {
            return Err(Error::Config(format!("zoom levels must be at most {}", MAX_ZOOM)));
        }
        if self.data_path.is_empty() {
            return Err("data_path must not be empty".into());
        }
        Ok(())
    }

    pub fn instant(&self) -> Result<NaiveDateTime> {
        match &self.datetime {
            Some(datetime) => parse_datetime(datetime),
            None => Ok(Local::now().naive_local()),
        }
    }

    pub fn context(&self) -> Result<AssemblyContext> {
        Ok(AssemblyContext {
            zoom: self.zoom,
            editor_mode: self.editor_mode,
            instant: self.instant()?,
            split_min_zoom: self.split_min_zoom,
        })
    }

    pub fn editor(&self) -> EditorIdentity {
        EditorIdentity { name: self.editor_name.clone(), version: self.editor_version.clone() }
    }
}

pub fn parse_datetime(value: &str) -> Result<NaiveDateTime> {
    let mut last_err = None;
    for format in DATETIME_FORMATS {
        match NaiveDateTime::parse_from_str(value.trim(), format) {
            Ok(instant) => return Ok(instant),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(e.into()),
        None => Err(Error::Config(format!("invalid datetime `{}`", value))),
    }
}

/// Everything lane assembly depends on besides the entity itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyContext {
    pub zoom: u8,
    pub editor_mode: bool,
    pub instant: NaiveDateTime,
    /// Below this zoom, sides with the same category collapse into one `empty` lane.
    pub split_min_zoom: u8,
}

/// Sent along with every upload as `created_by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorIdentity {
    pub name: String,
    pub version: String,
}

impl Default for EditorIdentity {
    fn default() -> Self {
        EditorIdentity {
            name: DEFAULT_EDITOR_NAME.to_string(),
            version: DEFAULT_EDITOR_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: UserConfig = serde_json::from_str(r#"{"data_path": "data/berlin.osm"}"#).unwrap();
        assert_eq!(config.zoom, 17);
        assert_eq!(config.split_min_zoom, 15);
        assert_eq!(config.view_min_zoom, 15);
        assert_eq!(config.editor(), EditorIdentity::default());
        assert!(!config.editor_mode);
    }

    #[test]
    fn test_load_and_context() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"data_path": "x.osm", "datetime": "2026-10-19T09:30", "zoom": 13, "editor_mode": true}}"#
        )
        .unwrap();
        let config = UserConfig::load(file.path()).unwrap();
        let ctx = config.context().unwrap();
        assert_eq!(ctx.zoom, 13);
        assert!(ctx.editor_mode);
        assert_eq!(ctx.instant, parse_datetime("2026-10-19 09:30").unwrap());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config: UserConfig = serde_json::from_str(r#"{"data_path": "x.osm", "zoom": 30}"#).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(parse_datetime("next tuesday").is_err());
        assert!(UserConfig::load(Path::new("/nonexistent/config.json")).is_err());
    }
}
