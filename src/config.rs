//! YAML configuration: filesystem roots per checking direction plus
//! the database credentials consumed by the name-resolution
//! front-ends.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for XSD schemas.
    pub xsd_root: PathBuf,
    /// Root directory for incoming XML documents.
    pub xml_root: PathBuf,
    #[serde(default)]
    pub fns_root: Option<PathBuf>,
    #[serde(default)]
    pub stat_root: Option<PathBuf>,
    #[serde(default)]
    pub edo_root: Option<PathBuf>,
    #[serde(default)]
    pub rar_root: Option<PathBuf>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Credentials for the schema-name database used by some front-ends;
/// carried here but not consumed by the checking core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Opening configuration {path:?}"))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing configuration {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.xsd_root.is_absolute(),
            "xsd_root must be an absolute path"
        );
        ensure!(
            self.xml_root.is_absolute(),
            "xml_root must be an absolute path"
        );
        Ok(())
    }

    /// Compendium root for a direction, falling back to `xsd_root`.
    pub fn root_for(&self, family: &str) -> &Path {
        let specific = match family {
            "fns" => self.fns_root.as_deref(),
            "stat" => self.stat_root.as_deref(),
            "edo" => self.edo_root.as_deref(),
            "rar" => self.rar_root.as_deref(),
            _ => None,
        };
        specific.unwrap_or(&self.xsd_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_and_validates() {
        let config: Config = serde_yaml::from_str(
            "xsd_root: /srv/xsd\nxml_root: /srv/xml\nstat_root: /srv/stat\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.root_for("stat"), Path::new("/srv/stat"));
        assert_eq!(config.root_for("fns"), Path::new("/srv/xsd"));
        assert!(config.database.is_none());
    }

    #[test]
    fn relative_roots_are_rejected() {
        let config: Config =
            serde_yaml::from_str("xsd_root: xsd\nxml_root: /srv/xml\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_keys_round_trip() {
        let config: Config = serde_yaml::from_str(
            "xsd_root: /x\nxml_root: /y\ndatabase:\n  host: db\n  port: 5432\n  user: checker\n  password: secret\n  dbname: documents\n",
        )
        .unwrap();
        let database = config.database.unwrap();
        assert_eq!(database.host, "db");
        assert_eq!(database.port, 5432);
        assert_eq!(database.dbname, "documents");
    }
}
