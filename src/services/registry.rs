//! Service definition store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::services::definition::{ServiceDefinition, ServiceDefinitionFile};
use crate::services::version::ServiceVersion;

/// File name every definition is stored under.
pub const DEFINITION_FILE: &str = "service.toml";

/// Errors while reading the definition store.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read service store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{role} {version} is defined twice ({path})")]
    Duplicate {
        role: String,
        version: ServiceVersion,
        path: PathBuf,
    },
}

/// Why a (role, version) lookup failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown service role '{0}'")]
    UnknownRole(String),

    #[error("no definition for {role} version {version}")]
    UnknownVersion { role: String, version: ServiceVersion },

    #[error("definition for {role} {version} is invalid: {reason}")]
    Invalid {
        role: String,
        version: ServiceVersion,
        reason: String,
    },
}

type Key = (String, ServiceVersion);

/// Mapping `(role, version)` → compiled definition.
///
/// Definitions that fail to compile are remembered with their error so a
/// topology that references them fails with a precise reason while every
/// other topology deploys normally.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    definitions: HashMap<Key, Arc<ServiceDefinition>>,
    invalid: HashMap<Key, String>,
    problems: Vec<String>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` recursively for definition files.
    ///
    /// Only an unreadable root is an error; individual bad files are
    /// recorded and logged.
    pub fn load(dir: &Path) -> Result<Self, RegistryError> {
        let mut files = Vec::new();
        collect_definition_files(dir, &mut files).map_err(|source| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        files.sort();

        let mut registry = Self::new();
        for path in files {
            if let Err(e) = registry.load_file(&path) {
                tracing::error!(path = %path.display(), error = %e, "Skipping service definition");
                registry.problems.push(e.to_string());
            }
        }

        tracing::info!(
            directory = %dir.display(),
            definitions = registry.definitions.len(),
            invalid = registry.invalid.len(),
            "Service definitions loaded"
        );
        Ok(registry)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ServiceDefinitionFile =
            toml::from_str(&raw).map_err(|source| RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let key = (file.role.trim().to_ascii_uppercase(), file.version.clone());
        if self.definitions.contains_key(&key) || self.invalid.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                role: key.0,
                version: key.1,
                path: path.to_path_buf(),
            });
        }

        match ServiceDefinition::compile(file) {
            Ok(def) => {
                tracing::debug!(
                    role = %def.role,
                    version = %def.version,
                    path = %path.display(),
                    "Registered service definition"
                );
                self.definitions.insert(key, Arc::new(def));
            }
            Err(e) => {
                tracing::error!(
                    role = %key.0,
                    version = %key.1,
                    error = %e,
                    "Invalid service definition"
                );
                self.invalid.insert(key, e.to_string());
            }
        }
        Ok(())
    }

    /// Add an already-compiled definition, replacing any with the same key.
    pub fn register(&mut self, def: ServiceDefinition) {
        let key = (def.role.clone(), def.version.clone());
        self.invalid.remove(&key);
        self.definitions.insert(key, Arc::new(def));
    }

    /// Resolve a definition. Without a version the highest one wins.
    pub fn resolve(
        &self,
        role: &str,
        version: Option<&ServiceVersion>,
    ) -> Result<Arc<ServiceDefinition>, LookupError> {
        let role = role.trim().to_ascii_uppercase();
        let version = match version {
            Some(v) => v.clone(),
            None => self
                .versions(&role)
                .into_iter()
                .max()
                .ok_or_else(|| LookupError::UnknownRole(role.clone()))?,
        };
        let key = (role, version);
        if let Some(def) = self.definitions.get(&key) {
            return Ok(Arc::clone(def));
        }
        if let Some(reason) = self.invalid.get(&key) {
            return Err(LookupError::Invalid {
                role: key.0,
                version: key.1,
                reason: reason.clone(),
            });
        }
        if self.has_role(&key.0) {
            Err(LookupError::UnknownVersion {
                role: key.0,
                version: key.1,
            })
        } else {
            Err(LookupError::UnknownRole(key.0))
        }
    }

    /// True when any definition, valid or not, declares `role`.
    pub fn has_role(&self, role: &str) -> bool {
        let role = role.trim().to_ascii_uppercase();
        self.definitions
            .keys()
            .chain(self.invalid.keys())
            .any(|(r, _)| *r == role)
    }

    fn versions(&self, role: &str) -> Vec<ServiceVersion> {
        self.definitions
            .keys()
            .chain(self.invalid.keys())
            .filter(|(r, _)| r == role)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Number of usable definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definition files that could not be read or identified.
    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

fn collect_definition_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_definition_files(&path, out)?;
        } else if path.file_name().is_some_and(|n| n == DEFINITION_FILE) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn minimal(role: &str, version: &str) -> String {
        format!(
            "role = \"{}\"\nversion = \"{}\"\npath = \"/{}\"\n",
            role,
            version,
            role.to_lowercase()
        )
    }

    #[test]
    fn loads_nested_definitions_and_picks_latest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ambari/2.2.0/service.toml", &minimal("AMBARI", "2.2.0"));
        write(dir.path(), "ambari/2.10.0/service.toml", &minimal("AMBARI", "2.10.0"));
        write(dir.path(), "hive/0.13.0/service.toml", &minimal("HIVE", "0.13.0"));
        write(dir.path(), "hive/0.13.0/notes.txt", "ignored");

        let registry = ServiceRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 3);
        let latest = registry.resolve("ambari", None).unwrap();
        assert_eq!(latest.version.as_str(), "2.10.0");
        let pinned = registry
            .resolve("AMBARI", Some(&ServiceVersion::from("2.2.0")))
            .unwrap();
        assert_eq!(pinned.version.as_str(), "2.2.0");
    }

    #[test]
    fn invalid_definition_only_fails_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good/1/service.toml", &minimal("GOOD", "1"));
        write(
            dir.path(),
            "bad/1/service.toml",
            r#"
role = "BAD"
version = "1"
path = "/bad"

[[rules]]
name = "r"
direction = "inbound"
pattern = "/a/{x}"
template = "/b/{y}"
"#,
        );
        write(dir.path(), "junk/service.toml", "this is not toml =");

        let registry = ServiceRegistry::load(dir.path()).unwrap();
        assert!(registry.resolve("GOOD", None).is_ok());
        assert!(matches!(
            registry.resolve("BAD", None),
            Err(LookupError::Invalid { .. })
        ));
        assert_eq!(registry.problems().len(), 1);
    }

    #[test]
    fn lookup_errors_distinguish_role_and_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/1/service.toml", &minimal("A", "1"));
        let registry = ServiceRegistry::load(dir.path()).unwrap();

        assert_eq!(
            registry.resolve("NOPE", None).unwrap_err(),
            LookupError::UnknownRole("NOPE".into())
        );
        assert!(matches!(
            registry.resolve("A", Some(&ServiceVersion::from("9"))),
            Err(LookupError::UnknownVersion { .. })
        ));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ServiceRegistry::load(&dir.path().join("absent")).is_err());
    }
}
