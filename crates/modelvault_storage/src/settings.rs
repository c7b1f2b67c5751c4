//! Storage configuration.
//!
//! Settings are read with the `config` crate from an optional
//! `modelvault.toml` and then from environment variables, which win:
//!
//! | Variable          | Default     |
//! |-------------------|-------------|
//! | `STORAGE_DIR`     | `storage`   |
//! | `STORAGE_BACKEND` | `local`     |
//! | `S3_ENDPOINT`     | empty       |
//! | `S3_ACCESS_KEY`   | empty       |
//! | `S3_SECRET_KEY`   | empty       |
//! | `S3_BUCKET`       | empty       |
//! | `S3_SECURE`       | `true`      |
//! | `S3_REGION`       | `us-east-1` |

use config::{Config, Environment, File};
use derive_getters::Getters;
use modelvault_error::{ConfigError, VaultResult};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

/// Base name of the optional settings file.
pub const SETTINGS_FILE: &str = "modelvault";

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_secure() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Accepts a boolean or a string; only a case-insensitive `"true"` is true.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => text.trim().eq_ignore_ascii_case("true"),
    })
}

/// Raw storage settings as configured.
#[derive(
    Debug, Clone, PartialEq, Eq, Deserialize, Getters, derive_setters::Setters,
)]
#[setters(prefix = "with_", into)]
pub struct StorageSettings {
    /// Root for staging files and the local content-addressed tree
    #[serde(default = "default_storage_dir")]
    storage_dir: PathBuf,
    /// `local`, or `s3`/`object` for object storage
    #[serde(default = "default_backend")]
    storage_backend: String,
    /// Object storage endpoint, `host:port` or a full URL
    #[serde(default)]
    s3_endpoint: String,
    /// Object storage access key
    #[serde(default)]
    s3_access_key: String,
    /// Object storage secret key
    #[serde(default)]
    s3_secret_key: String,
    /// Bucket receiving artifacts
    #[serde(default)]
    s3_bucket: String,
    /// Use https when the endpoint carries no scheme
    #[serde(default = "default_secure", deserialize_with = "deserialize_flag")]
    s3_secure: bool,
    /// Signing region
    #[serde(default = "default_region")]
    s3_region: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            storage_backend: default_backend(),
            s3_endpoint: String::new(),
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_bucket: String::new(),
            s3_secure: default_secure(),
            s3_region: default_region(),
        }
    }
}

impl StorageSettings {
    /// Local-disk settings rooted at `storage_dir`.
    pub fn local(storage_dir: impl Into<PathBuf>) -> Self {
        Self::default().with_storage_dir(storage_dir.into())
    }

    /// Load from `./modelvault.toml` (if present) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a source cannot be read or a value has the
    /// wrong type.
    pub fn load() -> VaultResult<Self> {
        Self::load_from(None, Environment::default())
    }

    /// Load from a required settings file and the process environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `file` is missing or unreadable, or a value
    /// has the wrong type.
    pub fn load_file(file: &Path) -> VaultResult<Self> {
        Self::load_from(Some(file), Environment::default())
    }

    /// Load from an explicit settings file and environment source.
    ///
    /// Without a `file`, `./modelvault.toml` is used if it exists.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `file` is missing or unreadable, a value
    /// has the wrong type, or `STORAGE_DIR` is empty.
    pub fn load_from(file: Option<&Path>, env: Environment) -> VaultResult<Self> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(SETTINGS_FILE).required(false),
        };

        let settings: Self = Config::builder()
            .add_source(file_source)
            .add_source(env)
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ConfigError::load(e.to_string()))?;

        if settings.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("STORAGE_DIR", "must not be empty").into());
        }

        tracing::debug!(
            storage_dir = %settings.storage_dir.display(),
            backend = %settings.storage_backend,
            "Loaded storage settings"
        );
        Ok(settings)
    }

    /// Whether object storage was requested, complete or not.
    pub fn wants_object_storage(&self) -> bool {
        let backend = self.storage_backend.trim();
        backend.eq_ignore_ascii_case("s3") || backend.eq_ignore_ascii_case("object")
    }

    /// Pick the backend once, at startup.
    ///
    /// Object storage is used only when requested and the endpoint, bucket,
    /// access key and secret key are all set; otherwise local disk is used.
    pub fn backend_selection(&self) -> BackendSelection {
        if !self.wants_object_storage() {
            return BackendSelection::Local;
        }

        let missing: Vec<&str> = [
            ("S3_ENDPOINT", &self.s3_endpoint),
            ("S3_BUCKET", &self.s3_bucket),
            ("S3_ACCESS_KEY", &self.s3_access_key),
            ("S3_SECRET_KEY", &self.s3_secret_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            tracing::warn!(
                missing = ?missing,
                "Object storage requested but not fully configured, using local storage"
            );
            return BackendSelection::Local;
        }

        BackendSelection::Object(ObjectStoreSettings {
            endpoint: self.s3_endpoint.trim().to_string(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            bucket: self.s3_bucket.trim().to_string(),
            secure: self.s3_secure,
            region: self.s3_region.clone(),
        })
    }
}

/// Backend chosen from [`StorageSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    /// Content-addressed tree under the storage root
    Local,
    /// Object storage bucket
    Object(ObjectStoreSettings),
}

/// Complete object-storage connection settings.
#[derive(Clone, PartialEq, Eq, Getters)]
pub struct ObjectStoreSettings {
    endpoint: String,
    access_key: String,
    secret_key: String,
    bucket: String,
    secure: bool,
    region: String,
}

impl ObjectStoreSettings {
    /// Endpoint as a URL, adding `https://` or `http://` per `secure` when the
    /// configured endpoint has no scheme.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.secure {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

impl std::fmt::Debug for ObjectStoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSettings")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("secure", &self.secure)
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    fn object_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("STORAGE_BACKEND", "s3"),
            ("S3_ENDPOINT", "minio:9000"),
            ("S3_ACCESS_KEY", "minioadmin"),
            ("S3_SECRET_KEY", "minioadmin"),
            ("S3_BUCKET", "models"),
        ]
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent");
        let settings = StorageSettings::load_from(None, env(&[])).unwrap();
        assert_eq!(settings.storage_dir(), Path::new("storage"));
        assert_eq!(settings.storage_backend(), "local");
        assert!(*settings.s3_secure());
        assert_eq!(settings.backend_selection(), BackendSelection::Local);

        assert!(StorageSettings::load_from(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_empty_storage_dir_rejected() {
        let err = StorageSettings::load_from(None, env(&[("STORAGE_DIR", "")])).unwrap_err();
        let printed = err.to_string();
        assert!(printed.contains("STORAGE_DIR"), "{}", printed);
    }

    #[test]
    fn test_object_selection() {
        let settings = StorageSettings::load_from(None, env(&object_env())).unwrap();
        let BackendSelection::Object(object) = settings.backend_selection() else {
            panic!("expected object backend");
        };
        assert_eq!(object.bucket(), "models");
        assert_eq!(object.endpoint_url(), "https://minio:9000");
    }

    #[test]
    fn test_incomplete_object_falls_back_to_local() {
        for blank in ["S3_ENDPOINT", "S3_ACCESS_KEY", "S3_SECRET_KEY", "S3_BUCKET"] {
            let vars: Vec<_> = object_env()
                .into_iter()
                .map(|(k, v)| if k == blank { (k, "") } else { (k, v) })
                .collect();
            let settings = StorageSettings::load_from(None, env(&vars)).unwrap();
            assert!(settings.wants_object_storage());
            assert_eq!(settings.backend_selection(), BackendSelection::Local, "{}", blank);
        }
    }

    #[test]
    fn test_secure_flag() {
        let mut vars = object_env();
        vars.push(("S3_SECURE", "False"));
        let settings = StorageSettings::load_from(None, env(&vars)).unwrap();
        assert!(!*settings.s3_secure());

        let BackendSelection::Object(object) = settings.backend_selection() else {
            panic!("expected object backend");
        };
        assert_eq!(object.endpoint_url(), "http://minio:9000");

        let mut vars = object_env();
        vars.push(("S3_SECURE", "TRUE"));
        vars.push(("S3_ENDPOINT", "http://127.0.0.1:9000"));
        let settings = StorageSettings::load_from(None, env(&vars)).unwrap();
        assert!(*settings.s3_secure());
        let BackendSelection::Object(object) = settings.backend_selection() else {
            panic!("expected object backend");
        };
        assert_eq!(object.endpoint_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_settings_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("modelvault.toml");
        std::fs::write(
            &path,
            "storage_dir = \"/srv/artifacts\"\nstorage_backend = \"object\"\ns3_secure = false\n",
        )
        .unwrap();

        let settings =
            StorageSettings::load_from(Some(&path), env(&[("STORAGE_DIR", "/data")])).unwrap();
        assert_eq!(settings.storage_dir(), Path::new("/data"));
        assert!(settings.wants_object_storage());
        assert!(!*settings.s3_secure());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut vars = object_env();
        vars.push(("S3_SECRET_KEY", "s3cr3t-value"));
        let settings = StorageSettings::load_from(None, env(&vars)).unwrap();
        let BackendSelection::Object(object) = settings.backend_selection() else {
            panic!("expected object backend");
        };
        let printed = format!("{:?}", object);
        assert!(!printed.contains("s3cr3t-value"));
        assert!(printed.contains("<redacted>"));
    }
}
