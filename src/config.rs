use std::path::PathBuf;

/// Runtime settings, read from the environment after an optional `.env` file.
#[derive(Clone, Debug)]
pub struct Settings {
    // Object storage
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    /// Local mount point of the object storage buckets.
    pub storage_root: PathBuf,

    /// Directory holding one sub-directory per dashboard with its `data_sources.yml`.
    pub pages_dir: PathBuf,

    // Auth
    pub basic_auth_username: String,
    pub basic_auth_password: String,

    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            s3_endpoint: None,
            s3_region: "ap-northeast-1".to_string(),
            s3_bucket: "bi-datasets".to_string(),
            s3_access_key: None,
            s3_secret_key: None,
            storage_root: PathBuf::from("./storage"),
            pages_dir: PathBuf::from("./pages"),
            basic_auth_username: "admin".to_string(),
            basic_auth_password: "changeme".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Settings {
    /// Load `.env` (if present) and build settings from the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("failed to read .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        Self {
            s3_endpoint: get("S3_ENDPOINT"),
            s3_region: get("S3_REGION").unwrap_or(defaults.s3_region),
            s3_bucket: get("S3_BUCKET").unwrap_or(defaults.s3_bucket),
            s3_access_key: get("S3_ACCESS_KEY"),
            s3_secret_key: get("S3_SECRET_KEY"),
            storage_root: get("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            pages_dir: get("PAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.pages_dir),
            basic_auth_username: get("BASIC_AUTH_USERNAME")
                .unwrap_or(defaults.basic_auth_username),
            basic_auth_password: get("BASIC_AUTH_PASSWORD")
                .unwrap_or(defaults.basic_auth_password),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_environment_is_empty() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.s3_region, "ap-northeast-1");
        assert_eq!(settings.s3_bucket, "bi-datasets");
        assert_eq!(settings.basic_auth_username, "admin");
        assert_eq!(settings.basic_auth_password, "changeme");
        assert!(settings.s3_endpoint.is_none());
    }

    #[test]
    fn overrides_and_blank_values() {
        let env: HashMap<&str, &str> = [
            ("S3_BUCKET", "reports"),
            ("S3_ENDPOINT", "http://minio:9000"),
            ("S3_REGION", "  "),
            ("PAGES_DIR", "/srv/pages"),
        ]
        .into_iter()
        .collect();

        let settings = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(settings.s3_bucket, "reports");
        assert_eq!(settings.s3_endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(settings.s3_region, "ap-northeast-1");
        assert_eq!(settings.pages_dir, PathBuf::from("/srv/pages"));
    }
}
