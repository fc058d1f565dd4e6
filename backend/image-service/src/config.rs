/// Configuration management for image-service
///
/// Loads configuration from environment variables with sensible defaults.
/// Values that fail to parse fall back to their defaults instead of aborting
/// startup.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub image: ImageConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ImageConfig {
    /// Storage root for originals and thumbnails
    pub dir: PathBuf,
    /// Staging directory for uploads
    pub temp_dir: PathBuf,
    /// Smallest thumbnail is `2^min_preview_log_size` pixels wide
    pub min_preview_log_size: u32,
    /// Whether this process generates thumbnails for dispatched tasks
    pub enable_preview_task: bool,
    pub preview_wait_timeout_ms: u64,
    pub jpeg_quality: u8,
    pub meta_cache_ttl_secs: u64,
    /// Lifetime of task claims and worker leases
    pub task_ttl_secs: u64,
    pub upload_max_bytes: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/images"),
            temp_dir: PathBuf::from("./data/temp"),
            min_preview_log_size: 5,
            enable_preview_task: true,
            preview_wait_timeout_ms: 2000,
            jpeg_quality: 75,
            meta_cache_ttl_secs: 3600,
            task_ttl_secs: 60,
            upload_max_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ImageConfig {
    pub fn preview_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.preview_wait_timeout_ms)
    }

    pub fn meta_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.meta_cache_ttl_secs)
    }

    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_lookup(|key| std::env::var(key).ok(), &cwd)
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// Relative paths are resolved against `cwd`.
    pub fn from_lookup<F>(get: F, cwd: &Path) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let image_defaults = ImageConfig::default();

        Config {
            app: AppConfig {
                host: string_or(&get, "IMAGE_SERVICE_HOST", "0.0.0.0"),
                port: parse_or(&get, "IMAGE_SERVICE_PORT", 8083),
                env: string_or(&get, "APP_ENV", "development"),
            },
            database: DatabaseConfig {
                url: string_or(&get, "DATABASE_URL", "postgresql://localhost/nova_images"),
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10),
                run_migrations: bool_or(&get, "DATABASE_RUN_MIGRATIONS", true),
            },
            cache: CacheConfig {
                redis_url: string_or(&get, "REDIS_URL", "redis://localhost:6379"),
            },
            image: ImageConfig {
                dir: path_or(&get, "DIR_IMAGES", &image_defaults.dir, cwd),
                temp_dir: path_or(&get, "DIR_TEMP_FILES", &image_defaults.temp_dir, cwd),
                min_preview_log_size: parse_or(
                    &get,
                    "IMAGE_MIN_PREVIEW_LOG_SIZE",
                    image_defaults.min_preview_log_size,
                )
                .min(30),
                enable_preview_task: bool_or(
                    &get,
                    "IMAGE_ENABLED_CREATE_IMAGE_TASK",
                    image_defaults.enable_preview_task,
                ),
                preview_wait_timeout_ms: parse_or(
                    &get,
                    "IMAGE_PREVIEW_WAIT_TIMEOUT_MS",
                    image_defaults.preview_wait_timeout_ms,
                ),
                jpeg_quality: parse_or(&get, "IMAGE_JPEG_QUALITY", image_defaults.jpeg_quality)
                    .clamp(1, 100),
                meta_cache_ttl_secs: parse_or(
                    &get,
                    "IMAGE_META_CACHE_TTL_SECS",
                    image_defaults.meta_cache_ttl_secs,
                ),
                task_ttl_secs: parse_or(&get, "IMAGE_TASK_TTL_SECS", image_defaults.task_ttl_secs)
                    .max(1),
                upload_max_bytes: parse_or(
                    &get,
                    "IMAGE_UPLOAD_MAX_BYTES",
                    image_defaults.upload_max_bytes,
                ),
            },
        }
    }
}

fn string_or<F: Fn(&str) -> Option<String>>(get: &F, key: &str, default: &str) -> String {
    get(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn bool_or<F: Fn(&str) -> Option<String>>(get: &F, key: &str, default: bool) -> bool {
    match get(key).as_deref().map(str::trim) {
        Some("1") | Some("true") => true,
        Some("0") | Some("false") => false,
        _ => default,
    }
}

/// Accepts absolute paths and `./`-relative paths; anything else falls back to the default.
fn path_or<F: Fn(&str) -> Option<String>>(
    get: &F,
    key: &str,
    default: &Path,
    cwd: &Path,
) -> PathBuf {
    let resolve = |raw: &Path| -> Option<PathBuf> {
        if raw.is_absolute() {
            Some(raw.to_path_buf())
        } else if raw.starts_with(".") {
            Some(cwd.join(raw.strip_prefix(".").ok()?))
        } else {
            None
        }
    };

    get(key)
        .and_then(|raw| resolve(Path::new(&raw)))
        .or_else(|| resolve(default))
        .unwrap_or_else(|| cwd.join(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned(), Path::new("/srv/app"))
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.app.port, 8083);
        assert_eq!(config.image.min_preview_log_size, 5);
        assert!(config.image.enable_preview_task);
        assert_eq!(config.image.preview_wait_timeout(), Duration::from_millis(2000));
        assert_eq!(config.image.jpeg_quality, 75);
        assert_eq!(config.image.upload_max_bytes, 4 * 1024 * 1024);
        assert_eq!(config.image.dir, PathBuf::from("/srv/app/data/images"));
        assert_eq!(config.image.temp_dir, PathBuf::from("/srv/app/data/temp"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("IMAGE_SERVICE_PORT", "not-a-port"),
            ("IMAGE_MIN_PREVIEW_LOG_SIZE", "-3"),
            ("IMAGE_ENABLED_CREATE_IMAGE_TASK", "maybe"),
            ("DIR_IMAGES", "relative/without/dot"),
        ]);
        assert_eq!(config.app.port, 8083);
        assert_eq!(config.image.min_preview_log_size, 5);
        assert!(config.image.enable_preview_task);
        assert_eq!(config.image.dir, PathBuf::from("/srv/app/data/images"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("IMAGE_ENABLED_CREATE_IMAGE_TASK", "0"),
            ("IMAGE_MIN_PREVIEW_LOG_SIZE", "6"),
            ("IMAGE_PREVIEW_WAIT_TIMEOUT_MS", "500"),
            ("DIR_IMAGES", "/var/lib/images"),
            ("DIR_TEMP_FILES", "./tmp/uploads"),
        ]);
        assert!(!config.image.enable_preview_task);
        assert_eq!(config.image.min_preview_log_size, 6);
        assert_eq!(config.image.preview_wait_timeout_ms, 500);
        assert_eq!(config.image.dir, PathBuf::from("/var/lib/images"));
        assert_eq!(config.image.temp_dir, PathBuf::from("/srv/app/tmp/uploads"));
    }
}
