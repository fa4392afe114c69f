use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MODEL_DIR: &str = "~/.wordweaver/models/default";

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub host: Host,
    pub model_dir: PathBuf,
    pub device: DevicePreference,
    pub dtype: DTypePreference,
    pub origins: AllowedOrigins,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DTypePreference {
    #[default]
    F32,
    F16,
    BF16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AllowedOrigins {
    #[default]
    Any,
    List(Vec<String>),
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            host: Host::parse(
                &lookup("WORDWEAVER_HOST").unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT)),
            ),
            model_dir: expand_home(
                &lookup("WORDWEAVER_MODEL_DIR").unwrap_or_else(|| DEFAULT_MODEL_DIR.to_string()),
            ),
            device: lookup("WORDWEAVER_DEVICE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            dtype: lookup("WORDWEAVER_DTYPE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            origins: lookup("WORDWEAVER_ORIGINS")
                .map(|v| AllowedOrigins::parse(&v))
                .unwrap_or_default(),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Host {
    pub fn parse(raw: &str) -> Self {
        let raw = raw
            .trim()
            .trim_start_matches("http://")
            .trim_start_matches("https://");

        match raw.rsplit_once(':') {
            Some((host, port)) => Self {
                host: if host.is_empty() { "127.0.0.1".to_string() } else { host.to_string() },
                port: port.parse().unwrap_or(DEFAULT_PORT),
            },
            None => Self {
                host: raw.to_string(),
                port: DEFAULT_PORT,
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(format!("unknown device: {}", other)),
        }
    }
}

impl FromStr for DTypePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::F32),
            "f16" | "float16" | "half" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::BF16),
            other => Err(format!("unknown dtype: {}", other)),
        }
    }
}

impl DTypePreference {
    pub fn to_candle(self) -> candle_core::DType {
        match self {
            Self::F32 => candle_core::DType::F32,
            Self::F16 => candle_core::DType::F16,
            Self::BF16 => candle_core::DType::BF16,
        }
    }
}

impl AllowedOrigins {
    /// `*` (or an empty value) allows every origin, otherwise a
    /// comma-separated list.
    pub fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(list) => list.iter().any(|o| o == origin),
        }
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> EnvConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.host, Host { host: "127.0.0.1".into(), port: 8000 });
        assert_eq!(config.device, DevicePreference::Auto);
        assert_eq!(config.dtype, DTypePreference::F32);
        assert_eq!(config.origins, AllowedOrigins::Any);
        assert!(config.model_dir.ends_with(".wordweaver/models/default"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("WORDWEAVER_HOST", "0.0.0.0:9000"),
            ("WORDWEAVER_MODEL_DIR", "/srv/models/qwen"),
            ("WORDWEAVER_DEVICE", "CPU"),
            ("WORDWEAVER_DTYPE", "bf16"),
            ("WORDWEAVER_ORIGINS", "http://localhost:3000, https://example.org/"),
        ]);
        assert_eq!(config.host.addr(), "0.0.0.0:9000");
        assert_eq!(config.model_dir, PathBuf::from("/srv/models/qwen"));
        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.dtype.to_candle(), candle_core::DType::BF16);
        assert!(config.origins.allows("https://example.org"));
        assert!(!config.origins.allows("https://evil.example"));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config_from(&[
            ("WORDWEAVER_HOST", "localhost:notaport"),
            ("WORDWEAVER_DEVICE", "tpu"),
            ("WORDWEAVER_DTYPE", "int4"),
        ]);
        assert_eq!(config.host.port, DEFAULT_PORT);
        assert_eq!(config.device, DevicePreference::Auto);
        assert_eq!(config.dtype, DTypePreference::F32);
    }

    #[test]
    fn test_host_parse() {
        assert_eq!(Host::parse("http://10.0.0.1:8080").addr(), "10.0.0.1:8080");
        assert_eq!(Host::parse("example.com").port, DEFAULT_PORT);
        assert_eq!(Host::parse(":7000").host, "127.0.0.1");
    }

    #[test]
    fn test_origins_wildcard_wins() {
        assert_eq!(AllowedOrigins::parse("http://a, *"), AllowedOrigins::Any);
        assert_eq!(AllowedOrigins::parse(""), AllowedOrigins::Any);
    }
}
