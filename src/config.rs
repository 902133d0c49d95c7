use crate::acl::AccessRule;
use config::{Config as SettingsLoader, Environment};
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf};

/// Direction of the name sort applied to the package listing.
///
/// Only an explicit `desc` flips the direction; unspecified or unrecognized
/// values keep the ascending default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn from_config_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("desc") => Self::Descending,
            _ => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthBackend {
    #[default]
    Local,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAuthPluginConfig {
    pub base_url: String,
    pub allow_access_endpoint: String,
    pub timeout_ms: u64,
}

impl Default for HttpAuthPluginConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            allow_access_endpoint: "/allow-access".to_string(),
            timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPluginConfig {
    pub backend: AuthBackend,
    pub http: Option<HttpAuthPluginConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub acl_rules: Vec<AccessRule>,
    pub web_enabled: bool,
    pub web_title: String,
    pub web_login: bool,
    pub sort_packages: SortOrder,
    pub gravatar: bool,
    pub url_prefix: String,
    pub trust_proxy: bool,
    pub log_level: String,
    pub auth_plugin: AuthPluginConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEnvConfig {
    config: Option<String>,
    bind: Option<String>,
    data_dir: Option<String>,
    web_enable: Option<String>,
    web_title: Option<String>,
    web_login: Option<String>,
    sort_packages: Option<String>,
    gravatar: Option<String>,
    url_prefix: Option<String>,
    trust_proxy: Option<String>,
    log_level: Option<String>,
    auth_backend: Option<String>,
    auth_http_base_url: Option<String>,
    auth_http_allow_access_endpoint: Option<String>,
    auth_http_timeout_ms: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_cfg = load_listaccio_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_env_config_file_if_present(&env_cfg)?;
        cfg.apply_env_overrides(&env_cfg);
        Ok(cfg)
    }

    pub fn from_env_with_config_file(config_path: PathBuf) -> Result<Self, String> {
        let env_cfg = load_listaccio_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_yaml_overrides(Self::from_yaml_file(config_path)?);
        cfg.apply_env_overrides(&env_cfg);
        Ok(cfg)
    }

    pub fn defaults() -> Self {
        Self {
            bind: "127.0.0.1:4873".parse().expect("valid default bind"),
            data_dir: PathBuf::from(".listaccio-data"),
            acl_rules: vec![AccessRule::open("**")],
            web_enabled: true,
            web_title: "Listaccio".to_string(),
            web_login: false,
            sort_packages: SortOrder::Ascending,
            gravatar: true,
            url_prefix: "/".to_string(),
            trust_proxy: false,
            log_level: "info".to_string(),
            auth_plugin: AuthPluginConfig::default(),
        }
    }

    fn apply_env_config_file_if_present(&mut self, env_cfg: &RawEnvConfig) -> Result<(), String> {
        let config_path = env_cfg
            .config
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(path) = config_path {
            let loaded = Self::from_yaml_file(PathBuf::from(path))?;
            self.apply_yaml_overrides(loaded);
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self, env_cfg: &RawEnvConfig) {
        if let Some(value) = env_cfg.bind.as_deref()
            && let Ok(parsed) = value.trim().parse()
        {
            self.bind = parsed;
        }
        if let Some(value) = env_cfg.data_dir.as_deref() {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.web_enable.as_deref()) {
            self.web_enabled = parsed;
        }
        if let Some(value) = env_cfg.web_title.as_deref() {
            self.web_title = value.to_string();
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.web_login.as_deref()) {
            self.web_login = parsed;
        }
        if let Some(value) = env_cfg.sort_packages.as_deref() {
            self.sort_packages = SortOrder::from_config_value(Some(value));
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.gravatar.as_deref()) {
            self.gravatar = parsed;
        }
        if let Some(value) = env_cfg.url_prefix.as_deref() {
            self.url_prefix = normalize_url_prefix(value);
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.trust_proxy.as_deref()) {
            self.trust_proxy = parsed;
        }
        if let Some(value) = env_cfg.log_level.as_deref() {
            self.log_level = value.to_string();
        }
        if let Some(value) = env_cfg.auth_backend.as_deref() {
            self.auth_plugin.backend = parse_auth_backend(value);
        }
        if env_cfg.auth_http_base_url.is_some()
            || env_cfg.auth_http_allow_access_endpoint.is_some()
            || env_cfg.auth_http_timeout_ms.is_some()
        {
            let http = self.auth_plugin.http.get_or_insert_with(Default::default);
            if let Some(value) = env_cfg.auth_http_base_url.as_deref() {
                http.base_url = value.to_string();
            }
            if let Some(value) = env_cfg.auth_http_allow_access_endpoint.as_deref() {
                http.allow_access_endpoint = value.to_string();
            }
            if let Some(parsed) = parse_env_value::<u64>(env_cfg.auth_http_timeout_ms.as_deref()) {
                http.timeout_ms = parsed;
            }
        }
    }

    fn apply_yaml_overrides(&mut self, loaded: Self) {
        self.bind = loaded.bind;
        self.data_dir = loaded.data_dir;
        self.acl_rules = loaded.acl_rules;
        self.web_enabled = loaded.web_enabled;
        self.web_title = loaded.web_title;
        self.web_login = loaded.web_login;
        self.sort_packages = loaded.sort_packages;
        self.gravatar = loaded.gravatar;
        self.url_prefix = loaded.url_prefix;
        self.trust_proxy = loaded.trust_proxy;
        self.log_level = loaded.log_level;
        self.auth_plugin = loaded.auth_plugin;
    }

    pub fn from_yaml_file(path: PathBuf) -> Result<Self, String> {
        let text = std::fs::read_to_string(&path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        Self::from_yaml_str(&path.display().to_string(), &text)
    }

    fn from_yaml_str(source: &str, text: &str) -> Result<Self, String> {
        let parsed = serde_yaml::from_str::<YamlConfig>(text)
            .map_err(|err| format!("failed to parse {source}: {err}"))?;
        Self::from_yaml_config(parsed)
    }

    fn from_yaml_config(parsed: YamlConfig) -> Result<Self, String> {
        let defaults = Self::defaults();
        let bind = parse_bind(parsed.listen.as_ref(), defaults.bind)?;
        let data_dir = parsed
            .storage
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let web = parsed.web.unwrap_or_default();
        let web_enabled = web.enable.unwrap_or(true);
        let web_title = web.title.unwrap_or(defaults.web_title);
        let web_login = web.login.unwrap_or(false);
        let sort_packages = SortOrder::from_config_value(web.sort_packages.as_deref());
        let gravatar = web.gravatar.unwrap_or(true);

        let url_prefix = normalize_url_prefix(parsed.url_prefix.as_deref().unwrap_or("/"));
        let trust_proxy = parsed
            .server
            .as_ref()
            .and_then(|server| server.trust_proxy.as_ref())
            .is_some_and(yaml_truthy);
        let log_level = parsed
            .log
            .and_then(|log| log.level)
            .unwrap_or(defaults.log_level);

        let mut rules = Vec::new();
        if let Some(packages) = parsed.packages {
            for (pattern, value) in packages {
                rules.push(parse_access_rule(pattern, value)?);
            }
        }

        Ok(Self {
            bind,
            data_dir,
            acl_rules: if rules.is_empty() {
                defaults.acl_rules
            } else {
                rules
            },
            web_enabled,
            web_title,
            web_login,
            sort_packages,
            gravatar,
            url_prefix,
            trust_proxy,
            log_level,
            auth_plugin: parse_auth_from_yaml(parsed.auth),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct YamlConfig {
    listen: Option<serde_yaml::Value>,
    storage: Option<String>,
    web: Option<YamlWeb>,
    url_prefix: Option<String>,
    server: Option<YamlServer>,
    log: Option<YamlLog>,
    auth: Option<YamlAuth>,
    packages: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct YamlWeb {
    enable: Option<bool>,
    title: Option<String>,
    login: Option<bool>,
    sort_packages: Option<String>,
    gravatar: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct YamlServer {
    #[serde(rename = "trustProxy", alias = "trust_proxy")]
    trust_proxy: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct YamlLog {
    level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct YamlAuth {
    backend: Option<String>,
    http: Option<YamlHttpAuth>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct YamlHttpAuth {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: Option<String>,
    #[serde(rename = "allowAccessEndpoint", alias = "allow_access_endpoint")]
    allow_access_endpoint: Option<String>,
    #[serde(rename = "timeoutMs", alias = "timeout_ms")]
    timeout_ms: Option<u64>,
}

fn load_listaccio_env() -> Result<RawEnvConfig, String> {
    let settings = SettingsLoader::builder()
        .add_source(Environment::with_prefix("LISTACCIO").try_parsing(false))
        .build()
        .map_err(|err| format!("failed to load LISTACCIO_* environment: {err}"))?;

    Ok(RawEnvConfig {
        config: env_value(&settings, "config"),
        bind: env_value(&settings, "bind"),
        data_dir: env_value(&settings, "data_dir"),
        web_enable: env_value(&settings, "web_enable"),
        web_title: env_value(&settings, "web_title"),
        web_login: env_value(&settings, "web_login"),
        sort_packages: env_value(&settings, "web_sort_packages"),
        gravatar: env_value(&settings, "web_gravatar"),
        url_prefix: env_value(&settings, "url_prefix"),
        trust_proxy: env_value(&settings, "trust_proxy"),
        log_level: env_value(&settings, "log_level"),
        auth_backend: env_value(&settings, "auth_backend"),
        auth_http_base_url: env_value(&settings, "auth_http_base_url"),
        auth_http_allow_access_endpoint: env_value(&settings, "auth_http_allow_access_endpoint"),
        auth_http_timeout_ms: env_value(&settings, "auth_http_timeout_ms"),
    })
}

fn env_value(settings: &SettingsLoader, key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env_value<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|value| value.trim().parse::<T>().ok())
}

fn parse_auth_backend(value: &str) -> AuthBackend {
    if value.trim().eq_ignore_ascii_case("http") {
        AuthBackend::Http
    } else {
        AuthBackend::Local
    }
}

fn parse_auth_from_yaml(auth: Option<YamlAuth>) -> AuthPluginConfig {
    let Some(auth) = auth else {
        return AuthPluginConfig::default();
    };

    let backend = auth
        .backend
        .as_deref()
        .map(parse_auth_backend)
        .unwrap_or_default();
    let http = auth.http.map(|http| {
        let defaults = HttpAuthPluginConfig::default();
        HttpAuthPluginConfig {
            base_url: http.base_url.unwrap_or(defaults.base_url),
            allow_access_endpoint: http
                .allow_access_endpoint
                .unwrap_or(defaults.allow_access_endpoint),
            timeout_ms: http.timeout_ms.unwrap_or(defaults.timeout_ms),
        }
    });

    AuthPluginConfig { backend, http }
}

fn parse_bind(listen: Option<&serde_yaml::Value>, default: SocketAddr) -> Result<SocketAddr, String> {
    let first = match listen {
        None => return Ok(default),
        Some(serde_yaml::Value::String(addr)) => addr.clone(),
        Some(serde_yaml::Value::Sequence(items)) => match items.first() {
            Some(serde_yaml::Value::String(addr)) => addr.clone(),
            Some(other) => return Err(format!("unsupported listen entry: {other:?}")),
            None => return Ok(default),
        },
        Some(other) => return Err(format!("unsupported listen value: {other:?}")),
    };

    first
        .trim()
        .trim_start_matches("http://")
        .parse()
        .map_err(|err| format!("invalid listen address {first:?}: {err}"))
}

fn parse_access_rule(
    pattern: serde_yaml::Value,
    value: serde_yaml::Value,
) -> Result<AccessRule, String> {
    let serde_yaml::Value::String(pattern) = pattern else {
        return Err(format!("package pattern must be a string, got {pattern:?}"));
    };

    let access = match value {
        serde_yaml::Value::Null => Vec::new(),
        serde_yaml::Value::Mapping(fields) => fields
            .get("access")
            .map(parse_principals)
            .transpose()?
            .unwrap_or_default(),
        other => {
            return Err(format!(
                "package rule for {pattern:?} must be a mapping, got {other:?}"
            ));
        }
    };

    Ok(AccessRule { pattern, access })
}

fn parse_principals(value: &serde_yaml::Value) -> Result<Vec<String>, String> {
    match value {
        serde_yaml::Value::String(names) => {
            Ok(names.split_whitespace().map(str::to_string).collect())
        }
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                serde_yaml::Value::String(principal) => Ok(principal.clone()),
                other => Err(format!("access principal must be a string, got {other:?}")),
            })
            .collect(),
        other => Err(format!("access must be a string or list, got {other:?}")),
    }
}

fn yaml_truthy(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Bool(flag) => *flag,
        serde_yaml::Value::String(text) => {
            !text.trim().is_empty() && !text.eq_ignore_ascii_case("false")
        }
        serde_yaml::Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        _ => false,
    }
}

fn normalize_url_prefix(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
