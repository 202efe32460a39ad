//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Campaign / deployment identifier used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "campaign".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimsConfig {
    /// Default claim lifetime when the request gives none
    #[serde(default = "default_claim_ttl_minutes")]
    pub ttl_minutes: i64,
    /// Upper bound for a requested claim lifetime
    #[serde(default = "default_claim_max_ttl_minutes")]
    pub max_ttl_minutes: i64,
    /// How often expired claims are swept (housekeeping only)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_claim_ttl_minutes() -> i64 {
    30
}

fn default_claim_max_ttl_minutes() -> i64 {
    240
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_claim_ttl_minutes(),
            max_ttl_minutes: default_claim_max_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Open sessions idle longer than this are abandoned by the sweep
    #[serde(default = "default_abandon_after_mins")]
    pub abandon_after_mins: i64,
}

fn default_abandon_after_mins() -> i64 {
    240
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { abandon_after_mins: default_abandon_after_mins() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Broadcast channel capacity; slower subscribers lose events beyond it
    #[serde(default = "default_hub_capacity")]
    pub channel_capacity: usize,
    /// Canvasser positions older than this are ignored and pruned
    #[serde(default = "default_canvasser_stale_secs")]
    pub canvasser_stale_secs: i64,
    #[serde(default = "default_canvasser_radius_km")]
    pub default_radius_km: f64,
}

fn default_hub_capacity() -> usize {
    1024
}

fn default_canvasser_stale_secs() -> i64 {
    600
}

fn default_canvasser_radius_km() -> f64 {
    2.0
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_hub_capacity(),
            canvasser_stale_secs: default_canvasser_stale_secs(),
            default_radius_km: default_canvasser_radius_km(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HousesConfig {
    /// JSON file with the house directory (empty directory if missing)
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_houses_radius_km")]
    pub default_radius_km: f64,
    #[serde(default = "default_houses_limit")]
    pub default_limit: usize,
}

fn default_houses_radius_km() -> f64 {
    0.5
}

fn default_houses_limit() -> usize {
    50
}

impl Default for HousesConfig {
    fn default() -> Self {
        Self {
            file: None,
            default_radius_km: default_houses_radius_km(),
            default_limit: default_houses_limit(),
        }
    }
}

/// A static API token entry
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub volunteer_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Bearer token -> volunteer identity
    #[serde(default)]
    pub tokens: HashMap<String, TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Publish hub events over MQTT
    #[serde(default = "default_mqtt_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic for HouseStatusUpdate events
    #[serde(default = "default_houses_topic")]
    pub houses_topic: String,
    /// Topic for CanvasserUpdate events (join/leave)
    #[serde(default = "default_canvassers_topic")]
    pub canvassers_topic: String,
    /// Topic for CanvasserLocationUpdate events
    #[serde(default = "default_locations_topic")]
    pub locations_topic: String,
}

fn default_mqtt_enabled() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_houses_topic() -> String {
    "walk/houses".to_string()
}

fn default_canvassers_topic() -> String {
    "walk/canvassers".to_string()
}

fn default_locations_topic() -> String {
    "walk/locations".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_enabled(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            houses_topic: default_houses_topic(),
            canvassers_topic: default_canvassers_topic(),
            locations_topic: default_locations_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActivityLogConfig {
    /// JSONL file that mirrors every recorded activity (disabled if unset)
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub claims: ClaimsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub houses: HousesConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub activity_log: ActivityLogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_bind_address: String,
    http_port: u16,
    claim_ttl_minutes: i64,
    claim_max_ttl_minutes: i64,
    sweep_interval_secs: u64,
    abandon_after_mins: i64,
    hub_capacity: usize,
    canvasser_stale_secs: i64,
    canvasser_radius_km: f64,
    houses_file: Option<String>,
    houses_radius_km: f64,
    houses_limit: usize,
    tokens: HashMap<String, TokenEntry>,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_houses_topic: String,
    mqtt_canvassers_topic: String,
    mqtt_locations_topic: String,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    activity_log_file: Option<String>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            claim_ttl_minutes: toml_config.claims.ttl_minutes,
            claim_max_ttl_minutes: toml_config.claims.max_ttl_minutes,
            sweep_interval_secs: toml_config.claims.sweep_interval_secs,
            abandon_after_mins: toml_config.sessions.abandon_after_mins,
            hub_capacity: toml_config.hub.channel_capacity,
            canvasser_stale_secs: toml_config.hub.canvasser_stale_secs,
            canvasser_radius_km: toml_config.hub.default_radius_km,
            houses_file: toml_config.houses.file,
            houses_radius_km: toml_config.houses.default_radius_km,
            houses_limit: toml_config.houses.default_limit,
            tokens: toml_config.auth.tokens,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_houses_topic: toml_config.mqtt.houses_topic,
            mqtt_canvassers_topic: toml_config.mqtt.canvassers_topic,
            mqtt_locations_topic: toml_config.mqtt.locations_topic,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            activity_log_file: toml_config.activity_log.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path: explicit argument, CONFIG_FILE env, or default
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.claim_ttl_minutes > 0, "claims.ttl_minutes must be positive");
        anyhow::ensure!(
            self.claim_max_ttl_minutes >= self.claim_ttl_minutes,
            "claims.max_ttl_minutes must be >= claims.ttl_minutes"
        );
        anyhow::ensure!(self.sweep_interval_secs > 0, "claims.sweep_interval_secs must be positive");
        anyhow::ensure!(self.abandon_after_mins > 0, "sessions.abandon_after_mins must be positive");
        anyhow::ensure!(self.hub_capacity > 0, "hub.channel_capacity must be positive");
        anyhow::ensure!(self.canvasser_stale_secs > 0, "hub.canvasser_stale_secs must be positive");
        anyhow::ensure!(self.metrics_interval_secs > 0, "metrics.interval_secs must be positive");
        anyhow::ensure!(self.houses_limit > 0, "houses.default_limit must be positive");
        anyhow::ensure!(
            self.houses_radius_km > 0.0 && self.canvasser_radius_km > 0.0,
            "default radii must be positive"
        );
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn claim_ttl_minutes(&self) -> i64 {
        self.claim_ttl_minutes
    }

    pub fn claim_max_ttl_minutes(&self) -> i64 {
        self.claim_max_ttl_minutes
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs
    }

    pub fn abandon_after_mins(&self) -> i64 {
        self.abandon_after_mins
    }

    pub fn hub_capacity(&self) -> usize {
        self.hub_capacity
    }

    pub fn canvasser_stale_secs(&self) -> i64 {
        self.canvasser_stale_secs
    }

    pub fn canvasser_radius_km(&self) -> f64 {
        self.canvasser_radius_km
    }

    pub fn houses_file(&self) -> Option<&str> {
        self.houses_file.as_deref()
    }

    pub fn houses_radius_km(&self) -> f64 {
        self.houses_radius_km
    }

    pub fn houses_limit(&self) -> usize {
        self.houses_limit
    }

    pub fn tokens(&self) -> &HashMap<String, TokenEntry> {
        &self.tokens
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_houses_topic(&self) -> &str {
        &self.mqtt_houses_topic
    }

    pub fn mqtt_canvassers_topic(&self) -> &str {
        &self.mqtt_canvassers_topic
    }

    pub fn mqtt_locations_topic(&self) -> &str {
        &self.mqtt_locations_topic
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn activity_log_file(&self) -> Option<&str> {
        self.activity_log_file.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the default claim TTL
    pub fn with_claim_ttl_minutes(mut self, minutes: i64) -> Self {
        self.claim_ttl_minutes = minutes;
        self
    }

    /// Builder method for tests to register an API token
    pub fn with_token(mut self, token: &str, volunteer_id: &str, name: &str) -> Self {
        self.tokens.insert(
            token.to_string(),
            TokenEntry { volunteer_id: volunteer_id.to_string(), name: name.to_string() },
        );
        self
    }

    /// Builder method for tests to set the houses file
    pub fn with_houses_file(mut self, path: &str) -> Self {
        self.houses_file = Some(path.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "campaign");
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.claim_ttl_minutes(), 30);
        assert_eq!(config.claim_max_ttl_minutes(), 240);
        assert_eq!(config.houses_radius_km(), 0.5);
        assert_eq!(config.houses_limit(), 50);
        assert_eq!(config.canvasser_radius_km(), 2.0);
        assert_eq!(config.mqtt_houses_topic(), "walk/houses");
        assert!(config.tokens().is_empty());
        assert!(config.houses_file().is_none());
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[claims]
ttl_minutes = 15
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.claim_ttl_minutes(), 15);
        assert_eq!(config.claim_max_ttl_minutes(), 240);
        assert_eq!(config.broker_port(), 1883);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ttl() {
        let config = Config::default().with_claim_ttl_minutes(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.abandon_after_mins = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_token() {
        let config = Config::default().with_token("abc", "v-1", "Ann");
        let entry = config.tokens().get("abc").unwrap();
        assert_eq!(entry.volunteer_id, "v-1");
        assert_eq!(entry.name, "Ann");
    }
}
