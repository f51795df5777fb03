use crate::domain::model::{
    AreaFormula, FactorLimits, HotspotThresholds, SourceKind, SourceSettings,
};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{InsightError, Result};
use crate::utils::validation::{
    validate_greater_than, validate_non_empty_string, validate_positive_number, validate_range,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// 單一來源逾時的上限（秒）
pub const MAX_SOURCE_TIMEOUT_SECONDS: f64 = 600.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub service: ServiceConfig,
    pub sources: SourcesConfig,
    pub geometry: GeometryConfig,
    pub hotspots: HotspotConfig,
    pub crop: CropConfig,
    pub erosion: ErosionConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    /// HTTP 服務監聽位址（server feature）
    pub bind_address: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "erosion-insight".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// 單一外部來源的連線設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub endpoint: String,
    pub timeout_seconds: Option<f64>,
    pub required: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
}

impl SourceConfig {
    fn local(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            timeout_seconds: None,
            required: None,
            headers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub erosion: SourceConfig,
    pub crop_yield: SourceConfig,
    pub carbon: SourceConfig,
    pub imagery: SourceConfig,
}

impl SourcesConfig {
    pub fn get(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Erosion => &self.erosion,
            SourceKind::CropYield => &self.crop_yield,
            SourceKind::Carbon => &self.carbon,
            SourceKind::Imagery => &self.imagery,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            erosion: SourceConfig::local("http://localhost:8000/api/rusle/compute"),
            crop_yield: SourceConfig::local("http://localhost:8001/predict/yield"),
            carbon: SourceConfig::local("http://localhost:8002/predict/carbon"),
            imagery: SourceConfig::local("http://localhost:8003/imagery"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub area_formula: AreaFormula,
    pub buffer_meters: f64,
    pub max_area_km2: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            area_formula: AreaFormula::Geodesic,
            buffer_meters: 0.0,
            max_area_km2: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorThresholdConfig {
    #[serde(alias = "R")]
    pub r: Option<f64>,
    #[serde(alias = "K")]
    pub k: Option<f64>,
    #[serde(alias = "LS")]
    pub ls: Option<f64>,
    #[serde(alias = "C")]
    pub c: Option<f64>,
    #[serde(alias = "P")]
    pub p: Option<f64>,
}

impl Default for FactorThresholdConfig {
    fn default() -> Self {
        let limits = FactorLimits::default();
        Self {
            r: limits.r,
            k: limits.k,
            ls: limits.ls,
            c: limits.c,
            p: limits.p,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    /// t/ha/yr
    pub high_risk_threshold: f64,
    pub block_size: usize,
    pub high_multiplier: f64,
    pub critical_multiplier: f64,
    pub factor_thresholds: FactorThresholdConfig,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        let defaults = HotspotThresholds::default();
        Self {
            high_risk_threshold: defaults.high_risk,
            block_size: defaults.block_size,
            high_multiplier: defaults.high_multiplier,
            critical_multiplier: defaults.critical_multiplier,
            factor_thresholds: FactorThresholdConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    pub week: u32,
    pub crop_name: String,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            week: 25,
            crop_name: "Soft wheat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErosionConfig {
    /// 是否計入 P（水土保持措施）因子
    pub p_toggle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

impl InsightConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(InsightError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| InsightError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ROUTE_API_KEY})，找不到的變數保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| InsightError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.monitoring.as_ref().and_then(|m| m.log_level.as_deref())
    }

    fn validate_sources(&self) -> Result<()> {
        for kind in SourceKind::ALL {
            let source = self.sources.get(kind);
            validate_url(&format!("sources.{}.endpoint", kind), &source.endpoint)?;
            if let Some(timeout) = source.timeout_seconds {
                let field = format!("sources.{}.timeout_seconds", kind);
                validate_greater_than(&field, timeout, 0.0)?;
                validate_range(&field, timeout, 0.0, MAX_SOURCE_TIMEOUT_SECONDS)?;
            }
        }
        Ok(())
    }

    fn validate_hotspots(&self) -> Result<()> {
        let hotspots = &self.hotspots;
        validate_greater_than(
            "hotspots.high_risk_threshold",
            hotspots.high_risk_threshold,
            0.0,
        )?;
        validate_positive_number("hotspots.block_size", hotspots.block_size, 1)?;
        validate_greater_than("hotspots.high_multiplier", hotspots.high_multiplier, 0.0)?;
        validate_greater_than(
            "hotspots.critical_multiplier",
            hotspots.critical_multiplier,
            0.0,
        )?;
        if hotspots.critical_multiplier < hotspots.high_multiplier {
            return Err(InsightError::ConfigValidationError {
                field: "hotspots.critical_multiplier".to_string(),
                message: format!(
                    "must not be smaller than hotspots.high_multiplier ({})",
                    hotspots.high_multiplier
                ),
            });
        }

        let limits = &hotspots.factor_thresholds;
        for (name, limit) in [
            ("R", limits.r),
            ("K", limits.k),
            ("LS", limits.ls),
            ("C", limits.c),
            ("P", limits.p),
        ] {
            if let Some(limit) = limit {
                validate_greater_than(&format!("hotspots.factor_thresholds.{}", name), limit, 0.0)?;
            }
        }
        Ok(())
    }
}

impl ConfigProvider for InsightConfig {
    fn source_settings(&self, kind: SourceKind) -> SourceSettings {
        let source = self.sources.get(kind);
        SourceSettings {
            kind,
            timeout: source
                .timeout_seconds
                .filter(|t| *t > 0.0 && *t <= MAX_SOURCE_TIMEOUT_SECONDS)
                .and_then(|t| Duration::try_from_secs_f64(t).ok())
                .unwrap_or_else(|| kind.default_timeout()),
            required: source.required.unwrap_or_else(|| kind.required_by_default()),
        }
    }

    fn area_formula(&self) -> AreaFormula {
        self.geometry.area_formula
    }

    fn buffer_meters(&self) -> f64 {
        self.geometry.buffer_meters
    }

    fn max_area_km2(&self) -> f64 {
        self.geometry.max_area_km2
    }

    fn hotspot_thresholds(&self) -> HotspotThresholds {
        let limits = &self.hotspots.factor_thresholds;
        HotspotThresholds {
            high_risk: self.hotspots.high_risk_threshold,
            block_size: self.hotspots.block_size,
            high_multiplier: self.hotspots.high_multiplier,
            critical_multiplier: self.hotspots.critical_multiplier,
            factor_limits: FactorLimits {
                r: limits.r,
                k: limits.k,
                ls: limits.ls,
                c: limits.c,
                p: limits.p,
            },
        }
    }

    fn default_week(&self) -> u32 {
        self.crop.week
    }

    fn default_crop_name(&self) -> &str {
        &self.crop.crop_name
    }

    fn default_p_toggle(&self) -> bool {
        self.erosion.p_toggle
    }
}

impl Validate for InsightConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("service.name", &self.service.name)?;
        self.validate_sources()?;

        validate_range("geometry.buffer_meters", self.geometry.buffer_meters, 0.0, 10_000.0)?;
        validate_greater_than("geometry.max_area_km2", self.geometry.max_area_km2, 0.0)?;

        self.validate_hotspots()?;

        validate_range("crop.week", self.crop.week, 1, 53)?;
        validate_non_empty_string("crop.crop_name", &self.crop.crop_name)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = InsightConfig::from_toml_str("").unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.area_formula(), AreaFormula::Geodesic);
        assert_eq!(config.max_area_km2(), 1000.0);
        assert_eq!(config.default_week(), 25);
        assert_eq!(config.default_crop_name(), "Soft wheat");

        let erosion = config.source_settings(SourceKind::Erosion);
        assert!(erosion.required);
        assert_eq!(erosion.timeout, Duration::from_secs(60));
        assert!(!config.source_settings(SourceKind::Imagery).required);

        let thresholds = config.hotspot_thresholds();
        assert_eq!(thresholds, HotspotThresholds::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[service]
name = "rusle-insight"

[sources.erosion]
endpoint = "https://rusle.example.com/api/rusle/compute"
timeout_seconds = 90

[sources.carbon]
endpoint = "https://carbon.example.com/predict"
timeout_seconds = 0.5
required = true

[geometry]
area_formula = "planar"
buffer_meters = 30.0

[hotspots]
high_risk_threshold = 15.0
block_size = 3

[hotspots.factor_thresholds]
LS = 4.0
c = 0.2

[crop]
week = 30
crop_name = "Grain maize"

[erosion]
p_toggle = true
"#;

        let config = InsightConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.service.name, "rusle-insight");
        assert_eq!(
            config.source_settings(SourceKind::Erosion).timeout,
            Duration::from_secs(90)
        );
        let carbon = config.source_settings(SourceKind::Carbon);
        assert!(carbon.required);
        assert_eq!(carbon.timeout, Duration::from_millis(500));
        // 未列出的來源維持預設
        assert_eq!(
            config.sources.crop_yield.endpoint,
            "http://localhost:8001/predict/yield"
        );

        assert_eq!(config.area_formula(), AreaFormula::Planar);
        assert_eq!(config.buffer_meters(), 30.0);

        let thresholds = config.hotspot_thresholds();
        assert_eq!(thresholds.high_risk, 15.0);
        assert_eq!(thresholds.block_size, 3);
        assert_eq!(thresholds.factor_limits.ls, Some(4.0));
        assert_eq!(thresholds.factor_limits.c, Some(0.2));

        assert_eq!(config.default_week(), 30);
        assert!(config.default_p_toggle());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("EROSION_INSIGHT_TEST_ENDPOINT", "https://rusle.test.example.com");

        let toml_content = r#"
[sources.erosion]
endpoint = "${EROSION_INSIGHT_TEST_ENDPOINT}/compute"

[sources.imagery]
endpoint = "https://imagery.example.com"
headers = { Authorization = "Bearer ${EROSION_INSIGHT_UNSET_TOKEN}" }
"#;

        let config = InsightConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(
            config.sources.erosion.endpoint,
            "https://rusle.test.example.com/compute"
        );
        let headers = config.sources.imagery.headers.as_ref().unwrap();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer ${EROSION_INSIGHT_UNSET_TOKEN}")
        );

        std::env::remove_var("EROSION_INSIGHT_TEST_ENDPOINT");
    }

    #[test]
    fn test_config_validation() {
        let bad_endpoint = InsightConfig::from_toml_str(
            r#"
[sources.erosion]
endpoint = "invalid-url"
"#,
        )
        .unwrap();
        assert!(bad_endpoint.validate().is_err());

        let bad_week = InsightConfig::from_toml_str("[crop]\nweek = 54\n").unwrap();
        assert!(bad_week.validate().is_err());

        let bad_multipliers = InsightConfig::from_toml_str(
            "[hotspots]\nhigh_multiplier = 3.0\ncritical_multiplier = 2.0\n",
        )
        .unwrap();
        let err = bad_multipliers.validate().unwrap_err();
        assert!(err.to_string().contains("critical_multiplier"));

        let bad_timeout = InsightConfig::from_toml_str(
            r#"
[sources.imagery]
endpoint = "https://imagery.example.com"
timeout_seconds = 0
"#,
        )
        .unwrap();
        assert!(bad_timeout.validate().is_err());
    }

    #[test]
    fn test_source_timeout_upper_bound() {
        let huge = InsightConfig::from_toml_str(
            r#"
[sources.erosion]
endpoint = "https://rusle.example.com"
timeout_seconds = 1e30
"#,
        )
        .unwrap();
        let err = huge.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));

        // 未經驗證的設定也不會讓 Duration 轉換 panic
        let settings = huge.source_settings(SourceKind::Erosion);
        assert_eq!(settings.timeout, SourceKind::Erosion.default_timeout());

        let at_limit = InsightConfig::from_toml_str(
            "[sources.erosion]\nendpoint = \"https://rusle.example.com\"\ntimeout_seconds = 600.0\n",
        )
        .unwrap();
        assert!(at_limit.validate().is_ok());
        assert_eq!(
            at_limit.source_settings(SourceKind::Erosion).timeout,
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = InsightConfig::from_toml_str("[geometry\nbuffer_meters = 1").unwrap_err();
        assert!(matches!(err, InsightError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[service]\nname = \"file-test\"\n\n[monitoring]\nenabled = true\nlog_level = \"debug\"\n")
            .unwrap();

        let config = InsightConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.service.name, "file-test");
        assert!(config.monitoring_enabled());
        assert_eq!(config.log_level(), Some("debug"));
    }
}
