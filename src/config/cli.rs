use crate::config::toml_config::InsightConfig;
use crate::domain::model::{AnalysisRequest, RequestOptions};
use crate::utils::error::{InsightError, Result};
use crate::utils::validation::{
    validate_file_extensions, validate_greater_than, validate_path, validate_range, Validate,
};
use clap::Parser;
use serde_json::Value;

#[derive(Debug, Clone, Parser)]
#[command(name = "erosion-insight")]
#[command(about = "Soil erosion, crop yield and carbon insight for a field polygon")]
pub struct CliConfig {
    /// TOML 配置檔，未指定時使用本機預設端點
    #[arg(long)]
    pub config: Option<String>,

    /// 多邊形頂點，JSON 陣列 `[[lon, lat], ...]`
    #[arg(long)]
    pub polygon: Option<String>,

    /// 多邊形檔案（.json / .geojson）
    #[arg(long)]
    pub polygon_file: Option<String>,

    /// 回應寫入的檔案，未指定時輸出到 stdout
    #[arg(long)]
    pub output: Option<String>,

    #[arg(long)]
    pub week: Option<u32>,

    #[arg(long)]
    pub crop_name: Option<String>,

    /// 高風險門檻 (t/ha/yr)
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,
}

impl CliConfig {
    pub fn load_config(&self) -> Result<InsightConfig> {
        match &self.config {
            Some(path) => InsightConfig::from_file(path),
            None => Ok(InsightConfig::default()),
        }
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            threshold: self.threshold,
            week: self.week,
            crop_name: self.crop_name.clone(),
            ..RequestOptions::default()
        }
    }

    pub fn analysis_request(&self) -> Result<AnalysisRequest> {
        Ok(AnalysisRequest {
            coordinates: self.read_polygon()?,
            options: self.request_options(),
        })
    }

    pub fn read_polygon(&self) -> Result<Vec<[f64; 2]>> {
        let content = match (&self.polygon, &self.polygon_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => {
                return Err(InsightError::MissingConfigError {
                    field: "polygon".to_string(),
                })
            }
        };
        let value: Value = serde_json::from_str(&content)?;
        coordinates_from_json(&value)
    }
}

/// 接受 `[[lon, lat], ...]`、GeoJSON Polygon 或 Feature
pub fn coordinates_from_json(value: &Value) -> Result<Vec<[f64; 2]>> {
    let ring = match value {
        Value::Array(_) => value.clone(),
        Value::Object(object) => match object.get("type").and_then(Value::as_str) {
            Some("Feature") => {
                let geometry = object.get("geometry").ok_or_else(|| {
                    InsightError::invalid_geometry("GeoJSON feature has no geometry")
                })?;
                return coordinates_from_json(geometry);
            }
            Some("Polygon") => object
                .get("coordinates")
                .and_then(|rings| rings.get(0))
                .cloned()
                .ok_or_else(|| InsightError::invalid_geometry("GeoJSON polygon has no ring"))?,
            _ => object.get("coordinates").cloned().ok_or_else(|| {
                InsightError::invalid_geometry("expected a coordinate array or GeoJSON polygon")
            })?,
        },
        _ => {
            return Err(InsightError::invalid_geometry(
                "expected a coordinate array or GeoJSON polygon",
            ))
        }
    };

    Ok(serde_json::from_value(ring)?)
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        match (&self.polygon, &self.polygon_file) {
            (None, None) => {
                return Err(InsightError::MissingConfigError {
                    field: "--polygon or --polygon-file".to_string(),
                })
            }
            (Some(_), Some(_)) => {
                return Err(InsightError::ConfigValidationError {
                    field: "polygon".to_string(),
                    message: "use either --polygon or --polygon-file, not both".to_string(),
                })
            }
            (None, Some(path)) => {
                validate_path("polygon_file", path)?;
                validate_file_extensions("polygon_file", &[path.clone()], &["json", "geojson"])?;
            }
            (Some(_), None) => {}
        }

        if let Some(path) = &self.config {
            validate_path("config", path)?;
            validate_file_extensions("config", &[path.clone()], &["toml"])?;
        }
        if let Some(path) = &self.output {
            validate_path("output", path)?;
        }
        if let Some(week) = self.week {
            validate_range("week", week, 1, 53)?;
        }
        if let Some(threshold) = self.threshold {
            validate_greater_than("threshold", threshold, 0.0)?;
        }

        Ok(())
    }
}
