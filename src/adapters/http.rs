use crate::config::toml_config::{InsightConfig, SourceConfig};
use crate::core::orchestrator::Sources;
use crate::domain::model::{
    CarbonEstimate, ClimateContext, Coverage, DateRange, ErosionOutput, GeoJsonPolygon,
    Prediction, SatelliteImage, SoilContext, SourceKind, SourceRequest,
};
use crate::domain::ports::Source;
use crate::utils::error::{InsightError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 錯誤訊息中保留的回應內容長度
const MAX_ERROR_BODY: usize = 200;

/// 共用的 HTTP 呼叫：自訂標頭、狀態檢查、JSON 解碼
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    kind: SourceKind,
    url: String,
    headers: HashMap<String, String>,
    client: Client,
}

impl HttpEndpoint {
    pub fn new(kind: SourceKind, url: impl Into<String>, client: Client) -> Self {
        Self {
            kind,
            url: url.into(),
            headers: HashMap::new(),
            client,
        }
    }

    pub fn from_config(kind: SourceKind, config: &SourceConfig, client: Client) -> Self {
        Self::new(kind, config.endpoint.clone(), client)
            .with_headers(config.headers.clone().unwrap_or_default())
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_json<T: DeserializeOwned>(&self, query: &[(&str, String)]) -> Result<T> {
        let request = self.client.get(&self.url).query(query);
        self.send(request).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, body: &B) -> Result<T> {
        let request = self.client.post(&self.url).json(body);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, mut request: RequestBuilder) -> Result<T> {
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        tracing::debug!("📡 {}: request to {}", self.kind, self.url);
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("📡 {}: response status {}", self.kind, status);

        let body = response.text().await?;
        if !status.is_success() {
            return Err(InsightError::SourceStatus {
                source_name: self.kind.as_str().to_string(),
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            InsightError::source_failure(self.kind.as_str(), format!("malformed payload: {}", e))
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

#[derive(Debug, Serialize)]
struct ErosionQuery<'a> {
    geojson: GeoJsonPolygon,
    options: ErosionQueryOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ErosionQueryOptions<'a> {
    threshold: f64,
    p_toggle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_range: Option<&'a DateRange>,
}

/// RUSLE 計算服務（POST `{geojson, options}`）
pub struct HttpErosionSource {
    endpoint: HttpEndpoint,
}

impl HttpErosionSource {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Source for HttpErosionSource {
    type Output = ErosionOutput;

    fn name(&self) -> &str {
        self.endpoint.url()
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<ErosionOutput> {
        let query = ErosionQuery {
            geojson: request.polygon.to_geojson(),
            options: ErosionQueryOptions {
                threshold: request.options.threshold,
                p_toggle: request.options.p_toggle,
                date_range: request.options.date_range.as_ref(),
            },
        };
        let output: ErosionOutput = self.endpoint.post_json(&query).await?;
        check_erosion_output(&output)?;
        Ok(output)
    }
}

fn check_erosion_output(output: &ErosionOutput) -> Result<()> {
    let malformed =
        |message: String| InsightError::source_failure("erosion", format!("malformed payload: {}", message));

    let erosion = &output.summary.erosion;
    if !erosion.mean.is_finite() || erosion.mean < 0.0 {
        return Err(malformed(format!("erosion mean {} is not a valid rate", erosion.mean)));
    }

    if let Some(grid) = &output.grid {
        if !grid.is_consistent() {
            return Err(malformed(format!(
                "grid declares {}x{} cells but carries {} values",
                grid.rows,
                grid.cols,
                grid.values.len()
            )));
        }
    }
    Ok(())
}

/// 預測來源回報的涵蓋範圍，包含回應文件不會出現的值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReportedCoverage {
    Europe,
    Global,
    /// 模型以備援方式估計，數值仍可用
    Fallback,
    OutOfCoverage,
    Error,
    /// 來源的相依套件不可用
    Unavailable,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct CropYieldPayload {
    yield_t_ha: Option<f64>,
    coverage: Option<ReportedCoverage>,
    error: Option<String>,
}

/// 作物產量模型（GET `?lon&lat&week&crop_name`）
pub struct HttpCropYieldSource {
    endpoint: HttpEndpoint,
}

impl HttpCropYieldSource {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Source for HttpCropYieldSource {
    type Output = Prediction<f64>;

    fn name(&self) -> &str {
        self.endpoint.url()
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<Prediction<f64>> {
        let centroid = request.metadata.centroid;
        let payload: CropYieldPayload = self
            .endpoint
            .get_json(&[
                ("lon", centroid.lon.to_string()),
                ("lat", centroid.lat.to_string()),
                ("week", request.options.week.to_string()),
                ("crop_name", request.options.crop_name.clone()),
            ])
            .await?;

        interpret_prediction(
            "crop_yield",
            payload.yield_t_ha,
            payload.coverage,
            payload.error,
            Coverage::Europe,
        )
    }
}

#[derive(Debug, Deserialize)]
struct CarbonPayload {
    carbon_rate_mg_ha_yr: Option<f64>,
    climate: Option<ClimateContext>,
    soil: Option<SoilContext>,
    coverage: Option<ReportedCoverage>,
    error: Option<String>,
}

/// 碳封存模型（GET `?lon&lat`）
pub struct HttpCarbonSource {
    endpoint: HttpEndpoint,
}

impl HttpCarbonSource {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Source for HttpCarbonSource {
    type Output = Prediction<CarbonEstimate>;

    fn name(&self) -> &str {
        self.endpoint.url()
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<Prediction<CarbonEstimate>> {
        let centroid = request.metadata.centroid;
        let payload: CarbonPayload = self
            .endpoint
            .get_json(&[
                ("lon", centroid.lon.to_string()),
                ("lat", centroid.lat.to_string()),
            ])
            .await?;

        let CarbonPayload {
            carbon_rate_mg_ha_yr,
            climate,
            soil,
            coverage,
            error,
        } = payload;

        let prediction = interpret_prediction(
            "carbon",
            carbon_rate_mg_ha_yr,
            coverage,
            error,
            Coverage::Global,
        )?;
        Ok(match prediction {
            Prediction::Available { value, coverage } => Prediction::Available {
                value: CarbonEstimate {
                    carbon_rate_mg_ha_yr: value,
                    climate,
                    soil,
                },
                coverage,
            },
            Prediction::OutOfCoverage { reason } => Prediction::OutOfCoverage { reason },
        })
    }
}

/// 把具涵蓋範圍概念的回應轉成 `Prediction`：
/// 超出範圍是正常結果；`error`、`unavailable` 或缺少數值才是來源失敗。
fn interpret_prediction(
    source_name: &str,
    value: Option<f64>,
    coverage: Option<ReportedCoverage>,
    error: Option<String>,
    default_coverage: Coverage,
) -> Result<Prediction<f64>> {
    let coverage = match coverage {
        Some(ReportedCoverage::OutOfCoverage) => {
            return Ok(Prediction::OutOfCoverage {
                reason: error.unwrap_or_else(|| {
                    format!("Location outside {} model coverage", source_name)
                }),
            })
        }
        Some(ReportedCoverage::Error) => {
            return Err(InsightError::source_failure(
                source_name,
                error.unwrap_or_else(|| "model reported an error".to_string()),
            ))
        }
        Some(ReportedCoverage::Unavailable) => {
            return Err(InsightError::source_failure(
                source_name,
                error.unwrap_or_else(|| "model dependencies unavailable".to_string()),
            ))
        }
        Some(ReportedCoverage::Europe) => Coverage::Europe,
        Some(ReportedCoverage::Global) => Coverage::Global,
        Some(ReportedCoverage::Fallback | ReportedCoverage::Unknown) | None => default_coverage,
    };

    match value {
        Some(value) if value.is_finite() => Ok(Prediction::Available { value, coverage }),
        Some(value) => Err(InsightError::source_failure(
            source_name,
            format!("non-finite prediction {}", value),
        )),
        None => Err(InsightError::source_failure(
            source_name,
            error.unwrap_or_else(|| "response carries no prediction".to_string()),
        )),
    }
}

#[derive(Debug, Serialize)]
struct ImageryQuery<'a> {
    bbox: [f64; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    date_range: Option<&'a DateRange>,
}

#[derive(Debug, Deserialize)]
struct ImageryPayload {
    url: Option<String>,
    data: Option<String>,
    mime_type: Option<String>,
    source: Option<String>,
}

/// 衛星影像（POST `{bbox, date_range}`）
pub struct HttpImagerySource {
    endpoint: HttpEndpoint,
}

impl HttpImagerySource {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Source for HttpImagerySource {
    type Output = SatelliteImage;

    fn name(&self) -> &str {
        self.endpoint.url()
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<SatelliteImage> {
        let query = ImageryQuery {
            bbox: request.metadata.bbox.as_array(),
            date_range: request.options.date_range.as_ref(),
        };
        let payload: ImageryPayload = self.endpoint.post_json(&query).await?;

        if payload.url.is_none() && payload.data.is_none() {
            return Err(InsightError::source_failure(
                "imagery",
                "response carries neither url nor data",
            ));
        }

        Ok(SatelliteImage {
            url: payload.url,
            data: payload.data,
            mime_type: payload.mime_type.unwrap_or_else(|| "image/png".to_string()),
            source: payload.source.unwrap_or_else(|| "imagery".to_string()),
            placeholder: false,
            error: None,
        })
    }
}

/// 依配置建立四個 HTTP 來源，共用同一個連線池
pub fn http_sources(config: &InsightConfig) -> Result<Sources> {
    let client = Client::builder()
        .user_agent(concat!("erosion-insight/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let endpoint =
        |kind: SourceKind| HttpEndpoint::from_config(kind, config.sources.get(kind), client.clone());

    Ok(Sources {
        erosion: Arc::new(HttpErosionSource::new(endpoint(SourceKind::Erosion))),
        crop_yield: Arc::new(HttpCropYieldSource::new(endpoint(SourceKind::CropYield))),
        carbon: Arc::new(HttpCarbonSource::new(endpoint(SourceKind::Carbon))),
        imagery: Arc::new(HttpImagerySource::new(endpoint(SourceKind::Imagery))),
    })
}
