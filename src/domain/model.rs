use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// 經緯度座標，序列化為 `[lon, lat]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(coord: Coordinate) -> Self {
        [coord.lon, coord.lat]
    }
}

/// 已驗證的多邊形。只保存開放環（不重複首點），輸出 GeoJSON 時自動閉合。
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<Coordinate>,
}

impl Polygon {
    /// 僅供驗證器與幾何運算建立，外部請走 `PolygonValidator::validate`
    pub(crate) fn from_ring(vertices: Vec<Coordinate>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Coordinate] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// 首尾相接的環
    pub fn closed_ring(&self) -> Vec<Coordinate> {
        let mut ring = self.vertices.clone();
        if let Some(first) = self.vertices.first() {
            ring.push(*first);
        }
        ring
    }

    pub fn to_geojson(&self) -> GeoJsonPolygon {
        GeoJsonPolygon {
            kind: "Polygon".to_string(),
            coordinates: vec![self.closed_ring()],
        }
    }
}

impl Serialize for Polygon {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<Coordinate>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, coord: &Coordinate) -> bool {
        coord.lon >= self.min_lon
            && coord.lon <= self.max_lon
            && coord.lat >= self.min_lat
            && coord.lat <= self.max_lat
    }

    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub fn as_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaFormula {
    /// WGS84 橢球體上的測地面積
    #[default]
    Geodesic,
    /// 以質心為原點的等距圓柱投影 + 鞋帶公式
    Planar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonMetadata {
    pub centroid: Coordinate,
    pub bbox: BoundingBox,
    pub area_km2: f64,
    pub area_ha: f64,
    pub vertex_count: usize,
    pub area_formula: AreaFormula,
}

/// RUSLE 因子
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Factor {
    R,
    K,
    #[serde(rename = "LS")]
    Ls,
    C,
    P,
}

impl Factor {
    pub const ALL: [Factor; 5] = [Factor::R, Factor::K, Factor::Ls, Factor::C, Factor::P];

    /// 主導因子平手時的優先順序
    pub const PRIORITY: [Factor; 5] = [Factor::Ls, Factor::C, Factor::R, Factor::K, Factor::P];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::R => "R",
            Factor::K => "K",
            Factor::Ls => "LS",
            Factor::C => "C",
            Factor::P => "P",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Factor::R => "rainfall erosivity",
            Factor::K => "soil erodibility",
            Factor::Ls => "steep or long slopes",
            Factor::C => "bare or sparse vegetation cover",
            Factor::P => "lack of conservation practice",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorStats {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_factor_unit")]
    pub unit: String,
    #[serde(default)]
    pub contribution_pct: Option<f64>,
    #[serde(default)]
    pub source: String,
}

fn default_factor_unit() -> String {
    "dimensionless".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    #[serde(rename = "R")]
    pub r: FactorStats,
    #[serde(rename = "K")]
    pub k: FactorStats,
    #[serde(rename = "LS")]
    pub ls: FactorStats,
    #[serde(rename = "C")]
    pub c: FactorStats,
    #[serde(rename = "P")]
    pub p: FactorStats,
}

impl FactorBreakdown {
    pub fn get(&self, factor: Factor) -> &FactorStats {
        match factor {
            Factor::R => &self.r,
            Factor::K => &self.k,
            Factor::Ls => &self.ls,
            Factor::C => &self.c,
            Factor::P => &self.p,
        }
    }

    pub fn get_mut(&mut self, factor: Factor) -> &mut FactorStats {
        match factor {
            Factor::R => &mut self.r,
            Factor::K => &mut self.k,
            Factor::Ls => &mut self.ls,
            Factor::C => &mut self.c,
            Factor::P => &mut self.p,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, &FactorStats)> {
        Factor::ALL.into_iter().map(move |factor| (factor, self.get(factor)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionStatistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p95: f64,
    /// 全區每年土壤流失量 (t/yr)
    #[serde(default)]
    pub total_soil_loss: Option<f64>,
    #[serde(default = "default_erosion_unit")]
    pub unit: String,
}

fn default_erosion_unit() -> String {
    "t/ha/yr".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionSummary {
    pub erosion: ErosionStatistics,
    pub factors: FactorBreakdown,
}

/// 侵蝕估計柵格。列優先，第 0 列在北，`None` 代表無資料。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionGrid {
    pub origin_lon: f64,
    pub origin_lat: f64,
    pub cell_size_deg: f64,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<Option<f64>>,
}

impl ErosionGrid {
    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_consistent(&self) -> bool {
        self.rows > 0
            && self.cols > 0
            && self.cell_size_deg.is_finite()
            && self.cell_size_deg > 0.0
            && self.values.len() == self.cell_count()
    }
}

/// 與 `ErosionGrid` 同形狀的各因子柵格
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorGrids {
    #[serde(rename = "R", default)]
    pub r: Vec<Option<f64>>,
    #[serde(rename = "K", default)]
    pub k: Vec<Option<f64>>,
    #[serde(rename = "LS", default)]
    pub ls: Vec<Option<f64>>,
    #[serde(rename = "C", default)]
    pub c: Vec<Option<f64>>,
    #[serde(rename = "P", default)]
    pub p: Vec<Option<f64>>,
}

impl FactorGrids {
    pub fn get(&self, factor: Factor) -> &[Option<f64>] {
        match factor {
            Factor::R => &self.r,
            Factor::K => &self.k,
            Factor::Ls => &self.ls,
            Factor::C => &self.c,
            Factor::P => &self.p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TileUrls {
    pub erosion_risk: Option<String>,
    pub factors: Option<String>,
}

/// 侵蝕引擎回傳的完整內容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionOutput {
    #[serde(flatten)]
    pub summary: ErosionSummary,
    #[serde(default)]
    pub grid: Option<ErosionGrid>,
    #[serde(default)]
    pub factor_grids: Option<FactorGrids>,
    #[serde(default)]
    pub tile_urls: Option<TileUrls>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotProperties {
    pub area_ha: f64,
    pub mean_erosion: f64,
    pub max_erosion: f64,
    pub dominant_factor: Factor,
    pub dominant_contribution_pct: f64,
    pub triggered_factors: Vec<Factor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub id: String,
    pub geometry: Polygon,
    pub properties: HotspotProperties,
    pub reason: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeverityDistribution {
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotSummary {
    pub total_hotspots: usize,
    pub total_high_risk_area_ha: f64,
    pub severity_distribution: SeverityDistribution,
    pub dominant_factors: Vec<Factor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationMetrics {
    pub high_veg_reduction_pct: Option<f64>,
    pub flat_terrain_reduction_pct: Option<f64>,
    pub bare_soil_increase_pct: Option<f64>,
    pub model_valid: bool,
    pub notes: String,
}

/// 預測來源的地理涵蓋範圍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Europe,
    Global,
    OutOfCoverage,
    Error,
}

/// 具涵蓋範圍概念的來源結果。超出範圍是合法結果，不是錯誤。
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction<T> {
    Available { value: T, coverage: Coverage },
    OutOfCoverage { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateContext {
    pub annual_mean_temp_c: f64,
    pub annual_mean_precip_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilContext {
    pub classification: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarbonEstimate {
    pub carbon_rate_mg_ha_yr: f64,
    pub climate: Option<ClimateContext>,
    pub soil: Option<SoilContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropYieldRecord {
    pub yield_t_ha: Option<f64>,
    pub crop_name: String,
    pub location: Coordinate,
    pub week: u32,
    pub coverage: Coverage,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarbonRecord {
    pub carbon_rate_mg_ha_yr: Option<f64>,
    pub location: Coordinate,
    pub climate: Option<ClimateContext>,
    pub soil: Option<SoilContext>,
    pub coverage: Coverage,
    pub error: Option<String>,
}

/// 1x1 透明 PNG，影像來源失敗時的替代圖
pub const PLACEHOLDER_IMAGE_DATA: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatelliteImage {
    pub url: Option<String>,
    pub data: Option<String>,
    pub mime_type: String,
    pub source: String,
    pub placeholder: bool,
    pub error: Option<String>,
}

impl SatelliteImage {
    pub fn placeholder(error: Option<String>) -> Self {
        Self {
            url: None,
            data: Some(PLACEHOLDER_IMAGE_DATA.to_string()),
            mime_type: "image/png".to_string(),
            source: "placeholder".to_string(),
            placeholder: true,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Erosion,
    CropYield,
    Carbon,
    Imagery,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Erosion,
        SourceKind::CropYield,
        SourceKind::Carbon,
        SourceKind::Imagery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Erosion => "erosion",
            SourceKind::CropYield => "crop_yield",
            SourceKind::Carbon => "carbon",
            SourceKind::Imagery => "imagery",
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            SourceKind::Erosion => Duration::from_secs(60),
            SourceKind::CropYield => Duration::from_secs(20),
            SourceKind::Carbon => Duration::from_secs(30),
            SourceKind::Imagery => Duration::from_secs(20),
        }
    }

    pub fn required_by_default(&self) -> bool {
        matches!(self, SourceKind::Erosion)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 單一來源的呼叫政策
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub timeout: Duration,
    /// 必要來源失敗時整體 `success` 為 false
    pub required: bool,
}

impl SourceSettings {
    pub fn for_kind(kind: SourceKind) -> Self {
        Self {
            kind,
            timeout: kind.default_timeout(),
            required: kind.required_by_default(),
        }
    }
}

/// 各因子的觸發門檻，`None` 表示該因子不參與判定
#[derive(Debug, Clone, PartialEq)]
pub struct FactorLimits {
    pub r: Option<f64>,
    pub k: Option<f64>,
    pub ls: Option<f64>,
    pub c: Option<f64>,
    pub p: Option<f64>,
}

impl FactorLimits {
    pub fn get(&self, factor: Factor) -> Option<f64> {
        match factor {
            Factor::R => self.r,
            Factor::K => self.k,
            Factor::Ls => self.ls,
            Factor::C => self.c,
            Factor::P => self.p,
        }
    }
}

impl Default for FactorLimits {
    fn default() -> Self {
        Self {
            r: None,
            k: None,
            ls: Some(5.0),
            c: Some(0.12),
            p: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotspotThresholds {
    /// t/ha/yr
    pub high_risk: f64,
    /// 候選區塊邊長（格數）
    pub block_size: usize,
    pub high_multiplier: f64,
    pub critical_multiplier: f64,
    pub factor_limits: FactorLimits,
}

impl Default for HotspotThresholds {
    fn default() -> Self {
        Self {
            high_risk: 20.0,
            block_size: 4,
            high_multiplier: 2.0,
            critical_multiplier: 4.0,
            factor_limits: FactorLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// 單次請求可覆寫的選項
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub p_toggle: Option<bool>,
    #[serde(default)]
    pub week: Option<u32>,
    #[serde(default)]
    pub crop_name: Option<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

/// 入站請求：多邊形頂點 `[lon, lat]` 與選項
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub coordinates: Vec<[f64; 2]>,
    #[serde(default)]
    pub options: RequestOptions,
}

/// 已套用預設值後的選項
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOptions {
    pub threshold: f64,
    pub p_toggle: bool,
    pub week: u32,
    pub crop_name: String,
    pub date_range: Option<DateRange>,
}

/// 傳給每個外部來源的查詢內容
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub polygon: Polygon,
    pub metadata: PolygonMetadata,
    pub options: ResolvedOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOutcome {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub status: SourceOutcome,
    pub required: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// 單次請求的完整回應文件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseDocument {
    pub success: bool,
    /// 秒
    pub computation_time: f64,
    pub timestamp: DateTime<Utc>,
    pub polygon: Polygon,
    pub polygon_metadata: PolygonMetadata,
    pub satellite_image: SatelliteImage,
    pub erosion: Option<ErosionStatistics>,
    pub factors: Option<FactorBreakdown>,
    pub highlights: Vec<Hotspot>,
    pub num_hotspots: usize,
    pub hotspot_summary: HotspotSummary,
    pub validation: ValidationMetrics,
    pub crop_yield: CropYieldRecord,
    pub carbon_sequestration: CarbonRecord,
    pub tile_urls: TileUrls,
    pub sources: BTreeMap<SourceKind, SourceStatus>,
    pub error: Option<String>,
}
