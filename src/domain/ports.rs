use crate::domain::model::{
    AreaFormula, CarbonEstimate, ErosionOutput, HotspotThresholds, Prediction, SatelliteImage,
    SourceKind, SourceRequest, SourceSettings,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 外部計算來源（侵蝕引擎、產量模型、碳模型、衛星影像）
#[async_trait]
pub trait Source: Send + Sync {
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn fetch(&self, request: &SourceRequest) -> Result<Self::Output>;
}

pub type ErosionSource = dyn Source<Output = ErosionOutput>;
pub type CropYieldSource = dyn Source<Output = Prediction<f64>>;
pub type CarbonSource = dyn Source<Output = Prediction<CarbonEstimate>>;
pub type ImagerySource = dyn Source<Output = SatelliteImage>;

pub trait ConfigProvider: Send + Sync {
    fn source_settings(&self, kind: SourceKind) -> SourceSettings;
    fn area_formula(&self) -> AreaFormula;
    fn buffer_meters(&self) -> f64;
    fn max_area_km2(&self) -> f64;
    fn hotspot_thresholds(&self) -> HotspotThresholds;
    fn default_week(&self) -> u32;
    fn default_crop_name(&self) -> &str;
    fn default_p_toggle(&self) -> bool;
}
