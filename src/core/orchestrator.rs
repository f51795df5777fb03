use crate::core::adapter::SourceAdapter;
use crate::core::assembler::{AssemblyInput, ResponseAssembler};
use crate::core::geometry::PolygonValidator;
use crate::core::hotspot::HotspotDetector;
use crate::core::sensitivity;
use crate::domain::model::{
    AnalysisRequest, PolygonMetadata, ResolvedOptions, ResponseDocument, SourceKind,
    SourceRequest, SourceSettings,
};
use crate::domain::ports::{
    CarbonSource, ConfigProvider, CropYieldSource, ErosionSource, ImagerySource,
};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// 四個外部來源的實作
#[derive(Clone)]
pub struct Sources {
    pub erosion: Arc<ErosionSource>,
    pub crop_yield: Arc<CropYieldSource>,
    pub carbon: Arc<CarbonSource>,
    pub imagery: Arc<ImagerySource>,
}

/// 單次分析流程：驗證 → 並行呼叫來源 → 熱點偵測 → 組裝回應
pub struct Orchestrator<C: ConfigProvider> {
    config: C,
    sources: Sources,
    validator: PolygonValidator,
    assembler: ResponseAssembler,
    monitor: SystemMonitor,
}

impl<C: ConfigProvider> Orchestrator<C> {
    pub fn new(config: C, sources: Sources) -> Self {
        Self::new_with_monitoring(config, sources, false)
    }

    pub fn new_with_monitoring(config: C, sources: Sources, monitor_enabled: bool) -> Self {
        let validator = PolygonValidator::new(config.area_formula(), config.max_area_km2());
        Self {
            config,
            sources,
            validator,
            assembler: ResponseAssembler::new(),
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// 只有多邊形不合法時回傳錯誤，且此時不會呼叫任何來源。
    /// 其餘失敗都會落在回應文件內對應的欄位。
    pub async fn run(&self, request: AnalysisRequest) -> Result<ResponseDocument> {
        let started_at = Utc::now();
        let started = Instant::now();
        self.monitor.log_stats("Analysis start");

        let polygon = self.validator.validate(&request.coordinates)?;
        let metadata = self.validator.derive_metadata(&polygon);
        tracing::info!(
            "📐 Polygon accepted: {} vertices, {:.3} km², centroid ({:.5}, {:.5})",
            metadata.vertex_count,
            metadata.area_km2,
            metadata.centroid.lon,
            metadata.centroid.lat
        );

        let options = self.resolve_options(&request);
        // 呼叫政策只讀一次，介面卡與狀態區塊共用同一份
        let policies: [SourceSettings; 4] =
            SourceKind::ALL.map(|kind| self.config.source_settings(kind));
        let [erosion_policy, crop_policy, carbon_policy, imagery_policy] = policies.clone();

        let erosion_request = self.erosion_request(&polygon, &metadata, &options);
        let aux_request = SourceRequest {
            polygon: polygon.clone(),
            metadata: metadata.clone(),
            options: options.clone(),
        };

        let erosion = SourceAdapter::new(Arc::clone(&self.sources.erosion), erosion_policy);
        let crop = SourceAdapter::new(Arc::clone(&self.sources.crop_yield), crop_policy);
        let carbon = SourceAdapter::new(Arc::clone(&self.sources.carbon), carbon_policy);
        let imagery = SourceAdapter::new(Arc::clone(&self.sources.imagery), imagery_policy);

        // 等全部來源（成功或失敗）回來才往下走
        let fan_out = Instant::now();
        let (erosion_result, crop_result, carbon_result, imagery_result) = tokio::join!(
            erosion.invoke(&erosion_request),
            crop.invoke(&aux_request),
            carbon.invoke(&aux_request),
            imagery.invoke(&aux_request),
        );
        tracing::info!("⏱️ Sources settled in {}ms", fan_out.elapsed().as_millis());
        self.monitor.log_stats("Sources settled");

        let erosion_result =
            erosion_result.map(|output| sensitivity::normalize_erosion(output, metadata.area_ha));

        let mut thresholds = self.config.hotspot_thresholds();
        thresholds.high_risk = options.threshold;
        let detector = HotspotDetector::new(thresholds);
        let hotspots = detector.detect_output(erosion_result.value(), &polygon, &metadata);
        tracing::info!("🔥 {} hotspot(s) detected", hotspots.len());

        let validation = sensitivity::validation_metrics(
            erosion_result.value().map(|output| &output.summary.factors),
        );

        let document = self.assembler.assemble(AssemblyInput {
            polygon: &polygon,
            metadata: &metadata,
            options: &options,
            erosion: &erosion_result,
            hotspots: &hotspots,
            validation: &validation,
            crop: &crop_result,
            carbon: &carbon_result,
            imagery: &imagery_result,
            policies: &policies,
            started_at,
            elapsed: started.elapsed(),
        });
        self.monitor.log_stats("Analysis complete");

        if document.success {
            tracing::info!(
                "✅ Analysis completed in {:.3}s",
                document.computation_time
            );
        } else {
            tracing::warn!(
                "⚠️ Analysis completed without required data in {:.3}s: {}",
                document.computation_time,
                document.error.as_deref().unwrap_or_default()
            );
        }

        Ok(document)
    }

    fn resolve_options(&self, request: &AnalysisRequest) -> ResolvedOptions {
        let options = &request.options;
        ResolvedOptions {
            threshold: options
                .threshold
                .filter(|t| t.is_finite() && *t > 0.0)
                .unwrap_or_else(|| self.config.hotspot_thresholds().high_risk),
            p_toggle: options
                .p_toggle
                .unwrap_or_else(|| self.config.default_p_toggle()),
            week: options
                .week
                .filter(|week| (1..=53).contains(week))
                .unwrap_or_else(|| self.config.default_week()),
            crop_name: options
                .crop_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| self.config.default_crop_name().to_string()),
            date_range: options.date_range.clone(),
        }
    }

    /// 侵蝕查詢使用緩衝後的多邊形；其他來源只需要質心
    fn erosion_request(
        &self,
        polygon: &crate::domain::model::Polygon,
        metadata: &PolygonMetadata,
        options: &ResolvedOptions,
    ) -> SourceRequest {
        let buffer_meters = self.config.buffer_meters();
        let polygon = if buffer_meters > 0.0 {
            tracing::debug!("🧭 Buffering erosion query polygon by {}m", buffer_meters);
            PolygonValidator::buffer(polygon, buffer_meters)
        } else {
            polygon.clone()
        };

        SourceRequest {
            polygon,
            metadata: metadata.clone(),
            options: options.clone(),
        }
    }
}
