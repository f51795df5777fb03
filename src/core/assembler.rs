use crate::core::adapter::SourceResult;
use crate::core::sensitivity::{self, round_to};
use crate::domain::model::{
    CarbonEstimate, CarbonRecord, Coverage, CropYieldRecord, ErosionOutput, Hotspot,
    HotspotSummary, Polygon, PolygonMetadata, Prediction, ResolvedOptions, ResponseDocument,
    SatelliteImage, SourceKind, SourceSettings, SourceStatus, TileUrls, ValidationMetrics,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// 組裝回應所需的全部輸入，全部以借用傳入，組裝時不會改動任何一項
pub struct AssemblyInput<'a> {
    pub polygon: &'a Polygon,
    pub metadata: &'a PolygonMetadata,
    pub options: &'a ResolvedOptions,
    pub erosion: &'a SourceResult<ErosionOutput>,
    pub hotspots: &'a [Hotspot],
    pub validation: &'a ValidationMetrics,
    pub crop: &'a SourceResult<Prediction<f64>>,
    pub carbon: &'a SourceResult<Prediction<CarbonEstimate>>,
    pub imagery: &'a SourceResult<SatelliteImage>,
    pub policies: &'a [SourceSettings],
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseAssembler;

impl ResponseAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, input: AssemblyInput<'_>) -> ResponseDocument {
        let sources = source_statuses(&input);
        let failed_required: Vec<String> = sources
            .iter()
            .filter(|(_, status)| status.required && status.error.is_some())
            .map(|(kind, status)| {
                format!("{}: {}", kind, status.error.as_deref().unwrap_or_default())
            })
            .collect();
        let success = failed_required.is_empty();

        let erosion = input.erosion.value();
        let dominant_factors = erosion
            .map(|output| sensitivity::dominant_factors(&output.summary.factors))
            .unwrap_or_default();

        ResponseDocument {
            success,
            computation_time: round_to(input.elapsed.as_secs_f64(), 3),
            timestamp: input.started_at,
            polygon: input.polygon.clone(),
            polygon_metadata: input.metadata.clone(),
            satellite_image: satellite_image(input.imagery),
            erosion: erosion.map(|output| output.summary.erosion.clone()),
            factors: erosion.map(|output| output.summary.factors.clone()),
            highlights: input.hotspots.to_vec(),
            num_hotspots: input.hotspots.len(),
            hotspot_summary: HotspotSummary::from_hotspots(input.hotspots, dominant_factors),
            validation: input.validation.clone(),
            crop_yield: crop_record(input.crop, input.metadata, input.options),
            carbon_sequestration: carbon_record(input.carbon, input.metadata),
            tile_urls: erosion
                .and_then(|output| output.tile_urls.clone())
                .unwrap_or_default(),
            sources,
            error: (!success).then(|| {
                format!("Required source failed ({})", failed_required.join("; "))
            }),
        }
    }
}

fn source_statuses(input: &AssemblyInput<'_>) -> BTreeMap<SourceKind, SourceStatus> {
    let required = |kind: SourceKind| {
        input
            .policies
            .iter()
            .find(|settings| settings.kind == kind)
            .map(|settings| settings.required)
            .unwrap_or_else(|| kind.required_by_default())
    };

    BTreeMap::from([
        (
            SourceKind::Erosion,
            input.erosion.status(required(SourceKind::Erosion)),
        ),
        (
            SourceKind::CropYield,
            input.crop.status(required(SourceKind::CropYield)),
        ),
        (
            SourceKind::Carbon,
            input.carbon.status(required(SourceKind::Carbon)),
        ),
        (
            SourceKind::Imagery,
            input.imagery.status(required(SourceKind::Imagery)),
        ),
    ])
}

fn satellite_image(result: &SourceResult<SatelliteImage>) -> SatelliteImage {
    match result {
        SourceResult::Ok { value, .. } => value.clone(),
        SourceResult::Failed { error, .. } => SatelliteImage::placeholder(Some(error.clone())),
    }
}

fn crop_record(
    result: &SourceResult<Prediction<f64>>,
    metadata: &PolygonMetadata,
    options: &ResolvedOptions,
) -> CropYieldRecord {
    let (yield_t_ha, coverage, error) = match result {
        SourceResult::Ok {
            value: Prediction::Available { value, coverage },
            ..
        } => (Some(round_to(*value, 2)), *coverage, None),
        SourceResult::Ok {
            value: Prediction::OutOfCoverage { reason },
            ..
        } => (None, Coverage::OutOfCoverage, Some(reason.clone())),
        SourceResult::Failed { error, .. } => (None, Coverage::Error, Some(error.clone())),
    };

    CropYieldRecord {
        yield_t_ha,
        crop_name: options.crop_name.clone(),
        location: metadata.centroid,
        week: options.week,
        coverage,
        error,
    }
}

fn carbon_record(
    result: &SourceResult<Prediction<CarbonEstimate>>,
    metadata: &PolygonMetadata,
) -> CarbonRecord {
    let location = metadata.centroid;
    match result {
        SourceResult::Ok {
            value: Prediction::Available { value, coverage },
            ..
        } => CarbonRecord {
            carbon_rate_mg_ha_yr: Some(round_to(value.carbon_rate_mg_ha_yr, 4)),
            location,
            climate: value.climate.clone(),
            soil: value.soil.clone(),
            coverage: *coverage,
            error: None,
        },
        SourceResult::Ok {
            value: Prediction::OutOfCoverage { reason },
            ..
        } => CarbonRecord {
            carbon_rate_mg_ha_yr: None,
            location,
            climate: None,
            soil: None,
            coverage: Coverage::OutOfCoverage,
            error: Some(reason.clone()),
        },
        SourceResult::Failed { error, .. } => CarbonRecord {
            carbon_rate_mg_ha_yr: None,
            location,
            climate: None,
            soil: None,
            coverage: Coverage::Error,
            error: Some(error.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::PolygonValidator;
    use crate::core::sensitivity::fixtures;
    use crate::domain::model::{AreaFormula, ClimateContext, SoilContext};

    struct Fixture {
        polygon: Polygon,
        metadata: PolygonMetadata,
        options: ResolvedOptions,
        policies: Vec<SourceSettings>,
        started_at: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let validator = PolygonValidator::new(AreaFormula::Geodesic, 1000.0);
        let polygon = validator
            .validate(&[[-1.5, 52.0], [-1.4, 52.0], [-1.45, 52.05]])
            .unwrap();
        let metadata = validator.derive_metadata(&polygon);
        Fixture {
            polygon,
            metadata,
            options: ResolvedOptions {
                threshold: 20.0,
                p_toggle: false,
                week: 25,
                crop_name: "Soft wheat".to_string(),
                date_range: None,
            },
            policies: SourceKind::ALL.into_iter().map(SourceSettings::for_kind).collect(),
            started_at: DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn ok<T>(value: T) -> SourceResult<T> {
        SourceResult::Ok {
            value,
            elapsed: Duration::from_millis(120),
        }
    }

    fn failed<T>(error: &str) -> SourceResult<T> {
        SourceResult::Failed {
            error: error.to_string(),
            elapsed: Duration::from_millis(80),
        }
    }

    fn erosion_output() -> ErosionOutput {
        sensitivity::normalize_erosion(
            ErosionOutput {
                summary: fixtures::summary(12.0, fixtures::breakdown(900.0, 0.03, 2.0, 0.1, 1.0)),
                grid: None,
                factor_grids: None,
                tile_urls: None,
            },
            100.0,
        )
    }

    fn carbon() -> Prediction<CarbonEstimate> {
        Prediction::Available {
            value: CarbonEstimate {
                carbon_rate_mg_ha_yr: 1.234567,
                climate: Some(ClimateContext {
                    annual_mean_temp_c: 9.8,
                    annual_mean_precip_mm: 650.0,
                }),
                soil: Some(SoilContext {
                    classification: "Luvisols".to_string(),
                }),
            },
            coverage: Coverage::Global,
        }
    }

    fn assemble(
        f: &Fixture,
        erosion: &SourceResult<ErosionOutput>,
        crop: &SourceResult<Prediction<f64>>,
        carbon: &SourceResult<Prediction<CarbonEstimate>>,
        imagery: &SourceResult<SatelliteImage>,
    ) -> ResponseDocument {
        let validation = sensitivity::validation_metrics(erosion.value().map(|o| &o.summary.factors));
        ResponseAssembler::new().assemble(AssemblyInput {
            polygon: &f.polygon,
            metadata: &f.metadata,
            options: &f.options,
            erosion,
            hotspots: &[],
            validation: &validation,
            crop,
            carbon,
            imagery,
            policies: &f.policies,
            started_at: f.started_at,
            elapsed: Duration::from_millis(1234),
        })
    }

    fn image() -> SatelliteImage {
        SatelliteImage {
            url: Some("https://tiles.example.com/s2/abc.png".to_string()),
            data: None,
            mime_type: "image/png".to_string(),
            source: "sentinel-2".to_string(),
            placeholder: false,
            error: None,
        }
    }

    #[test]
    fn test_all_sources_succeed() {
        let f = fixture();
        let doc = assemble(
            &f,
            &ok(erosion_output()),
            &ok(Prediction::Available {
                value: 7.456,
                coverage: Coverage::Europe,
            }),
            &ok(carbon()),
            &ok(image()),
        );

        assert!(doc.success);
        assert!(doc.error.is_none());
        assert_eq!(doc.computation_time, 1.234);
        assert_eq!(doc.timestamp, f.started_at);
        assert_eq!(doc.crop_yield.yield_t_ha, Some(7.46));
        assert_eq!(doc.crop_yield.coverage, Coverage::Europe);
        assert_eq!(doc.carbon_sequestration.carbon_rate_mg_ha_yr, Some(1.2346));
        assert_eq!(doc.factors.as_ref().unwrap().ls.mean, 2.0);
        assert!(doc.validation.model_valid);
        assert!(!doc.satellite_image.placeholder);
        assert_eq!(doc.tile_urls, TileUrls::default());
    }

    #[test]
    fn test_erosion_failure_clears_success() {
        let f = fixture();
        let doc = assemble(
            &f,
            &failed("timeout"),
            &ok(Prediction::Available {
                value: 7.0,
                coverage: Coverage::Europe,
            }),
            &ok(carbon()),
            &ok(image()),
        );

        assert!(!doc.success);
        assert!(doc.erosion.is_none());
        assert!(doc.factors.is_none());
        assert!(!doc.validation.model_valid);
        assert!(doc.error.unwrap().contains("erosion: timeout"));
        assert_eq!(doc.crop_yield.yield_t_ha, Some(7.0));
    }

    #[test]
    fn test_out_of_coverage_is_not_an_error_status() {
        let f = fixture();
        let doc = assemble(
            &f,
            &ok(erosion_output()),
            &ok(Prediction::OutOfCoverage {
                reason: "Location outside Europe coverage".to_string(),
            }),
            &ok(carbon()),
            &ok(image()),
        );

        assert!(doc.success);
        assert_eq!(doc.crop_yield.yield_t_ha, None);
        assert_eq!(doc.crop_yield.coverage, Coverage::OutOfCoverage);
        assert!(doc.crop_yield.error.is_some());
        assert!(doc.sources[&SourceKind::CropYield].error.is_none());
    }

    #[test]
    fn test_auxiliary_failures_degrade_only_their_fields() {
        let f = fixture();
        let doc = assemble(
            &f,
            &ok(erosion_output()),
            &failed("crop_yield source failed: model missing"),
            &failed("carbon source failed: sklearn version mismatch"),
            &failed("timeout"),
        );

        assert!(doc.success);
        assert_eq!(doc.crop_yield.coverage, Coverage::Error);
        assert_eq!(doc.carbon_sequestration.carbon_rate_mg_ha_yr, None);
        assert_eq!(doc.carbon_sequestration.coverage, Coverage::Error);
        assert!(doc.satellite_image.placeholder);
        assert!(doc.satellite_image.data.is_some());
        assert_eq!(doc.satellite_image.error.as_deref(), Some("timeout"));
        assert!(doc.erosion.is_some());
    }

    #[test]
    fn test_required_auxiliary_source_is_declarative() {
        let mut f = fixture();
        for policy in f.policies.iter_mut() {
            if policy.kind == SourceKind::Imagery {
                policy.required = true;
            }
        }
        let doc = assemble(
            &f,
            &ok(erosion_output()),
            &ok(Prediction::Available {
                value: 7.0,
                coverage: Coverage::Europe,
            }),
            &ok(carbon()),
            &failed("timeout"),
        );
        assert!(!doc.success);
        assert!(doc.erosion.is_some());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let f = fixture();
        let erosion = ok(erosion_output());
        let crop = ok(Prediction::Available {
            value: 7.0,
            coverage: Coverage::Europe,
        });
        let carbon = ok(carbon());
        let imagery = failed("imagery source failed: 401");

        let first = assemble(&f, &erosion, &crop, &carbon, &imagery);
        let second = assemble(&f, &erosion, &crop, &carbon, &imagery);
        assert_eq!(first, second);
    }
}
