//! Rule-based erosion hotspot detection.
//!
//! The erosion surface is partitioned into square blocks of
//! `block_size` x `block_size` cells. A block becomes a hotspot when its
//! mean erosion exceeds the high-risk threshold and at least one RUSLE
//! factor exceeds its own limit inside the block.
//!
//! Dominant factor: each factor's block mean is compared against its mean
//! over the whole grid, and the share of `ln(block / overall)` among the
//! elevated factors is its contribution. When no factor is elevated
//! relative to the rest of the polygon, the triggered factors are ranked
//! by how far they exceed their limits instead. Exact ties resolve in the
//! order LS > C > R > K > P.

use crate::core::geometry::METERS_PER_DEGREE;
use crate::core::sensitivity::round_to;
use crate::domain::model::{
    Coordinate, ErosionGrid, ErosionOutput, Factor, FactorGrids, Hotspot, HotspotProperties,
    HotspotSummary, HotspotThresholds, Polygon, PolygonMetadata, Severity, SeverityDistribution,
};

#[derive(Debug, Clone)]
pub struct HotspotDetector {
    thresholds: HotspotThresholds,
}

/// 候選區域的彙總統計
struct Region {
    geometry: Polygon,
    area_ha: f64,
    mean: f64,
    max: f64,
    factor_means: Vec<(Factor, Option<f64>)>,
    contributions: Vec<(Factor, f64)>,
}

impl HotspotDetector {
    pub fn new(thresholds: HotspotThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &HotspotThresholds {
        &self.thresholds
    }

    /// 侵蝕來源失敗（沒有輸出）時回傳空清單；沒有柵格時以全區統計當作單一候選區域
    pub fn detect_output(
        &self,
        output: Option<&ErosionOutput>,
        polygon: &Polygon,
        metadata: &PolygonMetadata,
    ) -> Vec<Hotspot> {
        let Some(output) = output else {
            return Vec::new();
        };

        match (&output.grid, &output.factor_grids) {
            (Some(grid), Some(factor_grids)) if grid.is_consistent() => {
                self.detect(grid, factor_grids)
            }
            _ => self.detect_polygon(output, polygon, metadata),
        }
    }

    pub fn detect(&self, grid: &ErosionGrid, factor_grids: &FactorGrids) -> Vec<Hotspot> {
        if !grid.is_consistent() {
            tracing::warn!(
                "🗺️ Erosion grid shape {}x{} does not match {} values, skipping hotspot detection",
                grid.rows,
                grid.cols,
                grid.values.len()
            );
            return Vec::new();
        }

        let usable: Vec<(Factor, &[Option<f64>])> = Factor::ALL
            .into_iter()
            .map(|factor| (factor, factor_grids.get(factor)))
            .filter(|(_, values)| values.len() == grid.cell_count())
            .collect();

        let overall: Vec<(Factor, Option<f64>)> = usable
            .iter()
            .map(|(factor, values)| {
                let cells = (0..grid.cell_count()).filter(|&i| cell_value(&grid.values, i).is_some());
                (*factor, mean_of(cells.filter_map(|i| cell_value(values, i))))
            })
            .collect();

        let block = self.thresholds.block_size.max(1);
        let mut candidates: Vec<Hotspot> = Vec::new();

        for row_start in (0..grid.rows).step_by(block) {
            for col_start in (0..grid.cols).step_by(block) {
                let row_end = (row_start + block).min(grid.rows);
                let col_end = (col_start + block).min(grid.cols);

                let cells: Vec<usize> = (row_start..row_end)
                    .flat_map(|row| (col_start..col_end).map(move |col| row * grid.cols + col))
                    .filter(|&i| cell_value(&grid.values, i).is_some())
                    .collect();
                if cells.is_empty() {
                    continue;
                }

                let erosion: Vec<f64> = cells
                    .iter()
                    .filter_map(|&i| cell_value(&grid.values, i))
                    .collect();
                let mean = erosion.iter().sum::<f64>() / erosion.len() as f64;
                let max = erosion.iter().copied().fold(f64::NEG_INFINITY, f64::max);

                let factor_means: Vec<(Factor, Option<f64>)> = usable
                    .iter()
                    .map(|(factor, values)| {
                        (*factor, mean_of(cells.iter().filter_map(|&i| cell_value(values, i))))
                    })
                    .collect();

                let contributions = relative_contributions(&factor_means, &overall);
                let region = Region {
                    geometry: block_geometry(grid, row_start, row_end, col_start, col_end),
                    area_ha: cells_area_ha(grid, &cells),
                    mean,
                    max,
                    factor_means,
                    contributions,
                };

                if let Some(hotspot) = self.evaluate(region) {
                    candidates.push(hotspot);
                }
            }
        }

        finalize(candidates)
    }

    fn detect_polygon(
        &self,
        output: &ErosionOutput,
        polygon: &Polygon,
        metadata: &PolygonMetadata,
    ) -> Vec<Hotspot> {
        let summary = &output.summary;
        let region = Region {
            geometry: polygon.clone(),
            area_ha: metadata.area_ha,
            mean: summary.erosion.mean,
            max: summary.erosion.max,
            factor_means: summary
                .factors
                .iter()
                .map(|(factor, stats)| (factor, Some(stats.mean)))
                .collect(),
            contributions: summary
                .factors
                .iter()
                .filter_map(|(factor, stats)| stats.contribution_pct.map(|pct| (factor, pct)))
                .collect(),
        };

        finalize(self.evaluate(region).into_iter().collect())
    }

    fn evaluate(&self, region: Region) -> Option<Hotspot> {
        let threshold = self.thresholds.high_risk;
        if !region.mean.is_finite() || region.mean <= threshold {
            return None;
        }

        let triggered: Vec<(Factor, f64, f64)> = Factor::PRIORITY
            .into_iter()
            .filter_map(|factor| {
                let limit = self.thresholds.factor_limits.get(factor)?;
                let mean = lookup(&region.factor_means, factor).flatten()?;
                (mean > limit).then_some((factor, mean, limit))
            })
            .collect();
        if triggered.is_empty() {
            return None;
        }

        let mut contributions = region.contributions;
        if contributions.iter().all(|(_, pct)| *pct <= 0.0) {
            contributions = exceedance_contributions(&triggered);
        }
        let (dominant_factor, dominant_pct) = pick_dominant(&contributions);

        let ratio = region.mean / threshold;
        let severity = if ratio >= self.thresholds.critical_multiplier {
            Severity::Critical
        } else if ratio >= self.thresholds.high_multiplier {
            Severity::High
        } else {
            Severity::Moderate
        };

        let conditions: Vec<String> = triggered
            .iter()
            .map(|(factor, mean, limit)| {
                format!(
                    "{} factor {:.3} exceeds {:.3} ({})",
                    factor,
                    mean,
                    limit,
                    factor.description()
                )
            })
            .collect();
        let reason = format!(
            "Mean erosion ({:.1} t/ha/yr) exceeds threshold ({:.1} t/ha/yr); {}",
            region.mean,
            threshold,
            conditions.join("; ")
        );

        Some(Hotspot {
            id: String::new(),
            geometry: region.geometry,
            properties: HotspotProperties {
                area_ha: round_to(region.area_ha, 2),
                mean_erosion: round_to(region.mean, 2),
                max_erosion: round_to(region.max, 2),
                dominant_factor,
                dominant_contribution_pct: round_to(dominant_pct, 1),
                triggered_factors: triggered.iter().map(|(factor, _, _)| *factor).collect(),
            },
            reason,
            severity,
        })
    }
}

impl HotspotSummary {
    pub fn from_hotspots(hotspots: &[Hotspot], dominant_factors: Vec<Factor>) -> Self {
        let mut distribution = SeverityDistribution::default();
        for hotspot in hotspots {
            match hotspot.severity {
                Severity::Moderate => distribution.moderate += 1,
                Severity::High => distribution.high += 1,
                Severity::Critical => distribution.critical += 1,
            }
        }

        Self {
            total_hotspots: hotspots.len(),
            total_high_risk_area_ha: round_to(
                hotspots.iter().map(|h| h.properties.area_ha).sum(),
                2,
            ),
            severity_distribution: distribution,
            dominant_factors,
        }
    }
}

/// 依平均侵蝕量由高到低排序（同值保持柵格順序），再依序編號
fn finalize(mut hotspots: Vec<Hotspot>) -> Vec<Hotspot> {
    hotspots.sort_by(|a, b| {
        b.properties
            .mean_erosion
            .total_cmp(&a.properties.mean_erosion)
    });
    for (index, hotspot) in hotspots.iter_mut().enumerate() {
        hotspot.id = format!("hotspot_{}", index + 1);
    }
    hotspots
}

fn cell_value(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten().filter(|v| v.is_finite())
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn lookup<T: Copy>(pairs: &[(Factor, T)], factor: Factor) -> Option<T> {
    pairs.iter().find(|(f, _)| *f == factor).map(|(_, value)| *value)
}

fn relative_contributions(
    region: &[(Factor, Option<f64>)],
    overall: &[(Factor, Option<f64>)],
) -> Vec<(Factor, f64)> {
    let elevation: Vec<(Factor, f64)> = region
        .iter()
        .map(|(factor, mean)| {
            let lift = match (mean, lookup(overall, *factor).flatten()) {
                (Some(local), Some(global)) if *local > 0.0 && global > 0.0 => {
                    (local / global).ln().max(0.0)
                }
                _ => 0.0,
            };
            (*factor, lift)
        })
        .collect();
    as_percentages(elevation)
}

fn exceedance_contributions(triggered: &[(Factor, f64, f64)]) -> Vec<(Factor, f64)> {
    as_percentages(
        triggered
            .iter()
            .map(|(factor, mean, limit)| (*factor, if *limit > 0.0 { mean / limit - 1.0 } else { *mean }))
            .collect(),
    )
}

fn as_percentages(weights: Vec<(Factor, f64)>) -> Vec<(Factor, f64)> {
    let total: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 {
        return weights.into_iter().map(|(factor, _)| (factor, 0.0)).collect();
    }
    weights
        .into_iter()
        .map(|(factor, w)| (factor, w.max(0.0) / total * 100.0))
        .collect()
}

/// 取貢獻最大的因子；必須嚴格大於才取代，因此平手時依 PRIORITY 決定
fn pick_dominant(contributions: &[(Factor, f64)]) -> (Factor, f64) {
    let mut best = (Factor::PRIORITY[0], f64::NEG_INFINITY);
    for factor in Factor::PRIORITY {
        if let Some(pct) = lookup(contributions, factor) {
            if pct > best.1 {
                best = (factor, pct);
            }
        }
    }
    if best.1.is_finite() {
        best
    } else {
        (Factor::PRIORITY[0], 0.0)
    }
}

fn block_geometry(
    grid: &ErosionGrid,
    row_start: usize,
    row_end: usize,
    col_start: usize,
    col_end: usize,
) -> Polygon {
    let west = grid.origin_lon + col_start as f64 * grid.cell_size_deg;
    let east = grid.origin_lon + col_end as f64 * grid.cell_size_deg;
    let north = grid.origin_lat - row_start as f64 * grid.cell_size_deg;
    let south = grid.origin_lat - row_end as f64 * grid.cell_size_deg;
    Polygon::from_ring(vec![
        Coordinate::new(west, south),
        Coordinate::new(east, south),
        Coordinate::new(east, north),
        Coordinate::new(west, north),
    ])
}

fn cells_area_ha(grid: &ErosionGrid, cells: &[usize]) -> f64 {
    let side_m = grid.cell_size_deg * METERS_PER_DEGREE;
    cells
        .iter()
        .map(|&i| {
            let row = i / grid.cols;
            let lat = grid.origin_lat - (row as f64 + 0.5) * grid.cell_size_deg;
            side_m * side_m * lat.to_radians().cos() / 10_000.0
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::PolygonValidator;
    use crate::core::sensitivity::{self, fixtures};
    use crate::domain::model::{AreaFormula, FactorLimits};

    fn thresholds(block_size: usize) -> HotspotThresholds {
        HotspotThresholds {
            high_risk: 20.0,
            block_size,
            high_multiplier: 2.0,
            critical_multiplier: 4.0,
            factor_limits: FactorLimits::default(),
        }
    }

    /// 4x4 柵格，左上 2x2 為高侵蝕陡坡區
    fn grid_with_hot_corner() -> (ErosionGrid, FactorGrids) {
        let mut values = vec![Some(5.0); 16];
        let mut ls = vec![Some(1.5); 16];
        let mut c = vec![Some(0.05); 16];
        for i in [0usize, 1, 4, 5] {
            values[i] = Some(50.0);
            ls[i] = Some(8.0);
            c[i] = Some(0.06);
        }
        let grid = ErosionGrid {
            origin_lon: -1.5,
            origin_lat: 52.05,
            cell_size_deg: 0.0125,
            rows: 4,
            cols: 4,
            values,
        };
        let factor_grids = FactorGrids {
            r: vec![Some(900.0); 16],
            k: vec![Some(0.03); 16],
            ls,
            c,
            p: vec![Some(1.0); 16],
        };
        (grid, factor_grids)
    }

    #[test]
    fn test_flags_only_the_hot_block() {
        let (grid, factors) = grid_with_hot_corner();
        let hotspots = HotspotDetector::new(thresholds(2)).detect(&grid, &factors);

        assert_eq!(hotspots.len(), 1);
        let hotspot = &hotspots[0];
        assert_eq!(hotspot.id, "hotspot_1");
        assert_eq!(hotspot.properties.mean_erosion, 50.0);
        assert_eq!(hotspot.properties.dominant_factor, Factor::Ls);
        assert_eq!(hotspot.properties.triggered_factors, vec![Factor::Ls]);
        assert_eq!(hotspot.severity, Severity::High);
        assert!(hotspot.reason.contains("LS factor"));
        assert!(hotspot.reason.contains("exceeds threshold (20.0 t/ha/yr)"));

        let ring = hotspot.geometry.vertices();
        assert!((ring[0].lon - -1.5).abs() < 1e-9);
        assert!((ring[2].lat - 52.05).abs() < 1e-9);
        assert!(hotspot.properties.area_ha > 0.0);
    }

    #[test]
    fn test_high_erosion_without_factor_trigger_is_not_a_hotspot() {
        let (mut grid, _) = grid_with_hot_corner();
        grid.values = vec![Some(60.0); 16];
        let calm = FactorGrids {
            r: vec![Some(900.0); 16],
            k: vec![Some(0.03); 16],
            ls: vec![Some(1.0); 16],
            c: vec![Some(0.05); 16],
            p: vec![Some(1.0); 16],
        };
        assert!(HotspotDetector::new(thresholds(2)).detect(&grid, &calm).is_empty());
    }

    #[test]
    fn test_exact_tie_resolves_by_priority() {
        // 因子在整個柵格上一致，相對提升皆為 0，改用超標比例：LS 6/4 與 C 0.375/0.25 同為 1.5
        let grid = ErosionGrid {
            origin_lon: 0.0,
            origin_lat: 1.0,
            cell_size_deg: 0.01,
            rows: 2,
            cols: 2,
            values: vec![Some(30.0); 4],
        };
        let factors = FactorGrids {
            r: vec![Some(900.0); 4],
            k: vec![Some(0.03); 4],
            ls: vec![Some(6.0); 4],
            c: vec![Some(0.375); 4],
            p: vec![Some(1.0); 4],
        };
        let mut tied = thresholds(2);
        tied.factor_limits = FactorLimits {
            r: None,
            k: None,
            ls: Some(4.0),
            c: Some(0.25),
            p: None,
        };

        let hotspots = HotspotDetector::new(tied).detect(&grid, &factors);
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].properties.dominant_factor, Factor::Ls);
        assert_eq!(hotspots[0].properties.dominant_contribution_pct, 50.0);
        assert_eq!(
            hotspots[0].properties.triggered_factors,
            vec![Factor::Ls, Factor::C]
        );
    }

    #[test]
    fn test_detection_is_deterministic() {
        let (mut grid, factors) = grid_with_hot_corner();
        grid.values[15] = Some(45.0);
        let detector = HotspotDetector::new(thresholds(1));

        let first = detector.detect(&grid, &factors);
        let second = detector.detect(&grid, &factors);
        assert_eq!(first, second);
        // 第 15 格侵蝕偏高但因子未超標，不列入
        assert_eq!(first.len(), 4);
        assert!(first.windows(2).all(|w| w[0].properties.mean_erosion >= w[1].properties.mean_erosion));
    }

    #[test]
    fn test_severity_tiers() {
        let (mut grid, factors) = grid_with_hot_corner();
        for i in [0usize, 1, 4, 5] {
            grid.values[i] = Some(90.0);
        }
        let hotspots = HotspotDetector::new(thresholds(2)).detect(&grid, &factors);
        assert_eq!(hotspots[0].severity, Severity::Critical);

        for i in [0usize, 1, 4, 5] {
            grid.values[i] = Some(25.0);
        }
        let hotspots = HotspotDetector::new(thresholds(2)).detect(&grid, &factors);
        assert_eq!(hotspots[0].severity, Severity::Moderate);
    }

    #[test]
    fn test_inconsistent_grid_yields_nothing() {
        let (mut grid, factors) = grid_with_hot_corner();
        grid.values.pop();
        assert!(HotspotDetector::new(thresholds(2)).detect(&grid, &factors).is_empty());
    }

    #[test]
    fn test_missing_output_yields_nothing() {
        let validator = PolygonValidator::new(AreaFormula::Geodesic, 1000.0);
        let polygon = validator
            .validate(&[[-1.5, 52.0], [-1.4, 52.0], [-1.45, 52.05]])
            .unwrap();
        let metadata = validator.derive_metadata(&polygon);
        let detector = HotspotDetector::new(thresholds(4));
        assert!(detector.detect_output(None, &polygon, &metadata).is_empty());
    }

    #[test]
    fn test_polygon_fallback_without_grid() {
        let validator = PolygonValidator::new(AreaFormula::Geodesic, 1000.0);
        let polygon = validator
            .validate(&[[-1.5, 52.0], [-1.4, 52.0], [-1.45, 52.05]])
            .unwrap();
        let metadata = validator.derive_metadata(&polygon);
        let output = sensitivity::normalize_erosion(
            ErosionOutput {
                summary: fixtures::summary(45.0, fixtures::breakdown(1200.0, 0.035, 3.0, 0.2, 1.0)),
                grid: None,
                factor_grids: None,
                tile_urls: None,
            },
            metadata.area_ha,
        );

        let hotspots = HotspotDetector::new(thresholds(4)).detect_output(Some(&output), &polygon, &metadata);
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].geometry, polygon);
        assert_eq!(hotspots[0].properties.dominant_factor, Factor::C);
        assert_eq!(hotspots[0].properties.triggered_factors, vec![Factor::C]);
        assert_eq!(hotspots[0].severity, Severity::High);
    }

    #[test]
    fn test_summary_counts() {
        let (grid, factors) = grid_with_hot_corner();
        let hotspots = HotspotDetector::new(thresholds(2)).detect(&grid, &factors);
        let summary = HotspotSummary::from_hotspots(&hotspots, vec![Factor::Ls, Factor::C]);
        assert_eq!(summary.total_hotspots, 1);
        assert_eq!(summary.severity_distribution.high, 1);
        assert_eq!(summary.severity_distribution.low, 0);
        assert!(summary.total_high_risk_area_ha > 0.0);
    }
}
