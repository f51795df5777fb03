use crate::domain::model::{ErosionOutput, Factor, FactorBreakdown, ValidationMetrics};

/// 各因子的「正常」基準值，超過部分視為風險貢獻
pub fn baseline(factor: Factor) -> f64 {
    match factor {
        Factor::R => 800.0,
        Factor::K => 0.025,
        Factor::Ls => 1.0,
        Factor::C => 0.05,
        Factor::P => 1.0,
    }
}

/// (mean - baseline) / baseline，低於基準為 0
pub fn normalized_excess(factor: Factor, mean: f64) -> f64 {
    let base = baseline(factor);
    if mean.is_finite() && mean > base {
        (mean - base) / base
    } else {
        0.0
    }
}

/// 各因子對全區侵蝕的貢獻百分比（總和 100）。沒有任何因子高於基準時平均分配。
pub fn factor_contributions(factors: &FactorBreakdown) -> Vec<(Factor, f64)> {
    let excess: Vec<(Factor, f64)> = factors
        .iter()
        .map(|(factor, stats)| (factor, normalized_excess(factor, stats.mean)))
        .collect();
    let total: f64 = excess.iter().map(|(_, value)| value).sum();

    if total <= 0.0 {
        let share = 100.0 / Factor::ALL.len() as f64;
        return Factor::ALL.iter().map(|&f| (f, share)).collect();
    }

    excess
        .into_iter()
        .map(|(factor, value)| (factor, round_to(value / total * 100.0, 1)))
        .collect()
}

/// 貢獻最大的前兩個因子（不含 P），都不高於基準時回傳 `[K, C]`
pub fn dominant_factors(factors: &FactorBreakdown) -> Vec<Factor> {
    let mut ranked: Vec<(Factor, f64)> = Factor::PRIORITY
        .into_iter()
        .filter(|factor| *factor != Factor::P)
        .map(|factor| (factor, normalized_excess(factor, factors.get(factor).mean)))
        .filter(|(_, value)| *value > 0.0)
        .collect();

    // 穩定排序，同分時保留 PRIORITY 順序
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let top: Vec<Factor> = ranked.into_iter().take(2).map(|(factor, _)| factor).collect();
    if top.is_empty() {
        vec![Factor::K, Factor::C]
    } else {
        top
    }
}

/// 植被覆蓋帶來的侵蝕降低百分比
pub fn vegetation_reduction_pct(c_mean: f64) -> f64 {
    round_to(((1.0 - c_mean) * 100.0).clamp(0.0, 99.9), 1)
}

/// 平坦地形（LS 接近 1）所佔百分比的估計
pub fn flat_terrain_pct(ls_mean: f64) -> f64 {
    let flat = if ls_mean <= 1.2 {
        90.0 - (ls_mean - 1.0) * 200.0
    } else if ls_mean <= 2.0 {
        50.0 - (ls_mean - 1.2) * 40.0
    } else if ls_mean <= 5.0 {
        20.0 - (ls_mean - 2.0) * 5.0
    } else {
        (5.0 - (ls_mean - 5.0)).max(0.0)
    };
    round_to(flat.clamp(0.0, 100.0), 1)
}

/// 裸露土壤造成的風險增加百分比
pub fn bare_soil_increase_pct(c_mean: f64) -> f64 {
    let increase = if c_mean > 0.3 {
        (c_mean - 0.1) / 0.1 * 100.0
    } else if c_mean > 0.15 {
        (c_mean - 0.05) / 0.05 * 50.0
    } else {
        ((c_mean - 0.02) / 0.02 * 20.0).max(0.0)
    };
    round_to(increase.clamp(0.0, 500.0), 1)
}

pub fn validation_metrics(factors: Option<&FactorBreakdown>) -> ValidationMetrics {
    let Some(factors) = factors else {
        return ValidationMetrics {
            high_veg_reduction_pct: None,
            flat_terrain_reduction_pct: None,
            bare_soil_increase_pct: None,
            model_valid: false,
            notes: "Erosion computation unavailable".to_string(),
        };
    };

    let finite = factors.iter().all(|(_, stats)| stats.mean.is_finite());
    let sources: Vec<&str> = [Factor::R, Factor::K, Factor::Ls, Factor::C]
        .iter()
        .map(|&f| factors.get(f).source.as_str())
        .filter(|source| !source.is_empty())
        .collect();

    ValidationMetrics {
        high_veg_reduction_pct: Some(vegetation_reduction_pct(factors.c.mean)),
        flat_terrain_reduction_pct: Some(flat_terrain_pct(factors.ls.mean)),
        bare_soil_increase_pct: Some(bare_soil_increase_pct(factors.c.mean)),
        model_valid: finite,
        notes: if sources.is_empty() {
            "Computation based on unlabelled factor sources".to_string()
        } else {
            format!("Computation based on: {}", sources.join(", "))
        },
    }
}

/// 補齊來源沒有提供的欄位：各因子貢獻百分比、全區土壤流失量
pub fn normalize_erosion(mut output: ErosionOutput, area_ha: f64) -> ErosionOutput {
    let contributions = factor_contributions(&output.summary.factors);
    for (factor, pct) in contributions {
        let stats = output.summary.factors.get_mut(factor);
        if stats.contribution_pct.is_none() {
            stats.contribution_pct = Some(pct);
        }
    }

    let erosion = &mut output.summary.erosion;
    if erosion.total_soil_loss.is_none() {
        erosion.total_soil_loss = Some(round_to(erosion.mean * area_ha, 2));
    }

    output
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::model::{ErosionStatistics, ErosionSummary, FactorBreakdown, FactorStats};

    pub fn stats(mean: f64, source: &str) -> FactorStats {
        FactorStats {
            mean,
            stddev: mean * 0.1,
            min: mean * 0.8,
            max: mean * 1.2,
            unit: "dimensionless".to_string(),
            contribution_pct: None,
            source: source.to_string(),
        }
    }

    pub fn breakdown(r: f64, k: f64, ls: f64, c: f64, p: f64) -> FactorBreakdown {
        FactorBreakdown {
            r: stats(r, "CHIRPS"),
            k: stats(k, "SoilGrids"),
            ls: stats(ls, "SRTM"),
            c: stats(c, "Sentinel-2 NDVI"),
            p: stats(p, "No conservation practices"),
        }
    }

    pub fn summary(mean: f64, factors: FactorBreakdown) -> ErosionSummary {
        ErosionSummary {
            erosion: ErosionStatistics {
                mean,
                min: mean * 0.7,
                max: mean * 1.3,
                stddev: mean * 0.15,
                p50: mean,
                p95: mean * 1.25,
                total_soil_loss: None,
                unit: "t/ha/yr".to_string(),
            },
            factors,
        }
    }
}
