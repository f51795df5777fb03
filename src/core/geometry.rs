use crate::domain::model::{AreaFormula, BoundingBox, Coordinate, Polygon, PolygonMetadata};
use crate::utils::error::{InsightError, Result};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::orient::{Direction, Orient};
use geo::{coord, Area, ConvexHull, GeodesicArea, Line, LineString};

/// 緯度一度約 111.32 km（赤道經度一度亦同）
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// 面積小於此值（km²）視為退化多邊形
const MIN_AREA_KM2: f64 = 1e-9;

/// 驗證並正規化輸入多邊形，計算衍生幾何資訊
#[derive(Debug, Clone)]
pub struct PolygonValidator {
    area_formula: AreaFormula,
    max_area_km2: f64,
}

impl PolygonValidator {
    pub fn new(area_formula: AreaFormula, max_area_km2: f64) -> Self {
        Self {
            area_formula,
            max_area_km2,
        }
    }

    pub fn area_formula(&self) -> AreaFormula {
        self.area_formula
    }

    pub fn validate(&self, raw: &[[f64; 2]]) -> Result<Polygon> {
        if raw.len() < 3 {
            return Err(InsightError::invalid_geometry(format!(
                "polygon needs at least 3 vertices, got {}",
                raw.len()
            )));
        }

        for (index, &[lon, lat]) in raw.iter().enumerate() {
            if !lon.is_finite() || !lat.is_finite() {
                return Err(InsightError::invalid_geometry(format!(
                    "vertex {} has a non-finite coordinate",
                    index
                )));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(InsightError::invalid_geometry(format!(
                    "vertex {} longitude {} outside [-180, 180]",
                    index, lon
                )));
            }
            if !(-90.0..=90.0).contains(&lat) {
                return Err(InsightError::invalid_geometry(format!(
                    "vertex {} latitude {} outside [-90, 90]",
                    index, lat
                )));
            }
        }

        let ring = normalize_ring(raw);
        if distinct_count(&ring) < 3 {
            return Err(InsightError::invalid_geometry(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                distinct_count(&ring)
            )));
        }

        let polygon = Polygon::from_ring(ring);
        if hull_area_km2(&polygon) < MIN_AREA_KM2 {
            return Err(InsightError::invalid_geometry(
                "polygon has zero area (vertices are collinear)",
            ));
        }

        // 自交環不拒絕，面積以各 lobe 相加
        let area_km2 = self.area_km2(&polygon);
        if area_km2 < MIN_AREA_KM2 {
            return Err(InsightError::invalid_geometry("polygon has zero area"));
        }
        if area_km2 > self.max_area_km2 {
            return Err(InsightError::invalid_geometry(format!(
                "Area too large ({:.1} km² > {:.1} km²)",
                area_km2, self.max_area_km2
            )));
        }

        Ok(polygon)
    }

    pub fn derive_metadata(&self, polygon: &Polygon) -> PolygonMetadata {
        let area_km2 = self.area_km2(polygon);
        PolygonMetadata {
            centroid: centroid(polygon),
            bbox: bounding_box(polygon),
            area_km2,
            area_ha: area_km2 * 100.0,
            vertex_count: polygon.vertex_count(),
            area_formula: self.area_formula,
        }
    }

    /// 自交環先在交點拆成簡單環，避免兩個 lobe 的有號面積互相抵銷
    pub fn area_km2(&self, polygon: &Polygon) -> f64 {
        let origin = centroid(polygon);
        let mut lobes = Vec::new();
        split_lobes(polygon.vertices().to_vec(), &mut lobes);

        let area_m2: f64 = lobes
            .iter()
            .map(|lobe| self.ring_area_m2(lobe, &origin))
            .sum();
        area_m2 / 1_000_000.0
    }

    fn ring_area_m2(&self, ring: &[Coordinate], origin: &Coordinate) -> f64 {
        match self.area_formula {
            AreaFormula::Geodesic => to_geo(ring).geodesic_area_unsigned(),
            AreaFormula::Planar => {
                let projected: Vec<Coordinate> = ring
                    .iter()
                    .map(|v| project_equirectangular(v, origin))
                    .collect();
                to_geo(&projected).unsigned_area()
            }
        }
    }

    /// 將每個頂點沿質心方向往外推 `distance_m` 公尺。頂點順序與數量不變。
    pub fn buffer(polygon: &Polygon, distance_m: f64) -> Polygon {
        if !distance_m.is_finite() || distance_m <= 0.0 {
            return polygon.clone();
        }

        let origin = centroid(polygon);
        let vertices = polygon
            .vertices()
            .iter()
            .map(|vertex| {
                let local = project_equirectangular(vertex, &origin);
                let distance = local.lon.hypot(local.lat);
                if distance == 0.0 {
                    return *vertex;
                }
                let scale = (distance + distance_m) / distance;
                Coordinate::new(
                    (origin.lon + (vertex.lon - origin.lon) * scale).clamp(-180.0, 180.0),
                    (origin.lat + (vertex.lat - origin.lat) * scale).clamp(-90.0, 90.0),
                )
            })
            .collect();

        Polygon::from_ring(vertices)
    }
}

/// 去除連續重複點與閉合點
fn normalize_ring(raw: &[[f64; 2]]) -> Vec<Coordinate> {
    let mut ring: Vec<Coordinate> = Vec::with_capacity(raw.len());
    for pair in raw {
        let coord = Coordinate::from(*pair);
        if ring.last() != Some(&coord) {
            ring.push(coord);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

/// 凸包面積為零代表所有頂點共線
fn hull_area_km2(polygon: &Polygon) -> f64 {
    let origin = centroid(polygon);
    let projected: Vec<Coordinate> = polygon
        .vertices()
        .iter()
        .map(|v| project_equirectangular(v, &origin))
        .collect();
    to_geo(&projected).convex_hull().unsigned_area() / 1_000_000.0
}

/// 在第一個真交點把環切成兩半，遞迴直到每個 lobe 都是簡單環。
/// 每次切割後兩邊的頂點數都嚴格變少，所以一定會結束。
fn split_lobes(ring: Vec<Coordinate>, lobes: &mut Vec<Vec<Coordinate>>) {
    if ring.len() < 3 {
        return;
    }
    match first_crossing(&ring) {
        Some((i, j, point)) => {
            let mut inner = vec![point];
            inner.extend_from_slice(&ring[i + 1..=j]);

            let mut outer = ring[j + 1..].to_vec();
            outer.extend_from_slice(&ring[..=i]);
            outer.push(point);

            split_lobes(inner, lobes);
            split_lobes(outer, lobes);
        }
        None => lobes.push(ring),
    }
}

/// 找出第一對在內部相交的非相鄰邊 (i, j)，回傳交點
fn first_crossing(ring: &[Coordinate]) -> Option<(usize, usize, Coordinate)> {
    let n = ring.len();
    let edge = |k: usize| {
        let a = ring[k];
        let b = ring[(k + 1) % n];
        Line::new(coord! { x: a.lon, y: a.lat }, coord! { x: b.lon, y: b.lat })
    };

    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if let Some(LineIntersection::SinglePoint {
                intersection,
                is_proper: true,
            }) = line_intersection(edge(i), edge(j))
            {
                return Some((i, j, Coordinate::new(intersection.x, intersection.y)));
            }
        }
    }
    None
}

fn distinct_count(ring: &[Coordinate]) -> usize {
    let mut seen: Vec<Coordinate> = Vec::with_capacity(ring.len());
    for coord in ring {
        if !seen.contains(coord) {
            seen.push(*coord);
        }
    }
    seen.len()
}

/// 頂點的算術平均
pub fn centroid(polygon: &Polygon) -> Coordinate {
    let vertices = polygon.vertices();
    let count = vertices.len().max(1) as f64;
    let (lon_sum, lat_sum) = vertices
        .iter()
        .fold((0.0, 0.0), |(lon, lat), v| (lon + v.lon, lat + v.lat));
    Coordinate::new(lon_sum / count, lat_sum / count)
}

pub fn bounding_box(polygon: &Polygon) -> BoundingBox {
    polygon.vertices().iter().fold(
        BoundingBox {
            min_lon: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        },
        |bbox, v| BoundingBox {
            min_lon: bbox.min_lon.min(v.lon),
            min_lat: bbox.min_lat.min(v.lat),
            max_lon: bbox.max_lon.max(v.lon),
            max_lat: bbox.max_lat.max(v.lat),
        },
    )
}

/// 以 `origin` 為原點投影到公尺平面，結果放在 (lon=x, lat=y)
fn project_equirectangular(vertex: &Coordinate, origin: &Coordinate) -> Coordinate {
    let cos_lat = origin.lat.to_radians().cos();
    Coordinate::new(
        (vertex.lon - origin.lon) * cos_lat * METERS_PER_DEGREE,
        (vertex.lat - origin.lat) * METERS_PER_DEGREE,
    )
}

fn to_geo(vertices: &[Coordinate]) -> geo::Polygon<f64> {
    let mut points: Vec<(f64, f64)> = vertices.iter().map(|v| (v.lon, v.lat)).collect();
    if let Some(first) = points.first().copied() {
        points.push(first);
    }
    // 外環統一為逆時針
    geo::Polygon::new(LineString::from(points), vec![]).orient(Direction::Default)
}
