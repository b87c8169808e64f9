//! Historical store performance analysis.
//!
//! Scores past stores, extracts location features around each of them from
//! the demand grid, and looks for the feature ranges shared by the strongest
//! performers. Mesh centres that fall inside those ranges become site
//! recommendations with a simple financial forecast.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HistoricalConfig;
use crate::error::{Error, Result};
use crate::geo::{Bounds, GeoPoint};
use crate::grid::Mesh;

/// Number of features a winning pattern keeps.
const PATTERN_FEATURES: usize = 5;
/// Reasoning lines attached to a recommendation.
const REASONING_LINES: usize = 3;
/// Fallback averages when no store is a high performer.
const DEFAULT_REVENUE: f64 = 1_000_000.0;
const DEFAULT_PROFIT: f64 = 100_000.0;
const DEFAULT_CUSTOMERS: f64 = 1000.0;

fn default_benchmark_revenue() -> f64 {
    DEFAULT_REVENUE
}

fn default_benchmark_profit() -> f64 {
    DEFAULT_PROFIT
}

/// One past store and its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// Store identifier.
    pub id: String,
    /// Store name.
    #[serde(default)]
    pub name: Option<String>,
    /// Location.
    pub point: GeoPoint,
    /// Annual revenue.
    #[serde(default)]
    pub revenue: f64,
    /// Annual profit.
    #[serde(default)]
    pub profit: f64,
    /// Annual customers.
    #[serde(default)]
    pub customer_count: f64,
    /// Market share as a fraction.
    #[serde(default)]
    pub market_share: f64,
    /// Year-over-year growth, in percent.
    #[serde(default)]
    pub growth_rate: f64,
    /// Revenue that scores 1.0.
    #[serde(default = "default_benchmark_revenue")]
    pub benchmark_revenue: f64,
    /// Profit that scores 1.0.
    #[serde(default = "default_benchmark_profit")]
    pub benchmark_profit: f64,
}

impl StoreRecord {
    /// Weighted performance score, roughly 0 to 1.7.
    #[must_use]
    pub fn performance_score(&self) -> f64 {
        let revenue = ratio(self.revenue, self.benchmark_revenue).min(2.0);
        let profit = ratio(self.profit, self.benchmark_profit).min(2.0);
        let share = (self.market_share * 10.0).min(1.0);
        let growth = (self.growth_rate / 20.0).clamp(0.0, 1.0);
        0.3 * revenue + 0.4 * profit + 0.2 * share + 0.1 * growth
    }
}

fn ratio(value: f64, benchmark: f64) -> f64 {
    if benchmark > 0.0 {
        value / benchmark
    } else {
        0.0
    }
}

/// Performance band of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceCategory {
    /// At or above the threshold.
    High,
    /// At or above 60 % of the threshold.
    Average,
    /// Everything else.
    Under,
}

impl PerformanceCategory {
    /// Band for `score` given the high-performer `threshold`.
    #[must_use]
    pub fn classify(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            Self::High
        } else if score >= threshold * 0.6 {
            Self::Average
        } else {
            Self::Under
        }
    }
}

/// A store with its score and band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredStore {
    /// Store identifier.
    pub id: String,
    /// Store name.
    pub name: Option<String>,
    /// Performance score.
    pub performance_score: f64,
    /// Band.
    pub category: PerformanceCategory,
}

/// Stores grouped by band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCategories {
    /// High performers.
    pub high: Vec<ScoredStore>,
    /// Average performers.
    pub average: Vec<ScoredStore>,
    /// Under performers.
    pub under: Vec<ScoredStore>,
}

/// A location feature measured around a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Population within the feature radius.
    Population,
    /// Demand within the feature radius.
    Demand,
    /// Mean population per mesh within the radius.
    PopulationDensity,
    /// Meshes within the radius.
    MeshCount,
    /// Latitude of the point.
    Latitude,
    /// Longitude of the point.
    Longitude,
    /// Deterministic accessibility proxy.
    Accessibility,
    /// Competitors within the radius, scaled to 0..1.
    CompetitorDensity,
    /// Population-based economic proxy.
    EconomicIndex,
}

impl Feature {
    /// All features in vector order.
    pub const ALL: [Feature; 9] = [
        Feature::Population,
        Feature::Demand,
        Feature::PopulationDensity,
        Feature::MeshCount,
        Feature::Latitude,
        Feature::Longitude,
        Feature::Accessibility,
        Feature::CompetitorDensity,
        Feature::EconomicIndex,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Name used in output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Population => "population",
            Self::Demand => "demand",
            Self::PopulationDensity => "population_density",
            Self::MeshCount => "mesh_count",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Accessibility => "accessibility",
            Self::CompetitorDensity => "competitor_density",
            Self::EconomicIndex => "economic_index",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature values around one point, indexed by [`Feature`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFeatures {
    /// Values in [`Feature::ALL`] order.
    pub values: [f64; 9],
}

impl LocationFeatures {
    /// Value of one feature.
    #[must_use]
    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }
}

/// Accessibility proxy in [0.5, 1.0], stable for a given point.
///
/// Derived from a BLAKE3 digest of the coordinates rounded to 4 decimals, so
/// nearby duplicates of a site score the same.
#[must_use]
pub fn accessibility_score(point: &GeoPoint) -> f64 {
    let key = format!("{:.4},{:.4}", point.lat, point.lng);
    let digest = blake3::hash(key.as_bytes());
    let mut word = [0_u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    let unit = (u64::from_le_bytes(word) >> 11) as f64 / (1_u64 << 53) as f64;
    0.5 + unit * 0.5
}

/// Meshes ordered by latitude for repeated radius queries.
struct MeshIndex<'a> {
    by_lat: Vec<&'a Mesh>,
}

impl<'a> MeshIndex<'a> {
    fn new(meshes: &'a [Mesh]) -> Self {
        let mut by_lat: Vec<&Mesh> = meshes.iter().collect();
        by_lat.sort_by(|a, b| a.center.lat.total_cmp(&b.center.lat));
        Self { by_lat }
    }

    /// Meshes whose centre lies within `radius_km` of `point`.
    fn within(&self, point: GeoPoint, radius_km: f64) -> impl Iterator<Item = &'a Mesh> + '_ {
        // Cheap rectangle test before the trigonometry
        let bbox = Bounds::around(point, radius_km * 1.01);
        let start = self.by_lat.partition_point(|m| m.center.lat < bbox.south);
        let end = self.by_lat.partition_point(|m| m.center.lat <= bbox.north);
        self.by_lat[start..end.max(start)]
            .iter()
            .copied()
            .filter(move |m| bbox.contains(&m.center) && point.distance_km(&m.center) <= radius_km)
    }
}

/// Measure every [`Feature`] around `point`.
#[must_use]
pub fn extract_features(
    point: &GeoPoint,
    meshes: &[Mesh],
    competitors: &[GeoPoint],
    radius_km: f64,
) -> LocationFeatures {
    let nearby = meshes
        .iter()
        .filter(|m| point.distance_km(&m.center) <= radius_km);
    features_from(point, nearby, competitors, radius_km)
}

fn features_from<'m>(
    point: &GeoPoint,
    nearby: impl Iterator<Item = &'m Mesh>,
    competitors: &[GeoPoint],
    radius_km: f64,
) -> LocationFeatures {
    let mut population = 0.0;
    let mut demand = 0.0;
    let mut count = 0_usize;
    for mesh in nearby {
        population += f64::from(mesh.population);
        demand += mesh.demand;
        count += 1;
    }
    let density = if count > 0 { population / count as f64 } else { 0.0 };
    let nearby_competitors = competitors
        .iter()
        .filter(|c| point.distance_km(c) <= radius_km)
        .count();

    let mut values = [0.0; 9];
    values[Feature::Population.index()] = population;
    values[Feature::Demand.index()] = demand;
    values[Feature::PopulationDensity.index()] = density;
    values[Feature::MeshCount.index()] = count as f64;
    values[Feature::Latitude.index()] = point.lat;
    values[Feature::Longitude.index()] = point.lng;
    values[Feature::Accessibility.index()] = accessibility_score(point);
    values[Feature::CompetitorDensity.index()] = (nearby_competitors as f64 / 10.0).min(1.0);
    values[Feature::EconomicIndex.index()] = (density / 1000.0).min(1.0);
    LocationFeatures { values }
}

/// Pearson correlation; 0 when either series is constant.
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    let (mut sx, mut sy, mut sxy, mut sx2, mut sy2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        sx += a;
        sy += b;
        sxy += a * b;
        sx2 += a * a;
        sy2 += b * b;
    }
    let denominator = ((nf * sx2 - sx * sx) * (nf * sy2 - sy * sy)).sqrt();
    if denominator > 0.0 && denominator.is_finite() {
        (nf * sxy - sx * sy) / denominator
    } else {
        0.0
    }
}

/// How strongly one feature tracks performance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    /// Feature.
    pub feature: Feature,
    /// Absolute correlation with the performance score.
    pub importance: f64,
}

/// Importance of every feature, most important first.
#[must_use]
pub fn feature_importance(features: &[LocationFeatures], scores: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = Feature::ALL
        .iter()
        .map(|&feature| {
            let series: Vec<f64> = features.iter().map(|f| f.get(feature)).collect();
            FeatureImportance {
                feature,
                importance: pearson(&series, scores).abs(),
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

/// Range of one feature shared by high performers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeaturePattern {
    /// Feature.
    pub feature: Feature,
    /// Mean over high performers.
    pub optimal: f64,
    /// Mean minus one standard deviation.
    pub min: f64,
    /// Mean plus one standard deviation.
    pub max: f64,
    /// Weight of the feature.
    pub importance: f64,
    /// High performers measured.
    pub sample_size: usize,
}

impl FeaturePattern {
    fn matches(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Feature ranges of high performers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinningPatterns {
    /// One entry per top feature.
    pub patterns: Vec<FeaturePattern>,
    /// Confidence from sample size, 0.2 to 1.0; 0 without patterns.
    pub confidence: f64,
    /// High performers the patterns came from.
    pub total_high_performers: usize,
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Build patterns from the features of high performers. Needs at least two.
#[must_use]
pub fn winning_patterns(
    high_performer_features: &[LocationFeatures],
    importance: &[FeatureImportance],
) -> WinningPatterns {
    let n = high_performer_features.len();
    if n < 2 {
        return WinningPatterns {
            total_high_performers: n,
            ..WinningPatterns::default()
        };
    }
    let patterns = importance
        .iter()
        .take(PATTERN_FEATURES)
        .map(|fi| {
            let values: Vec<f64> = high_performer_features.iter().map(|f| f.get(fi.feature)).collect();
            let (mean, std) = mean_and_std(&values);
            FeaturePattern {
                feature: fi.feature,
                optimal: mean,
                min: mean - std,
                max: mean + std,
                importance: fi.importance,
                sample_size: n,
            }
        })
        .collect();
    WinningPatterns {
        patterns,
        confidence: 0.2 + 0.8 * (n as f64 / 10.0).min(1.0),
        total_high_performers: n,
    }
}

/// How a location compares with the patterns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Importance-weighted share of matched features.
    pub score: f64,
    /// Unweighted share of matched features.
    pub match_ratio: f64,
}

/// Compare features with every pattern.
#[must_use]
pub fn pattern_match(features: &LocationFeatures, patterns: &[FeaturePattern]) -> PatternMatch {
    if patterns.is_empty() {
        return PatternMatch {
            score: 0.0,
            match_ratio: 0.0,
        };
    }
    let mut matched_weight = 0.0;
    let mut total_weight = 0.0;
    let mut matched = 0;
    for pattern in patterns {
        if pattern.matches(features.get(pattern.feature)) {
            matched_weight += pattern.importance;
            matched += 1;
        }
        total_weight += pattern.importance;
    }
    PatternMatch {
        score: if total_weight > 0.0 { matched_weight / total_weight } else { 0.0 },
        match_ratio: f64::from(matched) / patterns.len() as f64,
    }
}

/// A candidate site that resembles past high performers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecommendation {
    /// Site key, `lat_lng` to 4 decimals.
    pub site_id: String,
    /// Mesh the site was taken from.
    pub mesh_id: String,
    /// Site location.
    pub point: GeoPoint,
    /// Weighted pattern match.
    pub pattern_score: f64,
    /// Share of patterns matched.
    pub confidence: f64,
    /// Expected performance, 0.5 to 1.0.
    pub expected_performance: f64,
    /// Features of the site.
    pub features: LocationFeatures,
    /// Matched features with their ranges.
    pub reasoning: Vec<String>,
}

fn reasoning(features: &LocationFeatures, patterns: &[FeaturePattern]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| p.matches(features.get(p.feature)))
        .take(REASONING_LINES)
        .map(|p| {
            format!(
                "{}: {:.1} (optimal range: {:.1}-{:.1})",
                p.feature,
                features.get(p.feature),
                p.min,
                p.max
            )
        })
        .collect()
}

fn site_id(point: &GeoPoint) -> String {
    format!("{:.4}_{:.4}", point.lat, point.lng)
}

/// Projected results of a recommended site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialForecast {
    /// Site key.
    pub site_id: String,
    /// Projected annual revenue.
    pub projected_revenue: f64,
    /// Projected annual profit.
    pub projected_profit: f64,
    /// Projected annual customers.
    pub projected_customers: f64,
    /// Revenue at 80 %.
    pub revenue_low: f64,
    /// Revenue at 120 %.
    pub revenue_high: f64,
    /// Years to recover the investment; `None` when profit is not positive.
    pub payback_years: Option<f64>,
    /// One minus the match confidence.
    pub risk_score: f64,
}

/// Averages used as the base of forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    /// Mean revenue.
    pub revenue: f64,
    /// Mean profit.
    pub profit: f64,
    /// Mean customers.
    pub customers: f64,
}

impl BaselineMetrics {
    /// Averages over `stores`, or fixed defaults when empty.
    #[must_use]
    pub fn from_stores(stores: &[&StoreRecord]) -> Self {
        if stores.is_empty() {
            return Self {
                revenue: DEFAULT_REVENUE,
                profit: DEFAULT_PROFIT,
                customers: DEFAULT_CUSTOMERS,
            };
        }
        let n = stores.len() as f64;
        Self {
            revenue: stores.iter().map(|s| s.revenue).sum::<f64>() / n,
            profit: stores.iter().map(|s| s.profit).sum::<f64>() / n,
            customers: stores.iter().map(|s| s.customer_count).sum::<f64>() / n,
        }
    }
}

/// Years for `annual_profit` to recover `investment`, to one decimal.
#[must_use]
pub fn payback_years(annual_profit: f64, investment: f64) -> Option<f64> {
    if annual_profit <= 0.0 {
        return None;
    }
    Some((investment / annual_profit * 10.0).round() / 10.0)
}

fn forecast(site: &SiteRecommendation, baseline: &BaselineMetrics, investment: f64) -> FinancialForecast {
    let m = site.expected_performance;
    FinancialForecast {
        site_id: site.site_id.clone(),
        projected_revenue: (baseline.revenue * m).round(),
        projected_profit: (baseline.profit * m).round(),
        projected_customers: (baseline.customers * m).round(),
        revenue_low: (baseline.revenue * m * 0.8).round(),
        revenue_high: (baseline.revenue * m * 1.2).round(),
        payback_years: payback_years(baseline.profit * m, investment),
        risk_score: 1.0 - site.confidence,
    }
}

/// Summary of an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// Records analysed.
    pub total_stores_analyzed: usize,
    /// Match ratio a recommendation needed.
    pub confidence_level: f64,
    /// When the analysis ran.
    pub analysis_date: DateTime<Utc>,
    /// Mean pattern importance times confidence, capped at 1.
    pub pattern_strength: f64,
}

/// Output of [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAnalysis {
    /// Stores by band.
    pub categories: PerformanceCategories,
    /// Features, most important first.
    pub feature_importance: Vec<FeatureImportance>,
    /// Feature ranges of high performers.
    pub winning_patterns: WinningPatterns,
    /// Best matching sites.
    pub recommendations: Vec<SiteRecommendation>,
    /// One forecast per recommendation.
    pub forecasts: Vec<FinancialForecast>,
    /// Run summary.
    pub metadata: AnalysisMetadata,
}

fn pattern_strength(patterns: &WinningPatterns) -> f64 {
    if patterns.patterns.is_empty() {
        return 0.0;
    }
    let mean = patterns.patterns.iter().map(|p| p.importance).sum::<f64>()
        / patterns.patterns.len() as f64;
    (mean * patterns.confidence).min(1.0)
}

/// Analyse `records` against the demand grid and recommend new sites.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `records` is empty or a record has
/// invalid coordinates.
pub fn analyze(
    records: &[StoreRecord],
    meshes: &[Mesh],
    competitors: &[GeoPoint],
    config: &HistoricalConfig,
) -> Result<HistoricalAnalysis> {
    if records.is_empty() {
        return Err(Error::invalid("historical analysis needs at least one store record"));
    }
    for record in records {
        record.point.validate()?;
    }
    let radius = config.feature_radius_km;
    let index = MeshIndex::new(meshes);

    let scores: Vec<f64> = records.iter().map(StoreRecord::performance_score).collect();
    let mut categories = PerformanceCategories::default();
    for (record, &score) in records.iter().zip(&scores) {
        let category = PerformanceCategory::classify(score, config.performance_threshold);
        let scored = ScoredStore {
            id: record.id.clone(),
            name: record.name.clone(),
            performance_score: score,
            category,
        };
        match category {
            PerformanceCategory::High => categories.high.push(scored),
            PerformanceCategory::Average => categories.average.push(scored),
            PerformanceCategory::Under => categories.under.push(scored),
        }
    }

    let features: Vec<LocationFeatures> = records
        .iter()
        .map(|r| features_from(&r.point, index.within(r.point, radius), competitors, radius))
        .collect();
    let importance = feature_importance(&features, &scores);

    let high_features: Vec<LocationFeatures> = features
        .iter()
        .zip(&scores)
        .filter(|(_, &s)| s >= config.performance_threshold)
        .map(|(f, _)| *f)
        .collect();
    let patterns = winning_patterns(&high_features, &importance);
    if patterns.patterns.is_empty() {
        warn!(
            high_performers = high_features.len(),
            "fewer than two high performers, no patterns to match"
        );
    }

    let mut recommendations = Vec::new();
    if !patterns.patterns.is_empty() {
        for mesh in meshes {
            let nearby = index.within(mesh.center, radius);
            let site_features = features_from(&mesh.center, nearby, competitors, radius);
            let m = pattern_match(&site_features, &patterns.patterns);
            if m.match_ratio >= config.confidence_level {
                recommendations.push(SiteRecommendation {
                    site_id: site_id(&mesh.center),
                    mesh_id: mesh.id.clone(),
                    point: mesh.center,
                    pattern_score: m.score,
                    confidence: m.match_ratio,
                    expected_performance: 0.5 + 0.5 * m.score,
                    features: site_features,
                    reasoning: reasoning(&site_features, &patterns.patterns),
                });
            }
        }
    }
    debug!(matching = recommendations.len(), "sites matching winning patterns");
    recommendations.sort_by(|a, b| b.pattern_score.total_cmp(&a.pattern_score));
    recommendations.truncate(config.max_recommendations);

    let high_records: Vec<&StoreRecord> = records
        .iter()
        .zip(&scores)
        .filter(|(_, &s)| s >= config.performance_threshold)
        .map(|(r, _)| r)
        .collect();
    let baseline = BaselineMetrics::from_stores(&high_records);
    let forecasts = recommendations
        .iter()
        .map(|site| forecast(site, &baseline, config.investment_cost))
        .collect();

    let metadata = AnalysisMetadata {
        total_stores_analyzed: records.len(),
        confidence_level: config.confidence_level,
        analysis_date: Utc::now(),
        pattern_strength: pattern_strength(&patterns),
    };
    info!(
        stores = records.len(),
        high = categories.high.len(),
        recommendations = recommendations.len(),
        "historical analysis complete"
    );

    Ok(HistoricalAnalysis {
        categories,
        feature_importance: importance,
        winning_patterns: patterns,
        recommendations,
        forecasts,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{generate_demand_grid, UniformPopulation, DEFAULT_MAX_CELLS};

    fn record(id: &str, lat: f64, lng: f64, revenue: f64, profit: f64) -> StoreRecord {
        StoreRecord {
            id: id.to_string(),
            name: None,
            point: GeoPoint { lat, lng },
            revenue,
            profit,
            customer_count: 1200.0,
            market_share: 0.05,
            growth_rate: 10.0,
            benchmark_revenue: DEFAULT_REVENUE,
            benchmark_profit: DEFAULT_PROFIT,
        }
    }

    fn grid() -> Vec<Mesh> {
        let bounds = Bounds::new(35.70, 35.66, 139.72, 139.68).unwrap();
        generate_demand_grid(
            &bounds,
            500.0,
            0.5,
            DEFAULT_MAX_CELLS,
            &mut UniformPopulation(200),
        )
        .unwrap()
    }

    #[test]
    fn test_performance_score_weights() {
        let benchmark = record("a", 35.0, 139.0, 1_000_000.0, 100_000.0);
        // 0.3 + 0.4 + 0.2 * 0.5 + 0.1 * 0.5
        assert!((benchmark.performance_score() - 0.85).abs() < 1e-12);

        let capped = StoreRecord {
            revenue: 10_000_000.0,
            profit: 10_000_000.0,
            market_share: 0.5,
            growth_rate: 80.0,
            ..benchmark.clone()
        };
        assert!((capped.performance_score() - 1.7).abs() < 1e-12);

        let shrinking = StoreRecord {
            growth_rate: -30.0,
            revenue: 0.0,
            profit: 0.0,
            market_share: 0.0,
            ..benchmark
        };
        assert_eq!(shrinking.performance_score(), 0.0);
    }

    #[test]
    fn test_classify() {
        assert_eq!(PerformanceCategory::classify(1.0, 1.0), PerformanceCategory::High);
        assert_eq!(PerformanceCategory::classify(0.6, 1.0), PerformanceCategory::Average);
        assert_eq!(PerformanceCategory::classify(0.59, 1.0), PerformanceCategory::Under);
    }

    #[test]
    fn test_record_defaults_from_json() {
        let record: StoreRecord = serde_json::from_str(
            r#"{"id": "s1", "point": {"lat": 35.68, "lng": 139.7}, "revenue": 500000}"#,
        )
        .unwrap();
        assert_eq!(record.benchmark_revenue, 1_000_000.0);
        assert_eq!(record.benchmark_profit, 100_000.0);
        assert_eq!(record.profit, 0.0);
    }

    #[test]
    fn test_accessibility_is_stable_and_bounded() {
        let p = GeoPoint { lat: 35.6812, lng: 139.7671 };
        let a = accessibility_score(&p);
        assert_eq!(a, accessibility_score(&GeoPoint { lat: 35.681_21, lng: 139.767_09 }));
        assert!((0.5..=1.0).contains(&a));
        let q = GeoPoint { lat: 34.7025, lng: 135.4959 };
        assert_ne!(a, accessibility_score(&q));
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson(&[], &[]), 0.0);
    }

    #[test]
    fn test_extract_features() {
        let meshes = grid();
        let center = GeoPoint { lat: 35.68, lng: 139.70 };
        let competitors = vec![center, GeoPoint { lat: 36.5, lng: 140.5 }];
        let f = extract_features(&center, &meshes, &competitors, 1.0);
        assert!(f.get(Feature::MeshCount) > 0.0);
        assert_eq!(f.get(Feature::Population), f.get(Feature::MeshCount) * 200.0);
        assert_eq!(f.get(Feature::PopulationDensity), 200.0);
        assert!((f.get(Feature::EconomicIndex) - 0.2).abs() < 1e-12);
        assert!((f.get(Feature::CompetitorDensity) - 0.1).abs() < 1e-12);
        assert_eq!(f.get(Feature::Latitude), 35.68);
    }

    #[test]
    fn test_mesh_index_matches_full_scan() {
        let meshes = grid();
        let index = MeshIndex::new(&meshes);
        let points = [
            GeoPoint { lat: 35.68, lng: 139.70 },
            GeoPoint { lat: 35.6605, lng: 139.7195 },
            GeoPoint { lat: 35.75, lng: 139.70 },
        ];
        for point in points {
            for radius in [0.3, 1.0, 2.5] {
                let mut fast: Vec<&str> =
                    index.within(point, radius).map(|m| m.id.as_str()).collect();
                let mut full: Vec<&str> = meshes
                    .iter()
                    .filter(|m| point.distance_km(&m.center) <= radius)
                    .map(|m| m.id.as_str())
                    .collect();
                fast.sort_unstable();
                full.sort_unstable();
                assert_eq!(fast, full, "{point} within {radius} km");
            }
        }
    }

    #[test]
    fn test_feature_importance_sorted() {
        let features: Vec<LocationFeatures> = (0..4)
            .map(|i| {
                let mut values = [1.0; 9];
                values[Feature::Demand.index()] = f64::from(i);
                LocationFeatures { values }
            })
            .collect();
        let ranked = feature_importance(&features, &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(ranked.len(), 9);
        assert_eq!(ranked[0].feature, Feature::Demand);
        assert!((ranked[0].importance - 1.0).abs() < 1e-12);
        for pair in ranked.windows(2) {
            assert!(pair[0].importance >= pair[1].importance);
        }
    }

    #[test]
    fn test_winning_patterns_need_two_stores() {
        let one = [LocationFeatures { values: [1.0; 9] }];
        let importance = feature_importance(&one, &[1.0]);
        let patterns = winning_patterns(&one, &importance);
        assert!(patterns.patterns.is_empty());
        assert_eq!(patterns.confidence, 0.0);
        assert_eq!(patterns.total_high_performers, 1);
    }

    #[test]
    fn test_winning_patterns_ranges() {
        let features: Vec<LocationFeatures> = [10.0, 20.0]
            .iter()
            .map(|&v| LocationFeatures { values: [v; 9] })
            .collect();
        let importance = feature_importance(&features, &[1.0, 2.0]);
        let patterns = winning_patterns(&features, &importance);
        assert_eq!(patterns.patterns.len(), 5);
        let p = patterns.patterns[0];
        assert!((p.optimal - 15.0).abs() < 1e-12);
        assert!((p.min - 10.0).abs() < 1e-12);
        assert!((p.max - 20.0).abs() < 1e-12);
        assert!((patterns.confidence - 0.36).abs() < 1e-12);
    }

    #[test]
    fn test_pattern_match_weights() {
        let patterns = vec![
            FeaturePattern {
                feature: Feature::Population,
                optimal: 100.0,
                min: 50.0,
                max: 150.0,
                importance: 0.75,
                sample_size: 2,
            },
            FeaturePattern {
                feature: Feature::Demand,
                optimal: 10.0,
                min: 5.0,
                max: 15.0,
                importance: 0.25,
                sample_size: 2,
            },
        ];
        let mut values = [0.0; 9];
        values[Feature::Population.index()] = 120.0;
        values[Feature::Demand.index()] = 40.0;
        let m = pattern_match(&LocationFeatures { values }, &patterns);
        assert!((m.score - 0.75).abs() < 1e-12);
        assert!((m.match_ratio - 0.5).abs() < 1e-12);
        let lines = reasoning(&LocationFeatures { values }, &patterns);
        assert_eq!(lines, vec!["population: 120.0 (optimal range: 50.0-150.0)"]);
    }

    #[test]
    fn test_payback() {
        assert_eq!(payback_years(300_000.0, 1_000_000.0), Some(3.3));
        assert_eq!(payback_years(0.0, 1_000_000.0), None);
        assert_eq!(payback_years(-5.0, 1_000_000.0), None);
    }

    #[test]
    fn test_baseline_defaults() {
        let baseline = BaselineMetrics::from_stores(&[]);
        assert_eq!(baseline.revenue, 1_000_000.0);
        assert_eq!(baseline.profit, 100_000.0);
        assert_eq!(baseline.customers, 1000.0);
    }

    #[test]
    fn test_analyze_requires_records() {
        let err = analyze(&[], &grid(), &[], &HistoricalConfig::default()).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_analyze_end_to_end() {
        let meshes = grid();
        let records = vec![
            record("strong-1", 35.680, 139.700, 1_800_000.0, 190_000.0),
            record("strong-2", 35.684, 139.704, 1_600_000.0, 170_000.0),
            record("strong-3", 35.676, 139.696, 1_700_000.0, 180_000.0),
            record("weak-1", 35.662, 139.682, 300_000.0, 10_000.0),
            record("weak-2", 35.698, 139.718, 200_000.0, 5_000.0),
        ];
        let config = HistoricalConfig {
            confidence_level: 0.6,
            ..HistoricalConfig::default()
        };
        let analysis = analyze(&records, &meshes, &[], &config).unwrap();

        assert_eq!(analysis.categories.high.len(), 3);
        assert_eq!(analysis.categories.under.len(), 2);
        assert_eq!(analysis.winning_patterns.patterns.len(), 5);
        assert_eq!(analysis.metadata.total_stores_analyzed, 5);
        assert!(analysis.recommendations.len() <= config.max_recommendations);
        assert_eq!(analysis.forecasts.len(), analysis.recommendations.len());
        for pair in analysis.recommendations.windows(2) {
            assert!(pair[0].pattern_score >= pair[1].pattern_score);
        }
        for (site, forecast) in analysis.recommendations.iter().zip(&analysis.forecasts) {
            assert!(site.confidence >= 0.6);
            assert!((0.5..=1.0).contains(&site.expected_performance));
            assert!(site.reasoning.len() <= 3);
            assert_eq!(site.site_id, forecast.site_id);
            assert!(forecast.revenue_low <= forecast.projected_revenue);
            assert!(forecast.projected_revenue <= forecast.revenue_high);
            assert!((forecast.risk_score - (1.0 - site.confidence)).abs() < 1e-12);
        }
        assert!(analysis.metadata.pattern_strength <= 1.0);
    }

    #[test]
    fn test_analyze_without_high_performers() {
        let meshes = grid();
        let records = vec![
            record("a", 35.68, 139.70, 100_000.0, 1_000.0),
            record("b", 35.69, 139.71, 120_000.0, 2_000.0),
        ];
        let analysis = analyze(&records, &meshes, &[], &HistoricalConfig::default()).unwrap();
        assert!(analysis.categories.high.is_empty());
        assert!(analysis.recommendations.is_empty());
        assert!(analysis.forecasts.is_empty());
        assert_eq!(analysis.metadata.pattern_strength, 0.0);
    }
}
