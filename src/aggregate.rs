use statistical::mean;

use crate::models::{LocationAggregate, ProviderMeasurement};

/// Best-provider score: a reciprocal latency term plus a doubled throughput term.
pub(crate) fn score(m: &ProviderMeasurement) -> f64 {
    1000.0 / (m.latency_ms + 1.0) + 2.0 * (m.download_mbps + m.upload_mbps)
}

/// Summarizes one location's measurements and picks its best provider.
///
/// Only successful measurements contribute to the latency and throughput figures;
/// with no successes every figure is zero and there is no best provider.
pub(crate) fn aggregate(
    measurements: &[ProviderMeasurement],
) -> (LocationAggregate, Option<ProviderMeasurement>) {
    let succeeded: Vec<&ProviderMeasurement> = measurements.iter().filter(|m| m.success).collect();

    let mut stats = LocationAggregate {
        total_isps: measurements.len(),
        successful_isps: succeeded.len(),
        ..LocationAggregate::default()
    };

    if succeeded.is_empty() {
        return (stats, None);
    }

    let latencies: Vec<f64> = succeeded.iter().map(|m| m.latency_ms).collect();
    let downloads: Vec<f64> = succeeded.iter().map(|m| m.download_mbps).collect();
    let uploads: Vec<f64> = succeeded.iter().map(|m| m.upload_mbps).collect();

    stats.success_rate_percent = succeeded.len() as f64 / measurements.len() as f64 * 100.0;
    stats.avg_latency_ms = mean(&latencies);
    stats.min_latency_ms = latencies.iter().copied().fold(f64::INFINITY, f64::min);
    stats.max_latency_ms = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    stats.avg_download_mbps = mean(&downloads);
    stats.max_download_mbps = downloads.iter().copied().fold(0.0, f64::max);
    stats.avg_upload_mbps = mean(&uploads);
    stats.max_upload_mbps = uploads.iter().copied().fold(0.0, f64::max);

    let mut best: Option<(&ProviderMeasurement, f64)> = None;
    for m in &succeeded {
        let s = score(m);
        // strictly greater, so the earliest of equal scores is kept
        if best.is_none_or(|(_, top)| s > top) {
            best = Some((m, s));
        }
    }

    (stats, best.map(|(m, _)| m.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{failed_measurement, measurement};

    #[test]
    fn empty_input_is_a_zero_aggregate() {
        let (stats, best) = aggregate(&[]);
        assert_eq!(stats, LocationAggregate::default());
        assert!(best.is_none());
    }

    #[test]
    fn all_failed_has_counts_but_no_figures() {
        let input = vec![failed_measurement("A"), failed_measurement("B")];
        let (stats, best) = aggregate(&input);
        assert_eq!(stats.total_isps, 2);
        assert_eq!(stats.successful_isps, 0);
        assert_eq!(stats.success_rate_percent, 0.0);
        assert_eq!(stats.min_latency_ms, 0.0);
        assert_eq!(stats.avg_download_mbps, 0.0);
        assert!(best.is_none());
    }

    #[test]
    fn figures_cover_successful_subset_only() {
        let input = vec![
            measurement("A", 10.0, 100.0, 20.0),
            failed_measurement("B"),
            measurement("C", 30.0, 50.0, 40.0),
            failed_measurement("D"),
        ];
        let (stats, best) = aggregate(&input);
        assert_eq!(stats.total_isps, 4);
        assert_eq!(stats.successful_isps, 2);
        assert_eq!(stats.success_rate_percent, 50.0);
        assert_eq!(stats.avg_latency_ms, 20.0);
        assert_eq!(stats.min_latency_ms, 10.0);
        assert_eq!(stats.max_latency_ms, 30.0);
        assert_eq!(stats.avg_download_mbps, 75.0);
        assert_eq!(stats.max_download_mbps, 100.0);
        assert_eq!(stats.avg_upload_mbps, 30.0);
        assert_eq!(stats.max_upload_mbps, 40.0);
        assert!(stats.min_latency_ms <= stats.avg_latency_ms);
        assert!(stats.avg_latency_ms <= stats.max_latency_ms);
        assert_eq!(best.unwrap().isp, "A");
    }

    #[test]
    fn throughput_can_outweigh_latency() {
        // A: 1000/6 + 2*2 = 170.7, B: 1000/41 + 2*200 = 424.4
        let input = vec![
            measurement("A", 5.0, 1.0, 1.0),
            measurement("B", 40.0, 150.0, 50.0),
        ];
        assert_eq!(aggregate(&input).1.unwrap().isp, "B");
    }

    #[test]
    fn low_latency_wins_at_low_bandwidth() {
        // A: 1000/2 + 2*1 = 502, B: 1000/201 + 2*10 = 25
        let input = vec![
            measurement("B", 200.0, 5.0, 5.0),
            measurement("A", 1.0, 0.5, 0.5),
        ];
        assert_eq!(aggregate(&input).1.unwrap().isp, "A");
    }

    #[test]
    fn ties_keep_first_encountered() {
        let input = vec![
            failed_measurement("X"),
            measurement("First", 20.0, 10.0, 10.0),
            measurement("Second", 20.0, 10.0, 10.0),
        ];
        assert_eq!(aggregate(&input).1.unwrap().isp, "First");
    }

    #[test]
    fn score_matches_formula() {
        let m = measurement("A", 9.0, 10.0, 5.0);
        assert_eq!(score(&m), 1000.0 / 10.0 + 2.0 * 15.0);
    }
}
