//! Aggregation pipeline
//!
//! Staleness filter -> IQR outlier rejection -> volume-enhanced weighted
//! median. Purely functional over the observation list: statuses are
//! assigned to a working copy that is returned alongside the result so the
//! detail cache can explain every decision.

use chrono::Utc;

use crate::config::AggregationParams;
use crate::error::{InsufficientReason, OracleError, Result};
use crate::types::{
    AggregateResult, PricePoint, PriceStatus, PROVENANCE_FALLBACK_MEDIAN,
    PROVENANCE_WEIGHTED_MEDIAN,
};

/// IQR rejection needs at least this many fresh observations to say anything
/// meaningful about the distribution.
const IQR_MIN_SAMPLES: usize = 4;

/// Run the full pipeline for one feed. Always returns the annotated
/// observation list, even when the result is an error, so callers can
/// record why the aggregation came out the way it did.
pub fn aggregate(
    points: Vec<PricePoint>,
    params: &AggregationParams,
    feed_id: &str,
) -> (Result<AggregateResult>, Vec<PricePoint>) {
    let now = Utc::now();
    let mut annotated = points;

    // Stage 1: staleness filter.
    let max_age = params.max_price_age_seconds as i64;
    let mut working: Vec<usize> = Vec::with_capacity(annotated.len());
    for (idx, point) in annotated.iter_mut().enumerate() {
        let age_secs = (now - point.timestamp).num_seconds();
        if age_secs > max_age {
            point.status = PriceStatus::Stale;
            tracing::warn!(
                feed = %feed_id,
                source = %point.source,
                age_secs,
                limit_secs = max_age,
                "discarding stale observation"
            );
        } else {
            working.push(idx);
        }
    }

    // Stage 2: minimum-sources gate before outlier rejection.
    if working.len() < params.minimum_sources {
        for &idx in &working {
            annotated[idx].status = PriceStatus::Valid;
        }
        let err = OracleError::InsufficientSources {
            feed_id: feed_id.to_string(),
            reason: InsufficientReason::Stale,
            valid: working.len(),
            required: params.minimum_sources,
        };
        return (Err(err), annotated);
    }

    // Stage 3: IQR outlier rejection over the price-sorted working set.
    working.sort_by(|&a, &b| {
        annotated[a]
            .price
            .partial_cmp(&annotated[b].price)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if working.len() >= IQR_MIN_SAMPLES {
        let n = working.len();
        let q1 = annotated[working[n / 4]].price;
        let q3 = annotated[working[3 * n / 4]].price;
        let iqr = q3 - q1;
        let lower = q1 - params.iqr_multiplier * iqr;
        let upper = q3 + params.iqr_multiplier * iqr;

        working.retain(|&idx| {
            let price = annotated[idx].price;
            if price < lower || price > upper {
                annotated[idx].status = PriceStatus::Outlier;
                tracing::warn!(
                    feed = %feed_id,
                    source = %annotated[idx].source,
                    price,
                    lower_bound = lower,
                    upper_bound = upper,
                    "discarding outlier observation"
                );
                false
            } else {
                annotated[idx].status = PriceStatus::Valid;
                true
            }
        });
    } else {
        for &idx in &working {
            annotated[idx].status = PriceStatus::Valid;
        }
    }

    // Stage 4: minimum-sources gate after outlier rejection.
    if working.len() < params.minimum_sources {
        let err = OracleError::InsufficientSources {
            feed_id: feed_id.to_string(),
            reason: InsufficientReason::Outliers,
            valid: working.len(),
            required: params.minimum_sources,
        };
        return (Err(err), annotated);
    }

    // Stage 5: dynamic weights. Each observation's static weight is boosted
    // by its share of the aggregate volume; observations without volume keep
    // their static weight so the median semantics survive volume-less feeds.
    let static_total: f64 = working.iter().map(|&idx| annotated[idx].weight).sum();
    let volume_total: f64 = working
        .iter()
        .map(|&idx| annotated[idx].volume)
        .filter(|v| *v > 0.0)
        .sum();

    let result = if static_total <= 0.0 {
        fallback_median(&annotated, &working, volume_total, feed_id)
    } else {
        let dynamic: Vec<f64> = working
            .iter()
            .map(|&idx| {
                let point = &annotated[idx];
                if volume_total > 0.0 && point.volume > 0.0 {
                    point.weight * (1.0 + point.volume / volume_total)
                } else {
                    point.weight
                }
            })
            .collect();
        let dynamic_total: f64 = dynamic.iter().sum();

        if dynamic_total <= 0.0 {
            fallback_median(&annotated, &working, volume_total, feed_id)
        } else {
            // Stage 6: weighted median. Walk the price-ascending set until
            // the cumulative dynamic weight exceeds half the total; an exact
            // half-split resolves to the next observation.
            let half = dynamic_total / 2.0;
            let mut cumulative = 0.0;
            let mut pick = working[0];
            for (pos, &idx) in working.iter().enumerate() {
                pick = idx;
                cumulative += dynamic[pos];
                if cumulative > half {
                    break;
                }
            }

            AggregateResult {
                feed_id: feed_id.to_string(),
                price: annotated[pick].price,
                volume: volume_total,
                source: PROVENANCE_WEIGHTED_MEDIAN.to_string(),
                timestamp: annotated[pick].timestamp,
            }
        }
    };

    let valid = working.len();
    let stale = annotated
        .iter()
        .filter(|p| p.status == PriceStatus::Stale)
        .count();
    let outliers = annotated
        .iter()
        .filter(|p| p.status == PriceStatus::Outlier)
        .count();
    tracing::info!(
        feed = %feed_id,
        price = result.price,
        volume = result.volume,
        provenance = %result.source,
        valid,
        stale,
        outliers,
        "aggregation complete"
    );

    (Ok(result), annotated)
}

/// Degenerate-weights fallback: lower-middle simple median of the working
/// set, with all volume summed into the aggregate volume.
fn fallback_median(
    annotated: &[PricePoint],
    working: &[usize],
    volume_total: f64,
    feed_id: &str,
) -> AggregateResult {
    let n = working.len();
    let mid = if n % 2 == 0 { n / 2 - 1 } else { n / 2 };
    let pick = &annotated[working[mid]];
    tracing::warn!(
        feed = %feed_id,
        sources = n,
        "degenerate weights, falling back to simple median"
    );
    AggregateResult {
        feed_id: feed_id.to_string(),
        price: pick.price,
        volume: volume_total,
        source: PROVENANCE_FALLBACK_MEDIAN.to_string(),
        timestamp: pick.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_point(source: &str, price: f64, volume: f64, weight: f64, age_secs: i64) -> PricePoint {
        PricePoint {
            source: source.to_string(),
            price,
            volume,
            timestamp: Utc::now() - Duration::seconds(age_secs),
            weight,
            status: PriceStatus::Pending,
        }
    }

    fn make_params(minimum: usize, max_age: u64, k: f64) -> AggregationParams {
        AggregationParams {
            minimum_sources: minimum,
            max_price_age_seconds: max_age,
            iqr_multiplier: k,
        }
    }

    fn status_of<'a>(annotated: &'a [PricePoint], source: &str) -> PriceStatus {
        annotated
            .iter()
            .find(|p| p.source == source)
            .expect("source present")
            .status
    }

    #[test]
    fn test_happy_path_volume_weighted_median() {
        // Four fresh sources; the high-volume one dominates the pick.
        let points = vec![
            make_point("kraken", 1646.07, 504.20, 0.3, 3),
            make_point("coinbase", 1646.68, 0.0, 0.1, 2),
            make_point("binance", 1646.96, 355_615.01, 0.4, 5),
            make_point("uniswap", 1647.10, 40.0, 0.2, 10),
        ];
        let (result, annotated) = aggregate(points, &make_params(3, 60, 1.5), "ETHUSDC_Global");
        let result = result.unwrap();

        assert_eq!(result.price, 1646.96);
        assert!((result.volume - 356_159.21).abs() < 1e-6);
        assert_eq!(result.source, PROVENANCE_WEIGHTED_MEDIAN);
        assert!(annotated.iter().all(|p| p.status == PriceStatus::Valid));
    }

    #[test]
    fn test_outlier_rejected_by_iqr() {
        let points = vec![
            make_point("a", 1646.0, 10.0, 0.25, 1),
            make_point("b", 1646.5, 10.0, 0.25, 1),
            make_point("c", 1647.0, 10.0, 0.25, 1),
            make_point("d", 1647.5, 10.0, 0.25, 1),
            make_point("e", 2000.0, 10.0, 0.25, 1),
        ];
        let (result, annotated) = aggregate(points, &make_params(3, 60, 1.5), "ETHUSDC_Global");
        let result = result.unwrap();

        assert_eq!(status_of(&annotated, "e"), PriceStatus::Outlier);
        assert_eq!(result.price, 1647.0);
        assert!((result.volume - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_drop_below_minimum() {
        let points = vec![
            make_point("a", 100.0, 1.0, 0.5, 1),
            make_point("b", 101.0, 1.0, 0.5, 2),
            make_point("c", 102.0, 1.0, 0.5, 61),
        ];
        let (result, annotated) = aggregate(points, &make_params(3, 60, 1.5), "BTCUSDC_Global");

        match result.unwrap_err() {
            OracleError::InsufficientSources {
                reason,
                valid,
                required,
                ..
            } => {
                assert_eq!(reason, InsufficientReason::Stale);
                assert_eq!(valid, 2);
                assert_eq!(required, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(status_of(&annotated, "c"), PriceStatus::Stale);
        assert_eq!(status_of(&annotated, "a"), PriceStatus::Valid);
        assert_eq!(status_of(&annotated, "b"), PriceStatus::Valid);
    }

    #[test]
    fn test_outlier_drop_below_minimum() {
        let points = vec![
            make_point("a", 100.0, 1.0, 0.2, 1),
            make_point("b", 100.1, 1.0, 0.2, 1),
            make_point("c", 100.2, 1.0, 0.2, 1),
            make_point("d", 100.3, 1.0, 0.2, 1),
            make_point("e", 500.0, 1.0, 0.2, 1),
        ];
        let (result, annotated) = aggregate(points, &make_params(5, 60, 1.5), "BTCUSDC_Global");

        match result.unwrap_err() {
            OracleError::InsufficientSources { reason, .. } => {
                assert_eq!(reason, InsufficientReason::Outliers);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(status_of(&annotated, "e"), PriceStatus::Outlier);
    }

    #[test]
    fn test_iqr_skipped_below_four_samples() {
        // A wild point survives when the set is too small for IQR.
        let points = vec![
            make_point("a", 100.0, 0.0, 0.4, 1),
            make_point("b", 101.0, 0.0, 0.4, 1),
            make_point("c", 900.0, 0.0, 0.2, 1),
        ];
        let (result, annotated) = aggregate(points, &make_params(2, 60, 1.5), "BTCUSDC_Global");
        assert!(result.is_ok());
        assert!(annotated.iter().all(|p| p.status == PriceStatus::Valid));
    }

    #[test]
    fn test_degenerate_weights_fallback() {
        let points = vec![
            make_point("a", 10.0, 0.0, 0.0, 1),
            make_point("b", 20.0, 0.0, 0.0, 1),
            make_point("c", 30.0, 0.0, 0.0, 1),
        ];
        let (result, _) = aggregate(points, &make_params(3, 60, 1.5), "XUSDC_Global");
        let result = result.unwrap();

        assert_eq!(result.price, 20.0);
        assert_eq!(result.volume, 0.0);
        assert_eq!(result.source, PROVENANCE_FALLBACK_MEDIAN);
    }

    #[test]
    fn test_fallback_even_count_takes_lower_middle() {
        let points = vec![
            make_point("a", 10.0, 0.0, 0.0, 1),
            make_point("b", 20.0, 0.0, 0.0, 1),
            make_point("c", 30.0, 0.0, 0.0, 1),
            make_point("d", 40.0, 0.0, 0.0, 1),
        ];
        let (result, _) = aggregate(points, &make_params(2, 60, 3.0), "XUSDC_Global");
        assert_eq!(result.unwrap().price, 20.0);
    }

    #[test]
    fn test_equal_prices_any_weighting() {
        let points = vec![
            make_point("a", 55.5, 1.0, 0.1, 1),
            make_point("b", 55.5, 900.0, 0.8, 1),
            make_point("c", 55.5, 2.0, 0.1, 1),
        ];
        let (result, _) = aggregate(points, &make_params(3, 60, 1.5), "XUSDC_Global");
        assert_eq!(result.unwrap().price, 55.5);
    }

    #[test]
    fn test_single_valid_source_is_the_result() {
        let points = vec![make_point("only", 1234.5, 7.0, 1.0, 1)];
        let (result, _) = aggregate(points, &make_params(1, 60, 1.5), "XUSDC_Global");
        let result = result.unwrap();
        assert_eq!(result.price, 1234.5);
        assert_eq!(result.volume, 7.0);
        assert_eq!(result.source, PROVENANCE_WEIGHTED_MEDIAN);
    }

    #[test]
    fn test_volume_boost_shifts_threshold_crossing() {
        // Equal static weights; the huge-volume source pulls the cumulative
        // threshold onto itself even though sorting is by price.
        let points = vec![
            make_point("a", 100.0, 1.0, 0.25, 1),
            make_point("b", 101.0, 1.0, 0.25, 1),
            make_point("c", 102.0, 1_000_000.0, 0.25, 1),
            make_point("d", 103.0, 1.0, 0.25, 1),
        ];
        let (result, _) = aggregate(points, &make_params(3, 60, 10.0), "XUSDC_Global");
        assert_eq!(result.unwrap().price, 102.0);
    }

    #[test]
    fn test_age_exactly_at_limit_is_fresh() {
        let points = vec![
            make_point("a", 100.0, 1.0, 0.5, 60),
            make_point("b", 101.0, 1.0, 0.5, 1),
        ];
        let (result, annotated) = aggregate(points, &make_params(2, 60, 1.5), "XUSDC_Global");
        assert!(result.is_ok());
        assert!(annotated.iter().all(|p| p.status == PriceStatus::Valid));
    }

    #[test]
    fn test_determinism() {
        let build = || {
            vec![
                make_point("a", 100.0, 5.0, 0.3, 1),
                make_point("b", 100.5, 2.0, 0.3, 2),
                make_point("c", 101.0, 9.0, 0.4, 3),
                make_point("d", 101.5, 1.0, 0.2, 4),
            ]
        };
        let params = make_params(3, 60, 1.5);
        let (first, _) = aggregate(build(), &params, "XUSDC_Global");
        let (second, _) = aggregate(build(), &params, "XUSDC_Global");
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.price, second.price);
        assert_eq!(first.volume, second.volume);
        assert_eq!(first.source, second.source);
    }

    #[test]
    fn test_does_not_drop_input_observations() {
        let points = vec![
            make_point("a", 100.0, 1.0, 0.5, 1),
            make_point("b", 101.0, 1.0, 0.5, 120),
            make_point("c", 102.0, 1.0, 0.5, 2),
        ];
        let (_, annotated) = aggregate(points, &make_params(2, 60, 1.5), "XUSDC_Global");
        assert_eq!(annotated.len(), 3);
        assert!(annotated
            .iter()
            .all(|p| p.status != PriceStatus::Pending));
    }
}
