//! Indicator mathematics over close-price series
//!
//! All functions return `None` (or an empty series) when the input is too
//! short to produce a value; callers treat that as "indicator skipped".

/// Simple moving average over the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// Exponential moving average series, seeded with the first value.
///
/// Output has the same length as the input; the early entries are still
/// warming up, which is why callers gate on a minimum input length.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for value in &values[1..] {
        ema = alpha * value + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Latest EMA value; requires at least `period` inputs
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    ema_series(values, period).last().copied()
}

/// Relative strength index over the last `period` price changes.
///
/// Needs `period + 1` closes to form a delta series of length `period`.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in (values.len() - period)..values.len() {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// One aligned MACD data point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line, signal line, and histogram over the full series.
///
/// Returns an empty series unless at least `slow_period + signal_period`
/// closes are available.
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Vec<MacdPoint> {
    if values.len() < slow_period + signal_period {
        return Vec::new();
    }

    let fast = ema_series(values, fast_period);
    let slow = ema_series(values, slow_period);
    let macd_line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal_line = ema_series(&macd_line, signal_period);

    macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| MacdPoint {
            macd: *m,
            signal: *s,
            histogram: m - s,
        })
        .collect()
}

/// Bollinger band levels for the latest close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Position of `close` within the bands, 0.0 at the lower band and
    /// 1.0 at the upper band
    pub fn percent_b(&self, close: f64) -> f64 {
        let width = self.width();
        if width == 0.0 {
            0.5
        } else {
            (close - self.lower) / width
        }
    }
}

/// Bollinger bands over the last `period` values
pub fn bollinger(values: &[f64], period: usize, std_dev: f64) -> Option<BollingerBands> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
    let sigma = variance.sqrt();

    Some(BollingerBands {
        upper: middle + std_dev * sigma,
        middle,
        lower: middle - std_dev * sigma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_needs_full_window() {
        assert_eq!(sma(&[1.0, 2.0, 3.0], 4), None);
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 4), Some(2.5));
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
    }

    #[test]
    fn rsi_saturates_at_100_on_straight_gains() {
        let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_is_low_on_straight_losses() {
        let closes: Vec<f64> = (1..=20).rev().map(|i| i as f64).collect();
        let value = rsi(&closes, 14).unwrap();
        assert!(value < 1.0, "expected near-zero RSI, got {value}");
    }

    #[test]
    fn rsi_needs_period_plus_one_closes() {
        let closes: Vec<f64> = (1..=14).map(|i| i as f64).collect();
        assert_eq!(rsi(&closes, 14), None);
        let closes: Vec<f64> = (1..=15).map(|i| i as f64).collect();
        assert!(rsi(&closes, 14).is_some());
    }

    #[test]
    fn rsi_is_balanced_on_alternating_moves() {
        // Equal gains and losses -> RS = 1 -> RSI = 50
        let mut closes = vec![100.0];
        for i in 0..20 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let value = rsi(&closes, 14).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn ema_tracks_recent_values_more_closely_than_sma() {
        let mut closes: Vec<f64> = vec![100.0; 30];
        closes.extend([110.0, 120.0, 130.0]);
        let ema = ema(&closes, 10).unwrap();
        let sma = sma(&closes, 10).unwrap();
        assert!(ema > 100.0);
        assert!(sma > 100.0);
    }

    #[test]
    fn macd_turns_positive_in_an_uptrend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let points = macd(&closes, 12, 26, 9);
        let last = points.last().unwrap();
        assert!(last.macd > 0.0);
        assert!(last.macd > last.signal || last.histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_requires_slow_plus_signal_closes() {
        let closes: Vec<f64> = (0..34).map(|i| i as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_empty());
        let closes: Vec<f64> = (0..35).map(|i| i as f64).collect();
        assert!(!macd(&closes, 12, 26, 9).is_empty());
    }

    #[test]
    fn bollinger_brackets_the_mean() {
        let closes: Vec<f64> = vec![10.0, 11.0, 9.0, 10.5, 9.5, 10.0, 10.2, 9.8, 10.1, 9.9,
                                    10.0, 10.3, 9.7, 10.0, 10.1, 9.9, 10.2, 9.8, 10.0, 10.0];
        let bands = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bands.lower < bands.middle && bands.middle < bands.upper);
        assert!((bands.middle - 10.0).abs() < 0.1);
    }

    #[test]
    fn percent_b_maps_band_edges() {
        let bands = BollingerBands {
            upper: 110.0,
            middle: 100.0,
            lower: 90.0,
        };
        assert_eq!(bands.percent_b(90.0), 0.0);
        assert_eq!(bands.percent_b(110.0), 1.0);
        assert_eq!(bands.percent_b(100.0), 0.5);
    }
}
