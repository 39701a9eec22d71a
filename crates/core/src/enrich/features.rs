use crate::domain::{EnrichedRecord, ObservationRecord};

pub const SHORT_WINDOW: usize = 7;
pub const LONG_WINDOW: usize = 30;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Derived features over an ascending, de-duplicated series with strictly positive closes.
pub fn compute_features(observations: &[ObservationRecord], annualize: bool) -> Vec<EnrichedRecord> {
    let closes: Vec<f64> = observations.iter().map(|o| o.close).collect();
    let returns = log_returns(&closes);
    let ma_short = rolling_mean(&closes, SHORT_WINDOW);
    let ma_long = rolling_mean(&closes, LONG_WINDOW);
    let scale = if annualize {
        TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        1.0
    };
    let vol_short = rolling_std(&returns, SHORT_WINDOW);
    let vol_long = rolling_std(&returns, LONG_WINDOW);

    observations
        .iter()
        .enumerate()
        .map(|(i, obs)| EnrichedRecord {
            daily_log_return: returns[i],
            moving_avg_7: ma_short[i],
            moving_avg_30: ma_long[i],
            volatility_7: vol_short[i].map(|v| v * scale),
            volatility_30: vol_long[i].map(|v| v * scale),
            ..EnrichedRecord::from_observation(obs)
        })
        .collect()
}

pub fn log_returns(closes: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(closes.len());
    for (i, &close) in closes.iter().enumerate() {
        let ret = match i.checked_sub(1).map(|p| closes[p]) {
            Some(prev) if prev > 0.0 && close > 0.0 => Some((close / prev).ln()),
            _ => None,
        };
        out.push(ret);
    }
    out
}

/// Mean of the trailing `window` values; `None` until the window is full.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            Some(slice.iter().sum::<f64>() / window as f64)
        })
        .collect()
}

/// Sample standard deviation of the values present in the trailing `window` positions.
///
/// `None` until the window is full or while it holds fewer than two values. For log returns the
/// first window therefore uses `window - 1` returns, since the first return is always absent.
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let present: Vec<f64> = values[i + 1 - window..=i].iter().flatten().copied().collect();
            sample_std(&present)
        })
        .collect()
}

fn sample_std(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    Some(var.sqrt())
}
