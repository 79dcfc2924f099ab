/// Indicator primitives shared by the reference providers.
///
/// All functions operate on series ordered oldest first and return `None` rather than a
/// meaningless number when the input is too short or degenerate.
use std::collections::VecDeque;

/// Rolling price/volume window with a volume-weighted average price.
#[derive(Debug, Clone)]
pub struct VolumeWindow {
    max_size: usize,
    entries: VecDeque<(f64, f64)>,
    total_volume: f64,
}

impl VolumeWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: VecDeque::with_capacity(max_size),
            total_volume: 0.0,
        }
    }

    /// Add a price/volume entry, evicting the oldest entry at capacity.
    pub fn add(&mut self, price: f64, volume: f64) {
        if self.entries.len() >= self.max_size {
            if let Some((_, evicted)) = self.entries.pop_front() {
                self.total_volume -= evicted;
            }
        }

        self.entries.push_back((price, volume));
        self.total_volume += volume;
    }

    /// `Σ(price · volume) / Σ(volume)`, `None` without volume.
    pub fn vwap(&self) -> Option<f64> {
        let volume = self.entries.iter().map(|(_, volume)| volume).sum::<f64>();
        let notional = self
            .entries
            .iter()
            .map(|(price, volume)| price * volume)
            .sum::<f64>();

        (volume > 0.0).then(|| notional / volume)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn avg_volume(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.total_volume / self.len() as f64)
    }
}

/// Exponential Moving Average, seeded with a simple average until `period` values are seen.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    value: Option<f64>,
    count: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            count: 0,
        }
    }

    /// EMA after feeding every value of `series`.
    pub fn from_series(period: usize, series: &[f64]) -> Self {
        series.iter().fold(Self::new(period), |mut ema, value| {
            ema.update(*value);
            ema
        })
    }

    pub fn update(&mut self, new_value: f64) {
        self.count += 1;

        self.value = Some(match self.value {
            None => new_value,
            Some(current) if self.count < self.period => {
                (current * (self.count - 1) as f64 + new_value) / self.count as f64
            }
            Some(current) => self.alpha * new_value + (1.0 - self.alpha) * current,
        });
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Buying share of signed quote flow in `[0, 100]`: 100 all buying, 0 all selling, 50
/// balanced or flat.
///
/// `None` without any flow.
pub fn buy_pressure(deltas: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (count, bought, gross) = deltas
        .into_iter()
        .fold((0_usize, 0.0, 0.0), |(count, bought, gross), delta| {
            (count + 1, bought + delta.max(0.0), gross + delta.abs())
        });

    match count {
        0 => None,
        _ if gross > 0.0 => Some(100.0 * bought / gross),
        _ => Some(50.0),
    }
}

/// Pearson correlation of two equally long series (minimum 5 points).
pub fn calc_correlation(series_a: &[f64], series_b: &[f64]) -> Option<f64> {
    if series_a.len() != series_b.len() || series_a.len() < 5 {
        return None;
    }

    let n = series_a.len() as f64;
    let mean_a = series_a.iter().sum::<f64>() / n;
    let mean_b = series_b.iter().sum::<f64>() / n;

    let (cov, var_a, var_b) = series_a.iter().zip(series_b).fold(
        (0.0, 0.0, 0.0),
        |(cov, var_a, var_b), (a, b)| {
            let (diff_a, diff_b) = (a - mean_a, b - mean_b);
            (
                cov + diff_a * diff_b,
                var_a + diff_a * diff_a,
                var_b + diff_b * diff_b,
            )
        },
    );

    if var_a < 1e-10 || var_b < 1e-10 {
        return None;
    }

    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Wilder RSI series. Element `i` is the RSI after `closes[i + period]`; empty if
/// `closes.len() <= period`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let changes = closes
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect::<Vec<_>>();

    let (seed_gain, seed_loss) = changes[..period]
        .iter()
        .fold((0.0, 0.0), |(gain, loss), change| {
            (gain + change.max(0.0), loss + (-change).max(0.0))
        });

    let period_f = period as f64;
    let (mut avg_gain, mut avg_loss) = (seed_gain / period_f, seed_loss / period_f);

    let mut series = Vec::with_capacity(changes.len() - period + 1);
    series.push(rsi_value(avg_gain, avg_loss));

    for change in &changes[period..] {
        avg_gain = (avg_gain * (period_f - 1.0) + change.max(0.0)) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + (-change).max(0.0)) / period_f;
        series.push(rsi_value(avg_gain, avg_loss));
    }

    series
}

/// Latest Wilder RSI, if enough closes are available.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    match (avg_gain > 0.0, avg_loss > 0.0) {
        (false, false) => 50.0,
        (_, false) => 100.0,
        _ => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    }
}

/// Simple returns `p[i] / p[i-1] - 1`, skipping non-positive denominators.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|pair| pair[0] > 0.0)
        .map(|pair| pair[1] / pair[0] - 1.0)
        .collect()
}

/// Sample standard deviation (minimum 2 points).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;

    Some(variance.sqrt())
}
