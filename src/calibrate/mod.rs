mod center_z;
mod cross_correlate;

pub use center_z::{center_z_height, EucentricHeight, ShiftPoint};
pub use cross_correlate::cross_correlate;

/// Indices of the values lying strictly within `m` standard deviations of
/// the mean. A constant series is kept whole.
pub fn reject_outliers(data: &[f64], m: f64) -> Vec<usize> {
    if data.is_empty() {
        return Vec::new();
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let std = (data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        return (0..data.len()).collect();
    }
    data.iter()
        .enumerate()
        .filter(|(_, &v)| mean - m * std < v && v < mean + m * std)
        .map(|(i, _)| i)
        .collect()
}

/// Least-squares line through `(x, y)`, as `(slope, intercept)`
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(a, b)| (a - mean_x) * (b - mean_y))
        .sum();
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}
