//! Empirical state-of-charge / state-of-health curve fits.
//!
//! Both curves are sums of Gaussian kernels `a * exp(-((x - b) / c)^2)`.

/// (a, b, c) per kernel, input is the battery voltage.
const SOC_KERNELS: [(f64, f64, f64); 4] = [
    (112.1627, 14.2601, 1.8161),
    (14.3937, 11.6890, 0.8211),
    (0.0, 12.7872, 0.0025),
    (10.5555, 10.9406, 0.3866),
];

const SOH_KERNELS: [(f64, f64, f64); 7] = [
    (85.918, 0.0181, 0.0083),
    (85.11, 0.0324, 0.0104),
    (0.3085, 0.0342, 0.0021),
    (16.521, 0.0382, 0.0013),
    (-13.874, 0.0381, 0.0011),
    (40.077, 0.0474, 0.0079),
    (18.207, 0.0556, 0.0048),
];

pub const PERCENT_MAX: f64 = 100.0;

/// Rounds to 4 decimal places.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn gaussian_sum(kernels: &[(f64, f64, f64)], x: f64) -> Option<f64> {
    if !x.is_finite() {
        return None;
    }
    let sum: f64 = kernels
        .iter()
        .map(|&(a, b, c)| a * (-((x - b) / c).powi(2)).exp())
        .sum();
    sum.is_finite().then_some(sum)
}

/// State of charge in percent for a battery voltage, clamped to `0..=100`.
///
/// Returns `None` if the input or the result is not a finite number; callers
/// skip the store write in that case.
pub fn soc(voltage: f64) -> Option<f64> {
    gaussian_sum(&SOC_KERNELS, voltage).map(|soc| round4(soc.clamp(0.0, PERCENT_MAX)))
}

/// State of health in percent. Only the upper bound is clamped.
pub fn soh(x: f64) -> Option<f64> {
    gaussian_sum(&SOH_KERNELS, x).map(|soh| round4(soh.min(PERCENT_MAX)))
}
