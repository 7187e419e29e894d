//! Piecewise-linear interpolation between control points.

use crate::{Error, Result};

/// Interpolates `value` along the curve through `(x[i], y[i])`.
///
/// `x` must be sorted ascending. Inputs outside the domain clamp to the
/// first or last `y`, and NaN clamps to the first. Returns `None` for
/// empty or mismatched lists.
pub fn interpolate(x: &[f64], y: &[f64], value: f64) -> Option<f64> {
    if x.is_empty() || x.len() != y.len() {
        return None;
    }
    Some(interpolate_clamped(x, y, value))
}

fn interpolate_clamped(x: &[f64], y: &[f64], value: f64) -> f64 {
    let last = x.len() - 1;
    if value.is_nan() || value <= x[0] {
        return y[0];
    }
    if value >= x[last] {
        return y[last];
    }

    for i in 1..=last {
        if value <= x[i] {
            let (x0, x1) = (x[i - 1], x[i]);
            let (y0, y1) = (y[i - 1], y[i]);
            if x1 == x0 {
                return y0;
            }
            return y0 + (value - x0) * (y1 - y0) / (x1 - x0);
        }
    }
    y[last]
}

/// DAC percent to PAR percent calibration curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPoints {
    dac: Vec<f64>,
    par: Vec<f64>,
}

impl ControlPoints {
    /// Builds a curve from `(dac_percent, par_percent)` pairs.
    ///
    /// Points are sorted by DAC percent. At least two finite points are
    /// required and PAR must not decrease as DAC increases.
    pub fn new<I>(points: I) -> Result<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut points: Vec<(f64, f64)> = points.into_iter().collect();
        if points.len() < 2 {
            return Err(Error::InvalidControlPoints(format!(
                "need at least 2 points, got {}",
                points.len()
            )));
        }
        if let Some((dac, par)) = points
            .iter()
            .find(|(dac, par)| !dac.is_finite() || !par.is_finite())
        {
            return Err(Error::InvalidControlPoints(format!(
                "non-finite point ({dac}, {par})"
            )));
        }

        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(pair) = points.windows(2).find(|w| w[1].1 < w[0].1) {
            return Err(Error::InvalidControlPoints(format!(
                "par decreases from {} to {} between dac {} and {}",
                pair[0].1, pair[1].1, pair[0].0, pair[1].0
            )));
        }

        let (dac, par) = points.into_iter().unzip();
        Ok(Self { dac, par })
    }

    /// Returns the DAC percent that produces a PAR percent.
    pub fn par_to_dac(&self, par_percent: f64) -> f64 {
        interpolate_clamped(&self.par, &self.dac, par_percent)
    }

    /// Returns the points as `(dac_percent, par_percent)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.dac.iter().copied().zip(self.par.iter().copied())
    }
}
