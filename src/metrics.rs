use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return f64::NAN;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n as f64
}

pub fn evaluate(actual: &[f64], predicted: &[f64]) -> RegressionMetrics {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return RegressionMetrics {
            samples: 0,
            mse: f64::NAN,
            rmse: f64::NAN,
            mae: f64::NAN,
            r2: f64::NAN,
        };
    }
    let actual = &actual[..n];
    let predicted = &predicted[..n];

    let mse = mean_squared_error(actual, predicted);
    let mae = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n as f64;
    let mean = actual.iter().sum::<f64>() / n as f64;
    let ss_tot = actual.iter().map(|a| (a - mean).powi(2)).sum::<f64>();
    let ss_res = mse * n as f64;
    // Constant targets: follow the usual convention of 1.0 for a perfect fit, 0.0 otherwise.
    let r2 = if ss_tot <= 0.0 {
        if ss_res <= 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - ss_res / ss_tot
    };

    RegressionMetrics {
        samples: n,
        mse,
        rmse: mse.sqrt(),
        mae,
        r2,
    }
}
