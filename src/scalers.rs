use std::str::FromStr;

use burn::tensor::{backend::Backend, Data, Shape, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Floor for scale statistics so constant windows stay invertible.
const EPS: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalerType {
    Standard,
    Robust,
    MinMax,
    Identity,
}

impl FromStr for ScalerType {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(Self::Standard),
            "robust" => Ok(Self::Robust),
            "minmax" => Ok(Self::MinMax),
            "identity" => Ok(Self::Identity),
            other => Err(ForecastError::UnknownScalerType(other.to_string())),
        }
    }
}

/// Shift and scale computed by one `transform` call, shaped `[Ws, 1, C]` to
/// broadcast over the time axis. Returned explicitly and handed back to
/// `inverse_transform`, so there is no shared state between calls.
#[derive(Clone, Debug)]
pub struct ScalerStats<B: Backend> {
    pub shift: Tensor<B, 3>,
    pub scale: Tensor<B, 3>,
}

/// Per-window temporal normalizer. Statistics are computed per window and
/// per channel over the time axis, using only positions where the mask is
/// nonzero; the transform itself is applied to every position.
#[derive(Debug, Clone, Copy)]
pub struct TemporalScaler {
    scaler_type: ScalerType,
}

impl TemporalScaler {
    pub fn new(scaler_type: ScalerType) -> Self {
        Self { scaler_type }
    }

    /// Normalize `x` `[Ws, T, C]` with availability `mask` `[Ws, T, 1]`.
    pub fn transform<B: Backend>(
        &self,
        x: Tensor<B, 3>,
        mask: Tensor<B, 3>,
    ) -> (Tensor<B, 3>, ScalerStats<B>) {
        // Statistics must not flow gradients back into the network.
        let data = x.clone().detach().set_require_grad(false);
        let mask = mask.detach().set_require_grad(false);

        let stats = match self.scaler_type {
            ScalerType::Standard => standard_stats(data, mask),
            ScalerType::Robust => robust_stats(data, mask),
            ScalerType::MinMax => minmax_stats(data, mask),
            ScalerType::Identity => identity_stats(data),
        };

        let z = (x - stats.shift.clone()) / stats.scale.clone();
        (z, stats)
    }

    /// Exact algebraic inverse of `transform` given its statistics.
    pub fn inverse_transform<B: Backend>(
        &self,
        z: Tensor<B, 3>,
        scale: Tensor<B, 3>,
        shift: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        z * scale + shift
    }
}

fn standard_stats<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 3>) -> ScalerStats<B> {
    let count = mask.clone().sum_dim(1).clamp_min(1.0);
    let mean = (x.clone() * mask.clone()).sum_dim(1) / count.clone();
    let centered = (x - mean.clone()) * mask;
    let variance = (centered.clone() * centered).sum_dim(1) / count;
    let scale = (variance + EPS).sqrt();

    ScalerStats { shift: mean, scale }
}

fn minmax_stats<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 3>) -> ScalerStats<B> {
    // Push masked positions out of the running min/max.
    let off = mask.clone().neg() + 1.0;
    let min = (x.clone() * mask.clone() + off.clone() * 1e30).min_dim(1);
    let max = (x * mask - off * 1e30).max_dim(1);
    let scale = (max - min.clone()).clamp_min(EPS);

    ScalerStats { shift: min, scale }
}

/// Median and mean absolute deviation over unmasked positions. Medians need
/// a sort, so this one runs on the host; the statistics are detached from
/// the graph anyway.
fn robust_stats<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 3>) -> ScalerStats<B> {
    let [num_windows, len, channels] = x.dims();
    let values: Vec<f32> = x.into_data().convert().value;
    let mask_values: Vec<f32> = mask.into_data().convert().value;

    let mut shift = vec![0.0f32; num_windows * channels];
    let mut scale = vec![1.0f32; num_windows * channels];

    for w in 0..num_windows {
        for c in 0..channels {
            let mut observed: Vec<f32> = (0..len)
                .filter(|t| mask_values[w * len + t] != 0.0)
                .map(|t| values[(w * len + t) * channels + c])
                .collect();
            if observed.is_empty() {
                continue;
            }
            observed.sort_by(|a, b| a.total_cmp(b));
            let mid = observed.len() / 2;
            let median = if observed.len() % 2 == 0 {
                (observed[mid - 1] + observed[mid]) / 2.0
            } else {
                observed[mid]
            };
            let mad = observed.iter().map(|v| (v - median).abs()).sum::<f32>()
                / observed.len() as f32;

            shift[w * channels + c] = median;
            scale[w * channels + c] = mad.max(EPS);
        }
    }

    let shape = Shape::new([num_windows, 1, channels]);
    ScalerStats {
        shift: Tensor::from_data(Data::new(shift, shape.clone()).convert()),
        scale: Tensor::from_data(Data::new(scale, shape).convert()),
    }
}

fn identity_stats<B: Backend>(x: Tensor<B, 3>) -> ScalerStats<B> {
    let [num_windows, _, channels] = x.dims();
    ScalerStats {
        shift: Tensor::zeros([num_windows, 1, channels]),
        scale: Tensor::ones([num_windows, 1, channels]),
    }
}
