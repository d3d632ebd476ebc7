use std::str::FromStr;

use burn::tensor::{backend::Backend, Data, Int, Shape, Tensor};
use rand::rngs::StdRng;
use rand::Rng;

use crate::data::batch::{Batch, Windows};
use crate::data::schema::AVAILABLE_MASK;
use crate::error::{ForecastError, Result};

/// Execution mode a batch of windows is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Train,
    Validation,
    Predict,
}

impl FromStr for StepKind {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "val" => Ok(Self::Validation),
            "predict" => Ok(Self::Predict),
            other => Err(ForecastError::UnknownStep(other.to_string())),
        }
    }
}

/// Cuts fixed-length sliding windows of `input_size + h` steps out of a
/// padded batch. Train mode filters and subsamples; validation and predict
/// modes keep every slide position.
#[derive(Debug, Clone)]
pub struct WindowBuilder {
    input_size: usize,
    h: usize,
    step_size: usize,
    windows_batch_size: Option<usize>,
}

impl WindowBuilder {
    pub fn new(
        input_size: usize,
        h: usize,
        step_size: usize,
        windows_batch_size: Option<usize>,
    ) -> Self {
        Self {
            input_size,
            h,
            step_size,
            windows_batch_size,
        }
    }

    fn window_size(&self) -> usize {
        self.input_size + self.h
    }

    pub fn build<B: Backend>(
        &self,
        batch: &Batch<B>,
        step: StepKind,
        val_size: usize,
        test_size: usize,
        predict_step_size: usize,
        has_futr_exog: bool,
        rng: &mut StdRng,
    ) -> Result<Windows<B>> {
        match step {
            StepKind::Train => self.build_train(batch, val_size, test_size, rng),
            StepKind::Validation => self.build_validation(batch, val_size, test_size),
            StepKind::Predict => {
                self.build_predict(batch, test_size, predict_step_size, has_futr_exog)
            }
        }
    }

    /// Train windows: holdout removed, trailing edge padded by `h` so the
    /// last real observation still heads a full horizon, windows without a
    /// single available target in the horizon or the encoder dropped, and
    /// the survivors capped at `windows_batch_size`.
    fn build_train<B: Backend>(
        &self,
        batch: &Batch<B>,
        val_size: usize,
        test_size: usize,
        rng: &mut StdRng,
    ) -> Result<Windows<B>> {
        let window_size = self.window_size();
        let [num_series, num_channels, len] = batch.temporal.dims();

        let holdout = val_size + test_size;
        let mut temporal = batch.temporal.clone();
        if holdout > 0 {
            let cutoff = len
                .checked_sub(holdout)
                .filter(|cutoff| *cutoff > 0)
                .ok_or(ForecastError::NoTrainWindows)?;
            temporal = temporal.slice([0..num_series, 0..num_channels, 0..cutoff]);
        }
        let temporal = pad_trailing(temporal, self.h);

        let (windows, windows_per_series) = unfold(temporal, window_size, self.step_size)
            .map_err(|_| ForecastError::NoTrainWindows)?;
        let total = num_series * windows_per_series;

        // Availability of the target per window, split at the horizon.
        let mask_idx = batch.temporal_cols.index_of(AVAILABLE_MASK)?;
        let mask = windows
            .clone()
            .slice([0..total, 0..window_size, mask_idx..mask_idx + 1]);
        let horizon_sum: Vec<f32> = mask
            .clone()
            .slice([0..total, window_size - self.h..window_size, 0..1])
            .sum_dim(1)
            .into_data()
            .convert()
            .value;
        let encoder_sum: Vec<f32> = mask
            .slice([0..total, 0..window_size - self.h, 0..1])
            .sum_dim(1)
            .into_data()
            .convert()
            .value;

        let keep: Vec<i32> = (0..total)
            .filter(|w| horizon_sum[*w] > 0.0 && encoder_sum[*w] > 0.0)
            .map(|w| w as i32)
            .collect();
        if keep.is_empty() {
            return Err(ForecastError::NoTrainWindows);
        }

        let pool = keep.len();
        let keep = index_tensor::<B>(keep);
        let mut windows = windows.select(0, keep.clone());
        let mut statics = batch
            .statics
            .clone()
            .map(|statics| replicate_rows(statics, windows_per_series).select(0, keep));

        if let Some(cap) = self.windows_batch_size {
            let sampled: Vec<i32> = if pool < cap {
                (0..cap).map(|_| rng.gen_range(0..pool) as i32).collect()
            } else {
                rand::seq::index::sample(rng, pool, cap)
                    .iter()
                    .map(|idx| idx as i32)
                    .collect()
            };
            let sampled = index_tensor::<B>(sampled);
            windows = windows.select(0, sampled.clone());
            statics = statics.map(|statics| statics.select(0, sampled));
        }

        Ok(Windows {
            temporal: windows,
            temporal_cols: batch.temporal_cols.clone(),
            statics,
            static_cols: batch.static_cols.clone(),
        })
    }

    /// Validation windows over the holdout span, sliding with the training
    /// step size. Every position is kept, fully masked horizons included:
    /// fixed window positions keep epoch metrics comparable, masking is the
    /// validation loss's job.
    fn build_validation<B: Backend>(
        &self,
        batch: &Batch<B>,
        val_size: usize,
        test_size: usize,
    ) -> Result<Windows<B>> {
        let [num_series, num_channels, len] = batch.temporal.dims();

        let start = len.saturating_sub(self.input_size + val_size + test_size);
        let end = len.saturating_sub(test_size);
        let temporal = batch
            .temporal
            .clone()
            .slice([0..num_series, 0..num_channels, start..end]);

        let (windows, windows_per_series) = unfold(temporal, self.window_size(), self.step_size)?;

        Ok(Windows {
            temporal: windows,
            temporal_cols: batch.temporal_cols.clone(),
            statics: batch
                .statics
                .clone()
                .map(|statics| replicate_rows(statics, windows_per_series)),
            static_cols: batch.static_cols.clone(),
        })
    }

    /// Predict windows over the trailing `input_size + test_size` span.
    /// Without a held-out test span or future covariates the trailing edge
    /// is padded by `h` so the last observation forecasts a full horizon.
    fn build_predict<B: Backend>(
        &self,
        batch: &Batch<B>,
        test_size: usize,
        predict_step_size: usize,
        has_futr_exog: bool,
    ) -> Result<Windows<B>> {
        let [num_series, num_channels, len] = batch.temporal.dims();

        let start = len.saturating_sub(self.input_size + test_size);
        let mut temporal = batch
            .temporal
            .clone()
            .slice([0..num_series, 0..num_channels, start..len]);
        if test_size == 0 && !has_futr_exog {
            temporal = pad_trailing(temporal, self.h);
        }

        let (windows, windows_per_series) =
            unfold(temporal, self.window_size(), predict_step_size)?;

        Ok(Windows {
            temporal: windows,
            temporal_cols: batch.temporal_cols.clone(),
            statics: batch
                .statics
                .clone()
                .map(|statics| replicate_rows(statics, windows_per_series)),
            static_cols: batch.static_cols.clone(),
        })
    }
}

/// Zero-pad the trailing edge of the time axis by `h` positions. The
/// availability channel is padded with zeros too, so padded positions never
/// count as observed.
fn pad_trailing<B: Backend>(temporal: Tensor<B, 3>, h: usize) -> Tensor<B, 3> {
    let [num_series, num_channels, _] = temporal.dims();
    Tensor::cat(vec![temporal, Tensor::zeros([num_series, num_channels, h])], 2)
}

/// Slide a window over the time axis: `[N, C, T]` into `[N * Ws, W, C]`,
/// windows of one series contiguous and in temporal order.
fn unfold<B: Backend>(
    temporal: Tensor<B, 3>,
    window_size: usize,
    step: usize,
) -> Result<(Tensor<B, 3>, usize)> {
    let [num_series, num_channels, len] = temporal.dims();

    let mut slices: Vec<Tensor<B, 4>> = Vec::new();
    let mut start = 0;
    while start + window_size <= len {
        let slice = temporal
            .clone()
            .slice([0..num_series, 0..num_channels, start..start + window_size]);
        slices.push(slice.reshape([num_series, num_channels, 1, window_size]));
        start += step;
    }
    if slices.is_empty() {
        return Err(ForecastError::SeriesTooShort(window_size));
    }
    let windows_per_series = slices.len();

    // [N, C, Ws, W] -> [N, Ws, W, C] -> [N * Ws, W, C]
    let windows = Tensor::cat(slices, 2)
        .swap_dims(1, 2)
        .swap_dims(2, 3)
        .reshape([num_series * windows_per_series, window_size, num_channels]);
    Ok((windows, windows_per_series))
}

/// Repeat each static row `times` consecutively, matching the window order
/// produced by `unfold`.
fn replicate_rows<B: Backend>(statics: Tensor<B, 2>, times: usize) -> Tensor<B, 2> {
    let [num_series, num_feats] = statics.dims();
    statics
        .reshape([num_series, 1, num_feats])
        .repeat(1, times)
        .reshape([num_series * times, num_feats])
}

fn index_tensor<B: Backend>(indices: Vec<i32>) -> Tensor<B, 1, Int> {
    let len = indices.len();
    Tensor::from_data(Data::new(indices, Shape::new([len])).convert())
}
