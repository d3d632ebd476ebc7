use burn::tensor::{backend::Backend, Data, Int, Shape, Tensor};

use crate::data::batch::{WindowBatch, Windows};
use crate::data::schema::{Schema, AVAILABLE_MASK, TARGET};
use crate::error::{ForecastError, Result};

/// Splits a window batch into insample/outsample slices and the configured
/// covariate groups. All channel names are resolved against the schemas
/// once, at construction, so steps never do string lookups.
#[derive(Debug, Clone)]
pub struct WindowParser {
    h: usize,
    y_idx: usize,
    mask_idx: usize,
    hist_idx: Vec<usize>,
    futr_idx: Vec<usize>,
    stat_idx: Vec<usize>,
    stat_names: Vec<String>,
    data_idx: Vec<usize>,
    y_data_pos: usize,
}

impl WindowParser {
    pub fn resolve(
        h: usize,
        temporal_cols: &Schema,
        static_cols: Option<&Schema>,
        hist_exog: &[String],
        futr_exog: &[String],
        stat_exog: &[String],
    ) -> Result<Self> {
        let y_idx = temporal_cols.index_of(TARGET)?;
        let mask_idx = temporal_cols.index_of(AVAILABLE_MASK)?;
        let hist_idx = temporal_cols.indexer(hist_exog)?;
        let futr_idx = temporal_cols.indexer(futr_exog)?;

        let stat_idx = if stat_exog.is_empty() {
            Vec::new()
        } else {
            match static_cols {
                Some(cols) => cols.indexer(stat_exog)?,
                None => return Err(ForecastError::MissingStaticSchema(stat_exog[0].clone())),
            }
        };

        let data_idx = temporal_cols.data_indices();
        let y_data_pos = data_idx
            .iter()
            .position(|idx| *idx == y_idx)
            .ok_or_else(|| ForecastError::MissingChannel(TARGET.to_string()))?;

        Ok(Self {
            h,
            y_idx,
            mask_idx,
            hist_idx,
            futr_idx,
            stat_idx,
            stat_names: stat_exog.to_vec(),
            data_idx,
            y_data_pos,
        })
    }

    pub fn mask_index(&self) -> usize {
        self.mask_idx
    }

    /// Channels the scaler normalizes: everything but `available_mask`.
    pub fn data_indices(&self) -> &[usize] {
        &self.data_idx
    }

    /// Position of the target within `data_indices`, for inverting the
    /// normalization on predictions only.
    pub fn y_data_position(&self) -> usize {
        self.y_data_pos
    }

    pub fn parse<B: Backend>(&self, windows: &Windows<B>) -> Result<WindowBatch<B>> {
        let [num_windows, window_size, _] = windows.temporal.dims();
        let insample = window_size - self.h;

        let y = self.channel(&windows.temporal, self.y_idx);
        let mask = self.channel(&windows.temporal, self.mask_idx);

        let insample_y = y
            .clone()
            .slice([0..num_windows, 0..insample, 0..1])
            .squeeze(2);
        let outsample_y = y
            .slice([0..num_windows, insample..window_size, 0..1])
            .squeeze(2);
        let insample_mask = mask
            .clone()
            .slice([0..num_windows, 0..insample, 0..1])
            .squeeze(2);
        let outsample_mask = mask
            .slice([0..num_windows, insample..window_size, 0..1])
            .squeeze(2);

        let hist_exog = if self.hist_idx.is_empty() {
            None
        } else {
            let channels = select_channels(&windows.temporal, &self.hist_idx);
            Some(channels.slice([0..num_windows, 0..insample, 0..self.hist_idx.len()]))
        };

        let futr_exog = if self.futr_idx.is_empty() {
            None
        } else {
            Some(select_channels(&windows.temporal, &self.futr_idx))
        };

        let stat_exog = if self.stat_idx.is_empty() {
            None
        } else {
            let statics = windows.statics.clone().ok_or_else(|| {
                ForecastError::MissingStaticSchema(self.stat_names[0].clone())
            })?;
            Some(statics.select(1, index_tensor::<B>(&self.stat_idx)))
        };

        Ok(WindowBatch {
            insample_y,
            insample_mask,
            outsample_y,
            outsample_mask,
            hist_exog,
            futr_exog,
            stat_exog,
        })
    }

    fn channel<B: Backend>(&self, temporal: &Tensor<B, 3>, idx: usize) -> Tensor<B, 3> {
        let [num_windows, window_size, _] = temporal.dims();
        temporal
            .clone()
            .slice([0..num_windows, 0..window_size, idx..idx + 1])
    }
}

fn select_channels<B: Backend>(temporal: &Tensor<B, 3>, idx: &[usize]) -> Tensor<B, 3> {
    temporal.clone().select(2, index_tensor::<B>(idx))
}

fn index_tensor<B: Backend>(idx: &[usize]) -> Tensor<B, 1, Int> {
    let idx: Vec<i32> = idx.iter().map(|i| *i as i32).collect();
    let len = idx.len();
    Tensor::from_data(Data::new(idx, Shape::new([len])).convert())
}
