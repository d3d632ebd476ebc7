use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::{Dataset, InMemDataset};
use burn::tensor::backend::Backend;
use burn::tensor::{Data, Shape, Tensor};
use serde::{Deserialize, Serialize};

use super::batch::Batch;
use super::schema::{Schema, AVAILABLE_MASK, TARGET};

/// One raw series as stored on disk, one JSON object per row. Exogenous
/// channels are keyed by name and span the same timesteps as `y`; static
/// features are a single value per name.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeSeriesItem {
    pub item_id: String,
    pub y: Vec<f32>,
    pub available_mask: Option<Vec<f32>>,
    pub exog: Option<BTreeMap<String, Vec<f32>>>,
    pub statics: Option<BTreeMap<String, f32>>,
}

/// Cheaply cloneable dataset so fit can build a shuffled train loader and a
/// sequential validation loader over the same items.
#[derive(Clone, Debug)]
pub struct TimeSeriesDataset {
    items: Arc<Vec<TimeSeriesItem>>,
}

impl TimeSeriesDataset {
    pub fn new(items: Vec<TimeSeriesItem>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    pub fn from_json_rows<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let dataset = InMemDataset::<TimeSeriesItem>::from_json_rows(path)?;
        Ok(Self::new(dataset.iter().collect()))
    }
}

impl Dataset<TimeSeriesItem> for TimeSeriesDataset {
    fn get(&self, index: usize) -> Option<TimeSeriesItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Pads a group of series into one `[N, C, T]` batch. Series shorter than
/// the longest in the group are left-padded with zero values and zero
/// availability, so the trailing edge of every series stays aligned.
/// Channel order is `y`, exogenous names in sorted order, `available_mask`.
#[derive(Clone, Debug)]
pub struct TimeSeriesBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> TimeSeriesBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<TimeSeriesItem, Batch<B>> for TimeSeriesBatcher<B> {
    fn batch(&self, items: Vec<TimeSeriesItem>) -> Batch<B> {
        let max_len = items.iter().map(|item| item.y.len()).max().unwrap_or(0);

        let exog_names: Vec<String> = items
            .iter()
            .find_map(|item| item.exog.as_ref())
            .map(|exog| exog.keys().cloned().collect())
            .unwrap_or_default();

        let mut names = vec![TARGET.to_string()];
        names.extend(exog_names.iter().cloned());
        names.push(AVAILABLE_MASK.to_string());
        let temporal_cols = Schema::new(names);
        let num_channels = temporal_cols.len();

        let rows: Vec<Tensor<B, 3>> = items
            .iter()
            .map(|item| {
                let pad = max_len - item.y.len();
                let mut flat = Vec::with_capacity(num_channels * max_len);

                flat.extend(std::iter::repeat(0.0f32).take(pad));
                flat.extend(item.y.iter().copied());

                for name in &exog_names {
                    let channel = item.exog.as_ref().and_then(|exog| exog.get(name));
                    match channel {
                        Some(values) => {
                            flat.extend(std::iter::repeat(0.0f32).take(pad));
                            flat.extend(values.iter().copied());
                        }
                        None => flat.extend(std::iter::repeat(0.0f32).take(max_len)),
                    }
                }

                flat.extend(std::iter::repeat(0.0f32).take(pad));
                match &item.available_mask {
                    Some(mask) => flat.extend(mask.iter().copied()),
                    None => flat.extend(std::iter::repeat(1.0f32).take(item.y.len())),
                }

                let data = Data::new(flat, Shape::new([num_channels, max_len]));
                let tensor: Tensor<B, 2> = Tensor::from_data(data.convert());
                tensor.reshape([1, num_channels, max_len])
            })
            .collect();

        let temporal = Tensor::cat(rows, 0);

        let static_names: Vec<String> = items
            .iter()
            .find_map(|item| item.statics.as_ref())
            .map(|statics| statics.keys().cloned().collect())
            .unwrap_or_default();

        let (statics, static_cols) = if static_names.is_empty() {
            (None, None)
        } else {
            let rows: Vec<Tensor<B, 2>> = items
                .iter()
                .map(|item| {
                    let values: Vec<f32> = static_names
                        .iter()
                        .map(|name| {
                            item.statics
                                .as_ref()
                                .and_then(|statics| statics.get(name))
                                .copied()
                                .unwrap_or(0.0)
                        })
                        .collect();
                    let data = Data::new(values, Shape::new([static_names.len()]));
                    let tensor: Tensor<B, 1> = Tensor::from_data(data.convert());
                    tensor.reshape([1, static_names.len()])
                })
                .collect();
            (
                Some(Tensor::cat(rows, 0)),
                Some(Schema::new(static_names)),
            )
        };

        Batch {
            temporal,
            temporal_cols,
            statics,
            static_cols,
        }
    }
}
