use burn::tensor::{backend::Backend, Tensor};

use super::schema::Schema;

/// One padded multivariate batch as produced by the data loader. Channel
/// order in `temporal_cols` matches the channel axis of `temporal`.
#[derive(Clone, Debug)]
pub struct Batch<B: Backend> {
    pub temporal: Tensor<B, 3>, // [N, C, T]
    pub temporal_cols: Schema,
    pub statics: Option<Tensor<B, 2>>, // [N, S]
    pub static_cols: Option<Schema>,
}

/// Fixed-length windows cut from a batch, windows as the leading axis and
/// channels last. Static rows are replicated per window and stay
/// index-aligned with the temporal windows through filtering and
/// subsampling.
#[derive(Clone, Debug)]
pub struct Windows<B: Backend> {
    pub temporal: Tensor<B, 3>, // [Ws, L+H, C]
    pub temporal_cols: Schema,
    pub statics: Option<Tensor<B, 2>>, // [Ws, S]
    pub static_cols: Option<Schema>,
}

impl<B: Backend> Windows<B> {
    pub fn num_windows(&self) -> usize {
        self.temporal.dims()[0]
    }
}

/// Parsed model inputs, one tensor per covariate group. Absent groups are
/// `None` rather than empty tensors.
#[derive(Clone, Debug)]
pub struct WindowBatch<B: Backend> {
    pub insample_y: Tensor<B, 2>,            // [Ws, L]
    pub insample_mask: Tensor<B, 2>,         // [Ws, L]
    pub outsample_y: Tensor<B, 2>,           // [Ws, H]
    pub outsample_mask: Tensor<B, 2>,        // [Ws, H]
    pub hist_exog: Option<Tensor<B, 3>>,     // [Ws, L, D_h]
    pub futr_exog: Option<Tensor<B, 3>>,     // [Ws, L+H, D_f]
    pub stat_exog: Option<Tensor<B, 2>>,     // [Ws, D_s]
}
