//! End-to-end tests of the forecasting orchestrator with minimal
//! architecture and loss collaborators plugged into the trait seams.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Data, Shape, Tensor};

use windcast::data::{TimeSeriesBatcher, TimeSeriesDataset, TimeSeriesItem};
use windcast::{Architecture, ForecastError, ForecastModelConfig, Loss, ScalerType};

use burn::data::dataloader::batcher::Batcher;

type TestBackend = burn::backend::NdArray;
type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

fn item(id: &str, y: Vec<f32>, mask: Option<Vec<f32>>) -> TimeSeriesItem {
    TimeSeriesItem {
        item_id: id.to_string(),
        y,
        available_mask: mask,
        exog: None,
        statics: None,
    }
}

/// Linear head over the insample target, one output column.
#[derive(Module, Debug)]
struct LinearArch<B: Backend> {
    head: Linear<B>,
}

impl<B: Backend> LinearArch<B> {
    fn new(input_size: usize, h: usize) -> Self {
        Self {
            head: LinearConfig::new(input_size, h).init(),
        }
    }
}

impl<B: Backend> Architecture<B> for LinearArch<B> {
    fn forward(&self, windows: &windcast::data::WindowBatch<B>) -> Vec<Tensor<B, 3>> {
        let y_hat = self.head.forward(windows.insample_y.clone());
        vec![y_hat.unsqueeze_dim(2)]
    }
}

/// Always forecasts zero; with a scaler configured, predictions invert back
/// to the window's shift statistic.
struct ZeroArch;

impl<B: Backend> Architecture<B> for ZeroArch {
    fn forward(&self, windows: &windcast::data::WindowBatch<B>) -> Vec<Tensor<B, 3>> {
        let [num_windows, _] = windows.insample_y.dims();
        let h = windows.outsample_y.dims()[1];
        vec![Tensor::zeros([num_windows, h, 1])]
    }
}

/// Emits the same fixed row of output columns at every horizon position.
struct ConstArch {
    columns: Vec<f32>,
}

impl<B: Backend> Architecture<B> for ConstArch {
    fn forward(&self, windows: &windcast::data::WindowBatch<B>) -> Vec<Tensor<B, 3>> {
        let [num_windows, _] = windows.insample_y.dims();
        let h = windows.outsample_y.dims()[1];
        let k = self.columns.len();
        let flat: Vec<f32> = self
            .columns
            .iter()
            .cycle()
            .take(num_windows * h * k)
            .copied()
            .collect();
        vec![Tensor::from_data(
            Data::new(flat, Shape::new([num_windows, h, k])).convert(),
        )]
    }
}

/// Masked mean absolute error, single output column.
#[derive(Debug)]
struct Mae;

impl<B: Backend> Loss<B> for Mae {
    fn output_names(&self) -> Vec<String> {
        vec!["mae".to_string()]
    }

    fn compute(
        &self,
        y: Tensor<B, 2>,
        outputs: &[Tensor<B, 3>],
        mask: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let y_hat: Tensor<B, 2> = outputs[0].clone().squeeze(2);
        ((y - y_hat).abs() * mask.clone()).sum() / mask.sum().clamp_min(1.0)
    }
}

/// Three-column point loss, used to check forecast width handling.
struct ThreeColumnLoss;

impl<B: Backend> Loss<B> for ThreeColumnLoss {
    fn output_names(&self) -> Vec<String> {
        vec!["lo".to_string(), "median".to_string(), "hi".to_string()]
    }

    fn compute(
        &self,
        _y: Tensor<B, 2>,
        outputs: &[Tensor<B, 3>],
        _mask: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        outputs[0].clone().mean()
    }
}

/// Distribution-flavored loss whose sampler just forwards the first
/// parameter tensor.
struct PassthroughDistLoss;

impl<B: Backend> Loss<B> for PassthroughDistLoss {
    fn is_distribution_output(&self) -> bool {
        true
    }

    fn output_names(&self) -> Vec<String> {
        vec!["mean".to_string()]
    }

    fn compute(
        &self,
        _y: Tensor<B, 2>,
        outputs: &[Tensor<B, 3>],
        _mask: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        outputs[0].clone().mean()
    }

    fn sample(
        &self,
        distr_args: &[Tensor<B, 3>],
        _num_samples: usize,
    ) -> windcast::Result<Tensor<B, 3>> {
        Ok(distr_args[0].clone())
    }
}

/// Claims to be distributional but keeps the default sampler.
struct NoSamplerLoss;

impl<B: Backend> Loss<B> for NoSamplerLoss {
    fn is_distribution_output(&self) -> bool {
        true
    }

    fn output_names(&self) -> Vec<String> {
        vec!["mean".to_string()]
    }

    fn compute(
        &self,
        _y: Tensor<B, 2>,
        outputs: &[Tensor<B, 3>],
        _mask: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        outputs[0].clone().mean()
    }
}

#[test]
fn predict_yields_h_rows_per_series_without_test_span() {
    // No future exogenous and test_size 0: the tail gets padded by h and a
    // single series produces exactly h forecast rows.
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(LinearArch::new(3, 2), Mae);

    let dataset = TimeSeriesDataset::new(vec![item("a", (1..=10).map(|v| v as f32).collect(), None)]);
    let forecast = model.predict(&dataset, 1).unwrap();

    assert_eq!(forecast.dims(), [2, 1]);
}

#[test]
fn predict_width_follows_loss_output_names() {
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(
        ConstArch {
            columns: vec![0.1, 0.5, 0.9],
        },
        ThreeColumnLoss,
    );

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![1.0; 10], None)]);
    let forecast = model.predict(&dataset, 1).unwrap();

    // One window, h = 2, three columns: reshaping the flat output recovers
    // the per-window ordering row by row.
    assert_eq!(forecast.dims(), [2, 3]);
    let values: Vec<f32> = forecast.into_data().convert().value;
    assert_eq!(values, vec![0.1, 0.5, 0.9, 0.1, 0.5, 0.9]);
}

#[test]
fn predictions_are_inverted_back_to_the_original_scale() {
    // A zero forecast on the normalized scale inverts to the window mean.
    let config = ForecastModelConfig::new(2, 3).with_scaler_type(Some(ScalerType::Standard));
    let mut model = config.init::<TestBackend, _, _>(ZeroArch, Mae);

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![5.0; 10], None)]);
    let forecast = model.predict(&dataset, 1).unwrap();

    let values: Vec<f32> = forecast.into_data().convert().value;
    assert_eq!(values.len(), 2);
    for value in values {
        assert!((value - 5.0).abs() < 1e-3, "expected 5.0, got {value}");
    }
}

#[test]
fn inversion_covers_every_output_column() {
    // Target statistics broadcast over all K output columns, so a zero
    // forecast in every column inverts to the window mean.
    let config = ForecastModelConfig::new(2, 3).with_scaler_type(Some(ScalerType::Standard));
    let mut model = config.init::<TestBackend, _, _>(
        ConstArch {
            columns: vec![0.0, 0.0, 0.0],
        },
        ThreeColumnLoss,
    );

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![5.0; 10], None)]);
    let forecast = model.predict(&dataset, 1).unwrap();

    assert_eq!(forecast.dims(), [2, 3]);
    let values: Vec<f32> = forecast.into_data().convert().value;
    for value in values {
        assert!((value - 5.0).abs() < 1e-3, "expected 5.0, got {value}");
    }
}

#[test]
fn distributional_losses_predict_through_the_sampler() {
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(
        ConstArch {
            columns: vec![7.0],
        },
        PassthroughDistLoss,
    );

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![1.0; 10], None)]);
    let forecast = model.predict(&dataset, 1).unwrap();

    let values: Vec<f32> = forecast.into_data().convert().value;
    assert_eq!(values, vec![7.0, 7.0]);
}

#[test]
fn distributional_loss_without_sampler_fails_loudly() {
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(ConstArch { columns: vec![1.0] }, NoSamplerLoss);

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![1.0; 10], None)]);
    let err = model.predict(&dataset, 1).unwrap_err();

    assert!(matches!(err, ForecastError::SamplingUnsupported));
}

#[test]
fn output_width_disagreeing_with_the_loss_is_an_error() {
    // Two architecture columns against three loss output names: one window
    // of h = 2 yields 4 values that do not divide into 3 columns.
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(
        ConstArch {
            columns: vec![1.0, 2.0],
        },
        ThreeColumnLoss,
    );

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![1.0; 10], None)]);
    let err = model.predict(&dataset, 1).unwrap_err();

    assert!(matches!(err, ForecastError::OutputShapeMismatch(4, 3)));
}

#[test]
fn validation_is_a_noop_without_a_validation_span() {
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(LinearArch::new(3, 2), Mae);

    let batcher = TimeSeriesBatcher::<TestBackend>::new(Default::default());
    let batch = batcher.batch(vec![item("a", vec![1.0; 10], None)]);

    assert!(model.validation_step(&batch).unwrap().is_none());
    assert!(model.on_validation_epoch_end().is_none());
}

#[test]
fn decompose_fails_for_architectures_without_that_path() {
    let config = ForecastModelConfig::new(2, 3);
    let mut model = config.init::<TestBackend, _, _>(LinearArch::new(3, 2), Mae);

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![1.0; 10], None)]);
    let err = model.decompose(&dataset, 1).unwrap_err();

    assert!(matches!(err, ForecastError::DecompositionUnsupported));
}

#[test]
fn fully_masked_data_fails_training() {
    let config = ForecastModelConfig::new(1, 2).with_max_epochs(1);
    let model = config.init::<TestAutodiffBackend, _, _>(LinearArch::new(2, 1), Mae);

    let dataset = TimeSeriesDataset::new(vec![item("a", vec![1.0; 8], Some(vec![0.0; 8]))]);
    let err = model.fit(&dataset, 0, 0).unwrap_err();

    assert!(matches!(err, ForecastError::NoTrainWindows));
}

#[test]
fn fit_runs_end_to_end_and_predicts() {
    let config = ForecastModelConfig::new(1, 2)
        .with_max_epochs(2)
        .with_batch_size(2)
        .with_windows_batch_size(Some(8))
        .with_learning_rate(1e-2);
    let model = config.init::<TestAutodiffBackend, _, _>(LinearArch::new(2, 1), Mae);

    let dataset = TimeSeriesDataset::new(vec![
        item("a", (1..=8).map(|v| v as f32).collect(), None),
        item("b", (3..=10).map(|v| v as f32).collect(), None),
    ]);

    let mut model = model.fit(&dataset, 1, 0).unwrap();
    let forecast = model.predict(&dataset, 1).unwrap();

    // Two series, h = 1, one output column.
    assert_eq!(forecast.dims(), [2, 1]);
    let values: Vec<f32> = forecast.into_data().convert().value;
    assert!(values.iter().all(|v| v.is_finite()));
}
