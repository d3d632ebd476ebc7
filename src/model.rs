use std::marker::PhantomData;
use std::sync::Mutex;

use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Data, ElementConversion, Shape, Tensor};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::data::batch::{Batch, WindowBatch, Windows};
use crate::data::dataset::{TimeSeriesBatcher, TimeSeriesDataset};
use crate::error::{ForecastError, Result as ForecastResult};
use crate::parser::WindowParser;
use crate::scalers::{ScalerStats, ScalerType, TemporalScaler};
use crate::windows::{StepKind, WindowBuilder};

/// Monte Carlo draws used to turn distribution parameters into point and
/// quantile forecasts at predict time.
const NUM_SAMPLES: usize = 500;

/// The pluggable forward pass. `forward` returns a tuple of output tensors
/// `[Ws, H, K]`; the first one is the point forecast, or the full list is
/// the distribution parameters when paired with a distributional loss.
pub trait Architecture<B: Backend> {
    fn forward(&self, windows: &WindowBatch<B>) -> Vec<Tensor<B, 3>>;

    /// Additive components of the forecast, for architectures that expose a
    /// decomposition path.
    fn decompose(&self, windows: &WindowBatch<B>) -> ForecastResult<Tensor<B, 3>> {
        let _ = windows;
        Err(ForecastError::DecompositionUnsupported)
    }
}

/// The pluggable training objective. `output_names` fixes the number of
/// forecast columns the model produces.
pub trait Loss<B: Backend> {
    fn is_distribution_output(&self) -> bool {
        false
    }

    fn output_names(&self) -> Vec<String>;

    fn compute(
        &self,
        y: Tensor<B, 2>,
        outputs: &[Tensor<B, 3>],
        mask: Tensor<B, 2>,
    ) -> Tensor<B, 1>;

    /// Draw `num_samples` per window from the output distribution and
    /// reduce them to `[Ws, H, K]` estimates. Point losses keep the default.
    fn sample(&self, distr_args: &[Tensor<B, 3>], num_samples: usize) -> ForecastResult<Tensor<B, 3>> {
        let _ = (distr_args, num_samples);
        Err(ForecastError::SamplingUnsupported)
    }
}

#[derive(Config, Debug)]
pub struct ForecastModelConfig {
    pub h: usize,
    pub input_size: usize,

    #[config(default = 1e-3)]
    pub learning_rate: f64,

    #[config(default = 100)]
    pub max_epochs: usize,

    #[config(default = 32)]
    pub batch_size: usize,

    #[config(default = "Some(1024)")]
    pub windows_batch_size: Option<usize>,

    #[config(default = 1)]
    pub step_size: usize,

    #[config(default = "None")]
    pub scaler_type: Option<ScalerType>,

    #[config(default = "Vec::new()")]
    pub futr_exog_list: Vec<String>,

    #[config(default = "Vec::new()")]
    pub hist_exog_list: Vec<String>,

    #[config(default = "Vec::new()")]
    pub stat_exog_list: Vec<String>,

    #[config(default = 0)]
    pub num_workers_loader: usize,

    #[config(default = false)]
    pub drop_last_loader: bool,

    #[config(default = 1)]
    pub random_seed: u64,
}

impl ForecastModelConfig {
    pub fn init<B, A, L>(self, arch: A, loss: L) -> ForecastModel<B, A, L>
    where
        B: Backend,
        A: Architecture<B>,
        L: Loss<B>,
    {
        ForecastModel {
            builder: WindowBuilder::new(
                self.input_size,
                self.h,
                self.step_size,
                self.windows_batch_size,
            ),
            scaler: self.scaler_type.map(TemporalScaler::new),
            parser: OnceCell::new(),
            rng: Mutex::new(StdRng::seed_from_u64(self.random_seed)),
            arch,
            loss,
            val_size: 0,
            test_size: 0,
            predict_step_size: 1,
            val_losses: Vec::new(),
            config: self,
            _backend: PhantomData,
        }
    }
}

/// Orchestrates windowing, normalization, parsing and the architecture
/// forward pass for the three execution modes. One step runs at a time per
/// instance; the subsampling rng and the validation loss accumulator are
/// not meant for concurrent steps.
#[derive(Debug)]
pub struct ForecastModel<B, A, L>
where
    B: Backend,
    A: Architecture<B>,
    L: Loss<B>,
{
    config: ForecastModelConfig,
    arch: A,
    loss: L,
    builder: WindowBuilder,
    scaler: Option<TemporalScaler>,
    parser: OnceCell<WindowParser>,
    rng: Mutex<StdRng>,
    val_size: usize,
    test_size: usize,
    predict_step_size: usize,
    val_losses: Vec<f32>,
    _backend: PhantomData<B>,
}

impl<B, A, L> ForecastModel<B, A, L>
where
    B: Backend,
    A: Architecture<B>,
    L: Loss<B>,
{
    pub fn config(&self) -> &ForecastModelConfig {
        &self.config
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn set_test_size(&mut self, test_size: usize) {
        self.test_size = test_size;
    }

    fn parser(&self, batch: &Batch<B>) -> ForecastResult<&WindowParser> {
        self.parser.get_or_try_init(|| {
            WindowParser::resolve(
                self.config.h,
                &batch.temporal_cols,
                batch.static_cols.as_ref(),
                &self.config.hist_exog_list,
                &self.config.futr_exog_list,
                &self.config.stat_exog_list,
            )
        })
    }

    /// Build windows for one step and run the leakage-safe normalization.
    fn assemble(
        &self,
        batch: &Batch<B>,
        step: StepKind,
    ) -> ForecastResult<(WindowBatch<B>, Option<ScalerStats<B>>)> {
        let parser = self.parser(batch)?;

        let windows = {
            let mut rng = self.rng.lock().unwrap();
            self.builder.build(
                batch,
                step,
                self.val_size,
                self.test_size,
                self.predict_step_size,
                !self.config.futr_exog_list.is_empty(),
                &mut rng,
            )?
        };

        let (windows, stats) = match &self.scaler {
            Some(scaler) => {
                let (windows, stats) = self.normalize(windows, parser, scaler);
                (windows, Some(stats))
            }
            None => (windows, None),
        };

        Ok((parser.parse(&windows)?, stats))
    }

    /// Normalize every data channel jointly, with the horizon masked out of
    /// the statistics so nothing leaks from the forecast span into the
    /// encoder.
    fn normalize(
        &self,
        windows: Windows<B>,
        parser: &WindowParser,
        scaler: &TemporalScaler,
    ) -> (Windows<B>, ScalerStats<B>) {
        let [num_windows, window_size, num_channels] = windows.temporal.dims();
        let h = self.config.h;
        let mask_idx = parser.mask_index();
        let data_idx = parser.data_indices();

        let data = select_channels(&windows.temporal, data_idx);
        let mask = windows
            .temporal
            .clone()
            .slice([0..num_windows, 0..window_size, mask_idx..mask_idx + 1])
            .slice_assign(
                [0..num_windows, window_size - h..window_size, 0..1],
                Tensor::zeros([num_windows, h, 1]),
            );

        let (normalized, stats) = scaler.transform(data, mask);

        // Reassemble the channel axis in schema order, mask untouched.
        let channels: Vec<Tensor<B, 3>> = (0..num_channels)
            .map(|channel| match data_idx.iter().position(|idx| *idx == channel) {
                Some(pos) => normalized
                    .clone()
                    .slice([0..num_windows, 0..window_size, pos..pos + 1]),
                None => windows
                    .temporal
                    .clone()
                    .slice([0..num_windows, 0..window_size, channel..channel + 1]),
            })
            .collect();

        let windows = Windows {
            temporal: Tensor::cat(channels, 2),
            ..windows
        };
        (windows, stats)
    }

    /// Invert the normalization on predictions, target channel statistics
    /// broadcast over the horizon and the loss output columns.
    fn inverse_normalize(
        &self,
        y_hat: Tensor<B, 3>,
        stats: &ScalerStats<B>,
        parser: &WindowParser,
        scaler: &TemporalScaler,
    ) -> Tensor<B, 3> {
        let pos = parser.y_data_position();
        let [num_windows, _, _] = stats.scale.dims();
        let y_scale = stats
            .scale
            .clone()
            .slice([0..num_windows, 0..1, pos..pos + 1]);
        let y_shift = stats
            .shift
            .clone()
            .slice([0..num_windows, 0..1, pos..pos + 1]);
        scaler.inverse_transform(y_hat, y_scale, y_shift)
    }

    pub fn training_step(&self, batch: &Batch<B>) -> ForecastResult<Tensor<B, 1>> {
        let (windows, _) = self.assemble(batch, StepKind::Train)?;
        let outputs = self.arch.forward(&windows);
        let loss = self.loss.compute(
            windows.outsample_y.clone(),
            &outputs,
            windows.outsample_mask.clone(),
        );
        tracing::debug!(
            train_loss = loss.clone().into_scalar().elem::<f32>(),
            "training step"
        );
        Ok(loss)
    }

    /// No-op when no validation span is configured; aggregation skips the
    /// `None` placeholders.
    pub fn validation_step(&mut self, batch: &Batch<B>) -> ForecastResult<Option<f32>> {
        if self.val_size == 0 {
            return Ok(None);
        }

        let (windows, _) = self.assemble(batch, StepKind::Validation)?;
        let outputs = self.arch.forward(&windows);
        let loss = self.loss.compute(
            windows.outsample_y.clone(),
            &outputs,
            windows.outsample_mask.clone(),
        );
        let value = loss.into_scalar().elem::<f32>();
        tracing::debug!(val_loss = value, "validation step");
        self.val_losses.push(value);
        Ok(Some(value))
    }

    /// Average the step losses recorded since the last call into one epoch
    /// metric. `None` when nothing was recorded.
    pub fn on_validation_epoch_end(&mut self) -> Option<f32> {
        if self.val_losses.is_empty() {
            return None;
        }
        let avg = self.val_losses.iter().sum::<f32>() / self.val_losses.len() as f32;
        self.val_losses.clear();
        tracing::info!(val_loss = avg, "validation epoch");
        Some(avg)
    }

    /// One inference pass over a batch: `[Ws, H, K]` forecasts on the
    /// original scale.
    pub fn predict_step(&self, batch: &Batch<B>) -> ForecastResult<Tensor<B, 3>> {
        let (windows, stats) = self.assemble(batch, StepKind::Predict)?;
        let outputs = self.arch.forward(&windows);

        let y_hat = if self.loss.is_distribution_output() {
            self.loss.sample(&outputs, NUM_SAMPLES)?
        } else {
            outputs.into_iter().next().ok_or(ForecastError::EmptyOutput)?
        };

        match (&self.scaler, stats) {
            (Some(scaler), Some(stats)) => {
                let parser = self.parser(batch)?;
                Ok(self.inverse_normalize(y_hat, &stats, parser, scaler))
            }
            _ => Ok(y_hat),
        }
    }

    /// Forecasts for the trailing span of every series, flattened into a
    /// dense `(forecast points, output columns)` array.
    pub fn predict(
        &mut self,
        dataset: &TimeSeriesDataset,
        step_size: usize,
    ) -> ForecastResult<Tensor<B, 2>> {
        self.predict_step_size = step_size;

        let batcher = TimeSeriesBatcher::<B>::new(Default::default());
        let loader = DataLoaderBuilder::new(batcher)
            .batch_size(self.config.batch_size)
            .build(dataset.clone());

        let mut flat: Vec<f32> = Vec::new();
        for batch in loader.iter() {
            let y_hat = self.predict_step(&batch)?;
            flat.extend(y_hat.into_data().convert::<f32>().value);
        }

        let num_outputs = self.loss.output_names().len().max(1);
        if flat.len() % num_outputs != 0 {
            return Err(ForecastError::OutputShapeMismatch(flat.len(), num_outputs));
        }
        let rows = flat.len() / num_outputs;
        Ok(Tensor::from_data(
            Data::new(flat, Shape::new([rows, num_outputs])).convert(),
        ))
    }

    /// Forecast components through the architecture's decomposition path.
    /// Components stay on the normalized scale.
    pub fn decompose(
        &mut self,
        dataset: &TimeSeriesDataset,
        step_size: usize,
    ) -> ForecastResult<Tensor<B, 3>> {
        self.predict_step_size = step_size;

        let batcher = TimeSeriesBatcher::<B>::new(Default::default());
        let loader = DataLoaderBuilder::new(batcher)
            .batch_size(self.config.batch_size)
            .build(dataset.clone());

        let mut components = Vec::new();
        for batch in loader.iter() {
            let (windows, _) = self.assemble(&batch, StepKind::Predict)?;
            components.push(self.arch.decompose(&windows)?);
        }
        Ok(Tensor::cat(components, 0))
    }
}

impl<B, A, L> ForecastModel<B, A, L>
where
    B: AutodiffBackend,
    A: Architecture<B> + AutodiffModule<B>,
    L: Loss<B>,
{
    /// Full training run: records the holdout sizes, then `max_epochs` of
    /// Adam over shuffled train batches with a validation pass per epoch.
    pub fn fit(
        mut self,
        dataset: &TimeSeriesDataset,
        val_size: usize,
        test_size: usize,
    ) -> ForecastResult<Self> {
        self.val_size = val_size;
        self.test_size = test_size;
        B::seed(self.config.random_seed);

        let batcher = TimeSeriesBatcher::<B>::new(Default::default());
        let mut train_builder = DataLoaderBuilder::new(batcher.clone())
            .batch_size(self.config.batch_size)
            .shuffle(self.config.random_seed);
        let mut val_builder =
            DataLoaderBuilder::new(batcher).batch_size(self.config.batch_size);
        if self.config.num_workers_loader > 0 {
            train_builder = train_builder.num_workers(self.config.num_workers_loader);
            val_builder = val_builder.num_workers(self.config.num_workers_loader);
        }
        let train_loader = train_builder.build(dataset.clone());
        let val_loader = val_builder.build(dataset.clone());

        let mut optim = AdamConfig::new().init();
        for epoch in 1..=self.config.max_epochs {
            for batch in train_loader.iter() {
                if self.config.drop_last_loader
                    && batch.temporal.dims()[0] < self.config.batch_size
                {
                    continue;
                }
                let loss = self.training_step(&batch)?;
                let grads = GradientsParams::from_grads(loss.backward(), &self.arch);
                self.arch = optim.step(self.config.learning_rate, self.arch, grads);
            }

            for batch in val_loader.iter() {
                self.validation_step(&batch)?;
            }
            match self.on_validation_epoch_end() {
                Some(val_loss) => tracing::info!(epoch, val_loss, "epoch done"),
                None => tracing::info!(epoch, "epoch done"),
            }
        }

        Ok(self)
    }
}

impl<B, A, L> ForecastModel<B, A, L>
where
    B: Backend,
    A: Architecture<B> + Module<B>,
    L: Loss<B>,
{
    /// Persist the architecture weights next to the hyperparameter config.
    pub fn save(&self, path: &str) -> ForecastResult<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        recorder.record(self.arch.clone().into_record(), path.into())?;
        self.config.save(format!("{path}.json"))?;
        Ok(())
    }
}

fn select_channels<B: Backend>(temporal: &Tensor<B, 3>, idx: &[usize]) -> Tensor<B, 3> {
    let idx_values: Vec<i32> = idx.iter().map(|i| *i as i32).collect();
    let len = idx_values.len();
    let indices = Tensor::from_data(Data::new(idx_values, Shape::new([len])).convert());
    temporal.clone().select(2, indices)
}
