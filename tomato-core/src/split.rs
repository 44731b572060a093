use crate::{
    data::{Decoder, ImageBatch, ImageBatcher, ImageDataSet, ImageFolder, LabeledImage},
    error::SplitError,
    preprocess::{Augmentation, Backbone},
};
use anyhow::{Context, Result};
use burn::{
    data::dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
    prelude::*,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

#[derive(Config, Debug)]
pub struct SplitConfig {
    /// Directory whose sub-directories are the classes
    pub root: PathBuf,
    #[config(default = 224)]
    pub height: u32,
    #[config(default = 224)]
    pub width: u32,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Share of all batches used for testing
    #[config(default = 0.2)]
    pub test_split: f64,
    /// Share of the batches left after testing used for validation
    #[config(default = 0.2)]
    pub val_split: f64,
    #[config(default = "Backbone::Vgg16")]
    pub backbone: Backbone,
    /// Augment the training batches
    #[config(default = false)]
    pub augment: bool,
}

impl SplitConfig {
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.batch_size == 0 {
            return Err(SplitError::BatchSize);
        }
        check_ratio("test_split", self.test_split)?;
        check_ratio("val_split", self.val_split)
    }

    /// Decoder for one of the subsets; only training batches are augmented.
    pub fn decoder(&self, subset: Subset) -> Decoder {
        let decoder = Decoder::new(self.height, self.width, self.backbone);
        match (subset, self.augment) {
            (Subset::Train, true) => decoder.with_augmentation(Augmentation::new(self.seed)),
            _ => decoder,
        }
    }
}

fn check_ratio(name: &'static str, value: f64) -> Result<(), SplitError> {
    match (0.0..=1.0).contains(&value) {
        true => Ok(()),
        false => Err(SplitError::Ratio { name, value }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    Train,
    Valid,
    Test,
}

/// Batch counts of each subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub total: usize,
    pub test: usize,
    pub valid: usize,
    pub train: usize,
}

impl SplitPlan {
    /// Test takes `floor(total * test_split)` batches, validation
    /// `floor(rest * val_split)` of what is left, training the remainder.
    pub fn new(total: usize, test_split: f64, val_split: f64) -> Result<Self, SplitError> {
        check_ratio("test_split", test_split)?;
        check_ratio("val_split", val_split)?;
        let test = (total as f64 * test_split).floor() as usize;
        let valid = ((total - test) as f64 * val_split).floor() as usize;
        Ok(Self {
            total,
            test,
            valid,
            train: total - test - valid,
        })
    }
}

/// Consecutive batches of one subset, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSequence {
    batch_size: usize,
    batches: Vec<Vec<LabeledImage>>,
}

impl BatchSequence {
    pub fn new(batch_size: usize, batches: Vec<Vec<LabeledImage>>) -> Self {
        Self {
            batch_size,
            batches,
        }
    }

    /// Number of batches
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &[Vec<LabeledImage>] {
        &self.batches
    }

    pub fn images(&self) -> impl Iterator<Item = &LabeledImage> {
        self.batches.iter().flatten()
    }

    pub fn num_images(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Decode and batch every batch in order, stopping at the first image
    /// that fails to decode.
    pub fn iter_batches<'a, B: Backend>(
        &'a self,
        decoder: &'a Decoder,
        batcher: &'a ImageBatcher<B>,
    ) -> impl Iterator<Item = Result<ImageBatch<B>>> + 'a {
        let mut offset = 0;
        self.batches.iter().map(move |batch| {
            let start = offset;
            offset += batch.len();
            let items = batch
                .iter()
                .enumerate()
                .map(|(i, image)| decoder.decode(start + i, image))
                .collect::<Result<Vec<_>>>()?;
            Ok(batcher.batch(items))
        })
    }

    /// The images as a `burn` dataset, in batch order.
    pub fn dataset(&self, decoder: Decoder) -> ImageDataSet {
        ImageDataSet::new(self.images().cloned().collect(), decoder)
    }

    /// A loader yielding exactly these batches: same batch size, no shuffling.
    ///
    /// With more than one worker the batches keep their content but may
    /// arrive out of order.
    pub fn loader<B: Backend>(
        &self,
        decoder: Decoder,
        batcher: ImageBatcher<B>,
        num_workers: usize,
    ) -> Arc<dyn DataLoader<ImageBatch<B>>> {
        let builder = DataLoaderBuilder::new(batcher).batch_size(self.batch_size.max(1));
        let builder = match num_workers {
            0 => builder,
            n => builder.num_workers(n),
        };
        builder.build(self.dataset(decoder))
    }
}

/// The seeded train/validation/test partition of an image folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub class_names: Vec<String>,
    pub plan: SplitPlan,
    pub train: BatchSequence,
    pub valid: BatchSequence,
    pub test: BatchSequence,
}

impl DatasetSplit {
    pub fn subset(&self, subset: Subset) -> &BatchSequence {
        match subset {
            Subset::Train => &self.train,
            Subset::Valid => &self.valid,
            Subset::Test => &self.test,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Shuffle the images below `config.root` once with `config.seed`, cut them
/// into batches and hand out test, validation and training batches in that
/// order.
pub fn split_dataset(config: &SplitConfig) -> Result<DatasetSplit> {
    config.validate()?;
    let ImageFolder {
        class_names,
        mut items,
    } = ImageFolder::scan(&config.root)?;
    info!(
        "{} images in {} classes found in {}",
        items.len(),
        class_names.len(),
        config.root.display()
    );

    items.shuffle(&mut StdRng::seed_from_u64(config.seed));
    let total = items.len().div_ceil(config.batch_size);
    let plan = SplitPlan::new(total, config.test_split, config.val_split)?;

    let mut batches = items.chunks(config.batch_size).map(<[_]>::to_vec);
    let mut take =
        |n: usize| BatchSequence::new(config.batch_size, batches.by_ref().take(n).collect());
    let test = take(plan.test);
    let valid = take(plan.valid);
    let train = take(plan.train);
    debug!("{plan:?}");

    Ok(DatasetSplit {
        class_names,
        plan,
        train,
        valid,
        test,
    })
}

/// Decode every batch of every subset through `batcher`, returning the
/// number of images decoded.
pub fn decode_all<B: Backend>(
    split: &DatasetSplit,
    config: &SplitConfig,
    device: B::Device,
) -> Result<usize> {
    let batcher = ImageBatcher::<B>::new(device, split.class_names.len());
    let mut decoded = 0;
    for subset in [Subset::Train, Subset::Valid, Subset::Test] {
        let decoder = config.decoder(subset);
        for batch in split.subset(subset).iter_batches(&decoder, &batcher) {
            let batch = batch?;
            debug!("{subset:?} batch {:?}", batch.images.dims());
            decoded += batch.paths.len();
        }
    }
    Ok(decoded)
}
