use crate::{
    error::SplitError,
    preprocess::{open_image_resize, Augmentation, Backbone},
};
use anyhow::{Context, Result};
use burn::{
    data::dataloader::{batcher::Batcher, Dataset},
    prelude::*,
    tensor::TensorData,
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// An image file and the index of its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: usize,
}

/// A directory whose sub-directories are the classes.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// Sorted sub-directory names; a label indexes into this
    pub class_names: Vec<String>,
    /// Images of each class in path order, classes in label order
    pub items: Vec<LabeledImage>,
}

impl ImageFolder {
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut class_names = fs::read_dir(root)
            .with_context(|| format!("failed to read {}", root.display()))?
            .filter_map(|res| res.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect::<Vec<_>>();
        class_names.sort();
        if class_names.is_empty() {
            return Err(SplitError::NoClasses(root.to_path_buf()).into());
        }

        let items = class_names
            .iter()
            .enumerate()
            .flat_map(|(label, name)| {
                images_walk(root.join(name))
                    .into_iter()
                    .map(move |path| LabeledImage { path, label })
            })
            .collect::<Vec<_>>();
        if items.is_empty() {
            return Err(SplitError::Empty(root.to_path_buf()).into());
        }
        Ok(Self { class_names, items })
    }
}

/// Image subtypes that are picked up; other images (svg, ico, heic, ...)
/// cannot be decoded and are ignored.
const DECODABLE: [&str; 4] = ["bmp", "gif", "jpeg", "png"];

pub(crate) fn images_walk(root: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut res = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|res| res.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| match MimeGuess::from_path(e.path()).first() {
            Some(mime)
                if mime.type_() == "image" && DECODABLE.contains(&mime.subtype().as_str()) =>
            {
                Some(e.into_path())
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    res.sort();
    res
}

/// Turns a [`LabeledImage`] into normalized pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoder {
    pub height: u32,
    pub width: u32,
    pub backbone: Backbone,
    pub augmentation: Option<Augmentation>,
}

impl Decoder {
    pub fn new(height: u32, width: u32, backbone: Backbone) -> Self {
        Self {
            height,
            width,
            backbone,
            augmentation: None,
        }
    }

    pub fn with_augmentation(mut self, augmentation: Augmentation) -> Self {
        self.augmentation = Some(augmentation);
        self
    }

    /// `index` is the position of the image in its sequence and only feeds
    /// the augmentation.
    pub fn decode(&self, index: usize, image: &LabeledImage) -> Result<ImageItem> {
        let mut img = open_image_resize(&image.path, self.height, self.width)?;
        if let Some(augmentation) = &self.augmentation {
            img = augmentation.apply(index, img);
        }
        let mut pixels = img.into_raw().into_iter().map(f32::from).collect::<Vec<_>>();
        self.backbone.normalize(&mut pixels);
        Ok(ImageItem {
            pixels,
            shape: [self.height as usize, self.width as usize],
            label: image.label,
            path: image.path.clone(),
        })
    }
}

/// A decoded image, pixels interleaved `[height, width, 3]`.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pixels: Vec<f32>,
    shape: [usize; 2],
    label: usize,
    path: PathBuf,
}

impl ImageItem {
    /// # Shapes
    ///   - Output [3, height, width]
    pub(crate) fn data<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let [h, w] = self.shape;
        let data = TensorData::new(self.pixels.clone(), [h, w, 3]).convert::<B::FloatElem>();
        Tensor::<B, 3>::from_data(data, device)
            .swap_dims(0, 2)
            .swap_dims(1, 2)
    }

    pub fn label(&self) -> usize {
        self.label
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lazily decoding dataset over images kept in batch order.
pub struct ImageDataSet {
    items: Vec<LabeledImage>,
    decoder: Decoder,
}

impl ImageDataSet {
    pub fn new(items: Vec<LabeledImage>, decoder: Decoder) -> Self {
        Self { items, decoder }
    }
}

impl Dataset<ImageItem> for ImageDataSet {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).map(|image| {
            self.decoder
                .decode(index, image)
                .unwrap_or_else(|err| panic!("Failed to load image: {err:#}"))
        })
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    num_classes: usize,
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// One-hot, [batch_size, num_classes]
    pub targets: Tensor<B, 2>,
    /// [batch_size]
    pub labels: Tensor<B, 1, Int>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, num_classes: usize) -> Self {
        Self {
            device,
            num_classes,
        }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let images = items
            .iter()
            .map(|item| item.data::<B>(&self.device).unsqueeze::<4>())
            .collect::<Vec<_>>();
        let targets = items
            .iter()
            .map(|item| {
                let mut one_hot = vec![0f32; self.num_classes];
                one_hot[item.label] = 1.;
                let data = TensorData::new(one_hot, [1, self.num_classes]);
                Tensor::<B, 2>::from_data(data.convert::<B::FloatElem>(), &self.device)
            })
            .collect::<Vec<_>>();
        let labels = items
            .iter()
            .map(|item| {
                let data = TensorData::from([item.label as i64]);
                Tensor::<B, 1, Int>::from_data(data.convert::<B::IntElem>(), &self.device)
            })
            .collect::<Vec<_>>();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);
        let labels = Tensor::cat(labels, 0);
        let paths = items.into_iter().map(|item| item.path).collect();

        ImageBatch {
            images,
            targets,
            labels,
            paths,
        }
    }
}
