use anyhow::{Context, Result};
use clap::{builder::OsStr, ValueEnum};
use image::{
    imageops::{self, colorops::brighten_in_place, FilterType},
    Rgb, RgbImage,
};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{f32::consts::PI, path::Path};

/// ImageNet channel means in BGR order, as the caffe-trained weights expect
const IMAGENET_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// The pretrained network whose input convention the batches follow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Backbone {
    #[default]
    Vgg16,
    Resnet50,
    /// Plain `[0, 1]` scaling, used by the classification front end
    Rescale,
}

impl From<Backbone> for OsStr {
    fn from(value: Backbone) -> Self {
        match value {
            Backbone::Vgg16 => "vgg16",
            Backbone::Resnet50 => "resnet50",
            Backbone::Rescale => "rescale",
        }
        .into()
    }
}

impl Backbone {
    /// Normalize interleaved RGB pixels in `[0, 255]` in place.
    pub fn normalize(&self, pixels: &mut [f32]) {
        match self {
            Backbone::Vgg16 | Backbone::Resnet50 => {
                for px in pixels.chunks_exact_mut(3) {
                    let [r, g, b] = [px[0], px[1], px[2]];
                    px[0] = b - IMAGENET_BGR_MEAN[0];
                    px[1] = g - IMAGENET_BGR_MEAN[1];
                    px[2] = r - IMAGENET_BGR_MEAN[2];
                }
            }
            Backbone::Rescale => pixels.iter_mut().for_each(|p| *p /= 255.),
        }
    }
}

/// Random flip, rotation and brightness shift.
///
/// The randomness of an item only depends on the seed and the item's index,
/// so an item is transformed identically on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Augmentation {
    seed: u64,
}

impl Augmentation {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn apply(&self, index: usize, img: RgbImage) -> RgbImage {
        let mut rng =
            StdRng::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let img = match rng.gen_bool(0.5) {
            true => imageops::flip_horizontal(&img),
            false => img,
        };
        let theta: f32 = rng.gen_range(-1. / 6. ..1. / 6.);
        let mut img = rotate_about_center(&img, theta * PI, Interpolation::Bilinear, Rgb([0, 0, 0]));
        brighten_in_place(&mut img, rng.gen_range(-32..32));
        img
    }
}

/// Decode `path` to RGB and resize it to exactly `width` x `height`.
pub fn open_image_resize(path: impl AsRef<Path>, height: u32, width: u32) -> Result<RgbImage> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(img.resize_exact(width, height, FilterType::Triangle).to_rgb8())
}
