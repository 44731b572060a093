mod acquire;
#[cfg(any(feature = "ndarray", feature = "tch"))]
mod cli;
mod data;
mod error;
mod organize;
mod preprocess;
mod split;
#[cfg(test)]
mod testing;

pub use acquire::{
    download_and_extract, extract, Acquired, AcquireConfig, ArchiveSource, Downloader, Stored,
};
#[cfg(any(feature = "ndarray", feature = "tch"))]
pub use cli::run;
pub use data::{
    Decoder, ImageBatch, ImageBatcher, ImageDataSet, ImageFolder, ImageItem, LabeledImage,
};
pub use error::{AcquireError, SplitError};
pub use organize::{organize, LabelMap, OrganizeReport, EXTRACTION_ARTIFACT};
pub use preprocess::{open_image_resize, Augmentation, Backbone};
pub use split::{
    decode_all, split_dataset, BatchSequence, DatasetSplit, SplitConfig, SplitPlan, Subset,
};
