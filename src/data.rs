//! Datasets of `(input, target)` pairs
//!
//! Every example is returned as a batch of one: inputs are `[1, features]`
//! and targets `[1, outputs]`, so they can be fed straight into a model.

use std::fs;
use std::path::Path;

use rand::distributions::Uniform;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorMut};

/// Indexed access to labeled examples
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<(Tensor, Tensor)>;
}

fn out_of_range(index: usize, len: usize) -> Error {
    Error::IndexOutOfBounds {
        index: vec![index],
        shape: format!("[{}]", len),
    }
}

/// One-hot `[1, classes]` row with a 1 at `label`
pub fn one_hot(label: usize, classes: usize) -> Result<Tensor> {
    let mut target = TensorMut::zeros(vec![1, classes]);
    target.set_at(&[0, label], 1.0)?;
    Ok(target.freeze())
}

/// Examples held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    examples: Vec<(Tensor, Tensor)>,
}

impl InMemoryDataset {
    /// Every input and target must be rank 2 with matching batch size
    pub fn new(examples: Vec<(Tensor, Tensor)>) -> Result<Self> {
        for (input, target) in &examples {
            if input.rank() != 2 || target.rank() != 2 || input.shape()[0] != target.shape()[0] {
                return Err(Error::shape_mismatch(
                    "InMemoryDataset::new",
                    input.shape(),
                    target.shape(),
                ));
            }
        }
        Ok(InMemoryDataset { examples })
    }

    /// First `at` examples and the rest; `at` is clamped to the length
    pub fn split(mut self, at: usize) -> (Self, Self) {
        let rest = self.examples.split_off(at.min(self.examples.len()));
        (self, InMemoryDataset { examples: rest })
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.examples.len()
    }

    fn get(&self, index: usize) -> Result<(Tensor, Tensor)> {
        self.examples
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.examples.len()))
    }
}

/// Separable classification data: one random center per class in
/// `[-1, 1]^features`, each example the center plus `U[-noise, noise]`
/// per feature. Targets are one-hot.
#[instrument]
pub fn synthetic_blobs(
    examples: usize,
    features: usize,
    classes: usize,
    noise: f32,
    seed: u64,
) -> Result<InMemoryDataset> {
    if classes == 0 || features == 0 {
        return Err(Error::Dataset(
            "synthetic data needs at least one class and one feature".to_string(),
        ));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: Vec<Vec<f32>> = (0..classes)
        .map(|_| (0..features).map(|_| rng.gen_range(-1.0..=1.0)).collect())
        .collect();
    let jitter = Uniform::new_inclusive(-noise.abs(), noise.abs());

    let samples = (0..examples)
        .map(|i| {
            let label = i % classes;
            let input: Vec<f32> = centers[label]
                .iter()
                .map(|&c| c + jitter.sample(&mut rng))
                .collect();
            Ok((Tensor::new(vec![1, features], input)?, one_hot(label, classes)?))
        })
        .collect::<Result<Vec<_>>>()?;
    InMemoryDataset::new(samples)
}

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;
const MNIST_CLASSES: usize = 10;

/// MNIST handwritten digits read from the IDX files
///
/// Inputs are `[1, rows * cols]` with pixels scaled to `[0, 1]`; targets
/// are one-hot `[1, 10]`.
#[derive(Debug, Clone)]
pub struct MnistDataset {
    pixels: Vec<u8>,
    labels: Vec<u8>,
    image_size: usize,
}

impl MnistDataset {
    /// Load the training (`train-*`) or test (`t10k-*`) split from `dir`
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn load(dir: impl AsRef<Path>, train: bool) -> Result<Self> {
        let prefix = if train { "train" } else { "t10k" };
        let dir = dir.as_ref();
        let images = fs::read(dir.join(format!("{}-images-idx3-ubyte", prefix)))?;
        let labels = fs::read(dir.join(format!("{}-labels-idx1-ubyte", prefix)))?;
        let dataset = Self::from_idx(&images, &labels)?;
        info!(examples = dataset.len(), split = prefix, "loaded MNIST");
        Ok(dataset)
    }

    /// Parse in-memory IDX image and label files
    pub fn from_idx(images: &[u8], labels: &[u8]) -> Result<Self> {
        let (count, image_size, pixels) = parse_images(images)?;
        let labels = parse_labels(labels)?;
        if labels.len() != count {
            return Err(Error::Dataset(format!(
                "{} images but {} labels",
                count,
                labels.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l as usize >= MNIST_CLASSES) {
            return Err(Error::Dataset(format!("label {} out of range", bad)));
        }
        Ok(MnistDataset {
            pixels: pixels.to_vec(),
            labels: labels.to_vec(),
            image_size,
        })
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }
}

impl Dataset for MnistDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<(Tensor, Tensor)> {
        let label = *self
            .labels
            .get(index)
            .ok_or_else(|| out_of_range(index, self.labels.len()))?;
        let start = index * self.image_size;
        let input = self.pixels[start..start + self.image_size]
            .iter()
            .map(|&p| p as f32 / 255.0)
            .collect();
        Ok((
            Tensor::new(vec![1, self.image_size], input)?,
            one_hot(label as usize, MNIST_CLASSES)?,
        ))
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::Dataset("truncated IDX header".to_string()))
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<()> {
    let magic = read_u32(bytes, 0)?;
    if magic != expected {
        return Err(Error::Dataset(format!(
            "bad IDX magic number {}, expected {}",
            magic, expected
        )));
    }
    Ok(())
}

/// Returns (count, rows * cols, pixel bytes)
fn parse_images(bytes: &[u8]) -> Result<(usize, usize, &[u8])> {
    check_magic(bytes, IMAGES_MAGIC)?;
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    let overflow = || Error::Dataset("IDX dimensions overflow".to_string());
    let image_size = rows.checked_mul(cols).ok_or_else(overflow)?;
    let expected = count.checked_mul(image_size).ok_or_else(overflow)?;
    let body = &bytes[16..];
    if body.len() != expected {
        return Err(Error::Dataset(format!(
            "expected {} pixel bytes, found {}",
            expected,
            body.len()
        )));
    }
    Ok((count, image_size, body))
}

fn parse_labels(bytes: &[u8]) -> Result<&[u8]> {
    check_magic(bytes, LABELS_MAGIC)?;
    let count = read_u32(bytes, 4)? as usize;
    let body = &bytes[8..];
    if body.len() != count {
        return Err(Error::Dataset(format!(
            "expected {} labels, found {}",
            count,
            body.len()
        )));
    }
    Ok(body)
}
