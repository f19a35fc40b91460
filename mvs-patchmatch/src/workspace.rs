//! Where cameras, image channels and fields live between scales and runs.

use crate::image::{census, gradient};
use crate::{Channels, DepthField, Error, ImageId, PatchMatchSettings, Result, ViewImage};
use image::DynamicImage;
use log::*;
use mvs_camera::Camera;
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything the solver loads at scale boundaries and stores once a scale is done.
pub trait ViewSource: Sync {
    fn camera_count(&self) -> usize;

    /// The camera at `scale`, with intrinsics scaled down by `2^scale`.
    fn camera(&self, camera: usize, scale: usize) -> Result<Camera>;

    fn image(&self, camera: usize, scale: usize) -> Result<Arc<ViewImage>>;

    fn store_field(&self, camera: usize, scale: usize, field: &DepthField) -> Result<()>;

    fn load_field(&self, camera: usize, scale: usize) -> Result<DepthField>;
}

/// Holds pyramids and fields in memory.
pub struct MemorySource {
    cameras: Vec<Vec<Camera>>,
    images: Vec<Vec<Arc<ViewImage>>>,
    fields: Mutex<HashMap<(usize, usize), DepthField>>,
}

impl MemorySource {
    /// Builds `scales` pyramid levels of every camera and its image.
    pub fn new(cameras: Vec<Camera>, images: Vec<ViewImage>, scales: usize) -> Result<Self> {
        if cameras.len() != images.len() {
            return Err(Error::InvalidSettings(format!(
                "{} cameras but {} images",
                cameras.len(),
                images.len()
            )));
        }
        let images = images
            .into_par_iter()
            .map(|image| image.pyramid(scales).into_iter().map(Arc::new).collect())
            .collect();
        let cameras = cameras
            .iter()
            .map(|camera| (0..scales).map(|scale| camera.scaled(scale)).collect())
            .collect();
        Ok(Self {
            cameras,
            images,
            fields: Mutex::new(HashMap::new()),
        })
    }

    /// A stored field, if one was stored.
    pub fn field(&self, camera: usize, scale: usize) -> Option<DepthField> {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(camera, scale))
            .cloned()
    }
}

impl ViewSource for MemorySource {
    fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    fn camera(&self, camera: usize, scale: usize) -> Result<Camera> {
        self.cameras
            .get(camera)
            .and_then(|scales| scales.get(scale))
            .cloned()
            .ok_or(Error::UnknownView { camera, scale })
    }

    fn image(&self, camera: usize, scale: usize) -> Result<Arc<ViewImage>> {
        self.images
            .get(camera)
            .and_then(|scales| scales.get(scale))
            .cloned()
            .ok_or(Error::UnknownView { camera, scale })
    }

    fn store_field(&self, camera: usize, scale: usize, field: &DepthField) -> Result<()> {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((camera, scale), field.clone());
        Ok(())
    }

    fn load_field(&self, camera: usize, scale: usize) -> Result<DepthField> {
        self.field(camera, scale)
            .ok_or(Error::UnknownView { camera, scale })
    }
}

/// The kinds of per camera, per scale files of a [`Workspace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blob {
    Intensity,
    Gradient,
    Census,
    Color,
    Camera,
    Field,
}

impl Blob {
    pub fn name(self) -> &'static str {
        match self {
            Blob::Intensity => "intensity",
            Blob::Gradient => "gradient",
            Blob::Census => "census",
            Blob::Color => "color",
            Blob::Camera => "camera",
            Blob::Field => "field",
        }
    }
}

/// A working directory of bincode blobs laid out as
/// `<root>/camera_<NNNN>/<blob>_<scale>.bin`.
///
/// Channels a metric needs but that were not prepared are derived from the intensity
/// when an image is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    root: PathBuf,
    border: usize,
    channels: Channels,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, border: usize) -> Self {
        Self {
            root: root.into(),
            border,
            channels: Channels::intensity(),
        }
    }

    /// A workspace loading images with the channels and border `settings` ask for.
    pub fn for_settings(root: impl Into<PathBuf>, settings: &PatchMatchSettings) -> Self {
        Self::new(root, settings.border).channels(settings.metric.required_channels())
    }

    pub fn channels(self, channels: Channels) -> Self {
        Self { channels, ..self }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn camera_dir(&self, camera: usize) -> PathBuf {
        self.root.join(format!("camera_{:04}", camera))
    }

    pub fn blob_path(&self, camera: usize, blob: Blob, scale: usize) -> PathBuf {
        self.camera_dir(camera)
            .join(format!("{}_{}.bin", blob.name(), scale))
    }

    pub fn has_blob(&self, camera: usize, blob: Blob, scale: usize) -> bool {
        self.blob_path(camera, blob, scale).is_file()
    }

    pub fn write_blob<T: Serialize>(
        &self,
        camera: usize,
        blob: Blob,
        scale: usize,
        value: &T,
    ) -> Result<()> {
        fs::create_dir_all(self.camera_dir(camera))?;
        let path = self.blob_path(camera, blob, scale);
        trace!("Writing {}", path.display());
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, value)?;
        Ok(())
    }

    pub fn read_blob<T: DeserializeOwned>(
        &self,
        camera: usize,
        blob: Blob,
        scale: usize,
    ) -> Result<T> {
        let path = self.blob_path(camera, blob, scale);
        if !path.is_file() {
            return Err(Error::MissingBlob(path));
        }
        trace!("Reading {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }

    fn read_optional<T: DeserializeOwned>(
        &self,
        camera: usize,
        blob: Blob,
        scale: usize,
    ) -> Result<Option<T>> {
        if self.has_blob(camera, blob, scale) {
            self.read_blob(camera, blob, scale).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn save_camera(&self, camera: usize, scale: usize, value: &Camera) -> Result<()> {
        self.write_blob(camera, Blob::Camera, scale, value)
    }

    /// Writes every channel `image` carries.
    pub fn save_image(&self, image: &ViewImage) -> Result<()> {
        let ImageId { camera, scale } = image.id();
        self.write_blob(camera, Blob::Intensity, scale, image.intensity())?;
        if let Some(gradient) = image.gradient() {
            self.write_blob(camera, Blob::Gradient, scale, gradient)?;
        }
        if let Some(census) = image.census() {
            self.write_blob(camera, Blob::Census, scale, census)?;
        }
        if let Some(color) = image.color() {
            self.write_blob(camera, Blob::Color, scale, color)?;
        }
        Ok(())
    }

    /// Reads the stored channels of an image, deriving the configured ones that are missing.
    pub fn load_image(&self, camera: usize, scale: usize) -> Result<ViewImage> {
        let intensity: ndarray::Array2<f32> = self.read_blob(camera, Blob::Intensity, scale)?;
        let mut stored_gradient = self.read_optional(camera, Blob::Gradient, scale)?;
        let mut stored_census = self.read_optional(camera, Blob::Census, scale)?;
        let color = self.read_optional(camera, Blob::Color, scale)?;
        if self.channels.gradient && stored_gradient.is_none() {
            debug!("Deriving gradient of camera {} at scale {}", camera, scale);
            stored_gradient = Some(gradient(&intensity, self.border));
        }
        if self.channels.census && stored_census.is_none() {
            debug!("Deriving census of camera {} at scale {}", camera, scale);
            stored_census = Some(census(&intensity, self.border));
        }
        ViewImage::from_parts(
            ImageId::new(camera, scale),
            self.border,
            intensity,
            stored_gradient,
            stored_census,
            color,
        )
    }

    /// Writes the pyramid and the scaled cameras of every camera.
    ///
    /// Only the channels `settings.metric` needs are computed, plus color for exports.
    pub fn prepare(
        &self,
        cameras: &[Camera],
        images: &[DynamicImage],
        settings: &PatchMatchSettings,
    ) -> Result<()> {
        if cameras.len() != images.len() {
            return Err(Error::InvalidSettings(format!(
                "{} cameras but {} images",
                cameras.len(),
                images.len()
            )));
        }
        fs::create_dir_all(&self.root)?;
        let channels = settings.metric.required_channels().with_color();
        cameras
            .par_iter()
            .zip(images.par_iter())
            .enumerate()
            .try_for_each(|(index, (camera, image))| {
                let view =
                    ViewImage::from_dynamic(ImageId::new(index, 0), image, self.border, channels);
                let expected = (camera.height() as usize, camera.width() as usize);
                let found = (view.height(), view.width());
                if expected != found {
                    return Err(Error::DimensionMismatch { expected, found });
                }
                for (scale, level) in view.pyramid(settings.scales).iter().enumerate() {
                    self.save_image(level)?;
                    self.save_camera(index, scale, &camera.scaled(scale))?;
                }
                info!("Prepared camera {} with {} scales", index, settings.scales);
                Ok(())
            })
    }
}

impl ViewSource for Workspace {
    fn camera_count(&self) -> usize {
        fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_name().to_string_lossy().starts_with("camera_"))
                    .count()
            })
            .unwrap_or(0)
    }

    fn camera(&self, camera: usize, scale: usize) -> Result<Camera> {
        self.read_blob(camera, Blob::Camera, scale)
    }

    fn image(&self, camera: usize, scale: usize) -> Result<Arc<ViewImage>> {
        self.load_image(camera, scale).map(Arc::new)
    }

    fn store_field(&self, camera: usize, scale: usize, field: &DepthField) -> Result<()> {
        self.write_blob(camera, Blob::Field, scale, field)
    }

    fn load_field(&self, camera: usize, scale: usize) -> Result<DepthField> {
        self.read_blob(camera, Blob::Field, scale)
    }
}
