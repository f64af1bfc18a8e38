//! The ordered image catalog.
//!
//! One record per declared image section, in declaration order. The order is
//! load-bearing: the scheduler drives top-level generation in catalog order.

use anyhow::{bail, Context, Result};

use crate::config::Section;
use crate::image::flash::FlashRegistry;
use crate::image::Image;

#[derive(Debug, Default)]
pub struct Catalog {
    images: Vec<Image>,
}

impl Catalog {
    /// Ingest every `image` section of the build description.
    pub fn from_config(root: &Section, flash: &FlashRegistry) -> Result<Self> {
        let mut catalog = Catalog::default();
        for section in root.sections("image") {
            let image = Image::from_section(section, flash)
                .with_context(|| format!("in image '{}'", section.title()))?;
            if catalog.get(&image.file).is_some() {
                bail!("duplicate image '{}'", image.file);
            }
            catalog.images.push(image);
        }
        Ok(catalog)
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub(crate) fn images_mut(&mut self) -> &mut [Image] {
        &mut self.images
    }

    pub fn get(&self, file: &str) -> Option<&Image> {
        self.images.iter().find(|image| image.file == file)
    }

    pub fn index_of(&self, file: &str) -> Option<usize> {
        self.images.iter().position(|image| image.file == file)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Check that every partition reference resolves to a declared image.
    ///
    /// Runs after full ingestion and before any staging or generation work;
    /// a dangling reference names both ends of the broken edge.
    pub fn validate_references(&self) -> Result<()> {
        for image in &self.images {
            for partition in &image.partitions {
                if self.get(&partition.image).is_none() {
                    bail!(
                        "image '{}': no rule to generate '{}' (referenced by partition '{}')",
                        image.file,
                        partition.image,
                        partition.name
                    );
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_images(images: Vec<Image>) -> Self {
        Catalog { images }
    }
}
