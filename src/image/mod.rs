//! Image and partition data model.
//!
//! An [`Image`] is one declared build target producing one output artifact.
//! Its [`Partition`]s reference other images by name and describe how their
//! artifacts are placed inside this one; the partition edges form the
//! dependency graph the scheduler walks.

pub mod catalog;
pub mod flash;

use anyhow::{bail, Context, Result};
use std::fmt;

use crate::config::Section;
use crate::handler::{self, ImageHandler};
use flash::FlashRegistry;

/// A placement reference from one image to another.
///
/// Declaration order is kept; it determines both dependency generation order
/// and final layout.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub size: u64,
    pub offset: u64,
    /// MBR partition type code; zero means "not in the partition table".
    pub partition_type: u8,
    /// Key of the referenced image.
    pub image: String,
    /// The referenced image may be grown to fill the remaining space.
    pub autoresize: bool,
}

/// A named build target.
pub struct Image {
    /// Unique key; also the output artifact name.
    pub file: String,
    /// Optional logical label.
    pub name: Option<String>,
    pub size: u64,
    pub offset: u64,
    /// Mountpoint path relative to the staged source tree, leading and
    /// trailing slashes stripped. `None` resolves to the root mountpoint.
    pub mountpoint: Option<String>,
    /// Flash geometry name; may be filled in later by propagation.
    pub flash_type: Option<String>,
    /// The single handler that builds this image.
    pub handler: &'static dyn ImageHandler,
    /// The handler's own configuration sub-section.
    pub handler_config: Section,
    pub partitions: Vec<Partition>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("file", &self.file)
            .field("handler", &self.handler.kind())
            .field("size", &self.size)
            .field("mountpoint", &self.mountpoint)
            .field("flash_type", &self.flash_type)
            .field("partitions", &self.partitions)
            .finish()
    }
}

impl Image {
    /// Build an image record from its config section.
    ///
    /// Fails on a missing or ambiguous handler type, an unknown flash type
    /// name, or a partition without an image reference.
    pub fn from_section(section: &Section, flash: &FlashRegistry) -> Result<Self> {
        let file = section.title().to_string();
        if file.is_empty() {
            bail!("image section without a title");
        }

        let flash_type = match section.get_str("flashtype") {
            Some(name) => {
                if flash.get(name).is_none() {
                    bail!("unknown flash type '{}' for image '{}'", name, file);
                }
                Some(name.to_string())
            }
            None => None,
        };

        let handler = handler::resolve(section)?;
        let handler_config = section
            .first_section(handler.kind())
            .cloned()
            .unwrap_or_else(|| Section::empty(""));

        let mut partitions = Vec::new();
        for psec in section.sections("partition") {
            partitions.push(Partition::from_section(psec, &file)?);
        }

        Ok(Image {
            name: section.get_str("name").map(str::to_string),
            size: section.get_size("size")?.unwrap_or(0),
            offset: section.get_size("offset")?.unwrap_or(0),
            mountpoint: section
                .get_str("mountpoint")
                .map(|mp| mp.trim_matches('/').to_string()),
            flash_type,
            handler,
            handler_config,
            partitions,
            file,
        })
    }
}

impl Partition {
    fn from_section(section: &Section, image_file: &str) -> Result<Self> {
        let name = section.title().to_string();
        let reference = section.get_str("image").map(str::to_string).ok_or_else(|| {
            anyhow::anyhow!(
                "partition '{}' of image '{}' has no image reference",
                name,
                image_file
            )
        })?;

        let partition_type = match section.get_int("partition-type").unwrap_or(0) {
            code @ 0..=255 => code as u8,
            code => bail!(
                "partition '{}' of image '{}': partition-type {} out of range",
                name,
                image_file,
                code
            ),
        };

        Ok(Partition {
            size: section
                .get_size("size")
                .with_context(|| format!("partition '{}' of image '{}'", name, image_file))?
                .unwrap_or(0),
            offset: section
                .get_size("offset")
                .with_context(|| format!("partition '{}' of image '{}'", name, image_file))?
                .unwrap_or(0),
            partition_type,
            image: reference,
            autoresize: section.get_bool("autoresize").unwrap_or(false),
            name,
        })
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Bare image record for scheduler and handler tests.
    pub(crate) fn image(
        file: &str,
        handler: &'static dyn ImageHandler,
        partitions: Vec<Partition>,
    ) -> Image {
        Image {
            file: file.to_string(),
            name: None,
            size: 0,
            offset: 0,
            mountpoint: None,
            flash_type: None,
            handler,
            handler_config: Section::empty(""),
            partitions,
        }
    }

    pub(crate) fn partition(name: &str, image: &str) -> Partition {
        Partition {
            name: name.to_string(),
            size: 0,
            offset: 0,
            partition_type: 0,
            image: image.to_string(),
            autoresize: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use std::fs;
    use tempfile::TempDir;

    fn image_section(body: &str) -> Section {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build.toml");
        fs::write(&path, body).unwrap();
        let root = load_config(&path).unwrap();
        root.first_section("image").unwrap().clone()
    }

    #[test]
    fn ingests_common_fields_and_partitions() {
        let section = image_section(
            r#"
            [image."flash.img"]
            name = "nand flash"
            size = "64M"
            [image."flash.img".flash]
            [image."flash.img".partition.kernel]
            image = "kernel.img"
            size = "4M"
            offset = "1M"
            [image."flash.img".partition.rootfs]
            image = "root.ubifs"
            autoresize = true
            "#,
        );

        let image = Image::from_section(&section, &FlashRegistry::default()).unwrap();
        assert_eq!(image.file, "flash.img");
        assert_eq!(image.name.as_deref(), Some("nand flash"));
        assert_eq!(image.size, 64 * 1024 * 1024);
        assert_eq!(image.handler.kind(), "flash");
        assert_eq!(image.partitions.len(), 2);
        assert_eq!(image.partitions[0].name, "kernel");
        assert_eq!(image.partitions[0].offset, 1024 * 1024);
        assert!(image.partitions[1].autoresize);
    }

    #[test]
    fn mountpoint_slashes_are_stripped() {
        let section = image_section(
            r#"
            [image."etc.tar"]
            mountpoint = "/etc/"
            [image."etc.tar".tar]
            "#,
        );

        let image = Image::from_section(&section, &FlashRegistry::default()).unwrap();
        assert_eq!(image.mountpoint.as_deref(), Some("etc"));
    }

    #[test]
    fn no_handler_type_is_fatal() {
        let section = image_section(
            r#"
            [image."broken.img"]
            size = "1M"
            "#,
        );

        let err = Image::from_section(&section, &FlashRegistry::default()).unwrap_err();
        assert!(err.to_string().contains("no image type given"));
    }

    #[test]
    fn multiple_handler_types_are_fatal() {
        let section = image_section(
            r#"
            [image."broken.img"]
            [image."broken.img".tar]
            [image."broken.img".file]
            "#,
        );

        let err = Image::from_section(&section, &FlashRegistry::default()).unwrap_err();
        assert!(err.to_string().contains("multiple image types given"));
    }

    #[test]
    fn unknown_flash_type_is_fatal() {
        let section = image_section(
            r#"
            [image."flash.img"]
            flashtype = "no-such-chip"
            [image."flash.img".flash]
            "#,
        );

        let err = Image::from_section(&section, &FlashRegistry::default()).unwrap_err();
        assert!(err.to_string().contains("unknown flash type"));
    }

    #[test]
    fn partition_without_reference_is_fatal() {
        let section = image_section(
            r#"
            [image."disk.img"]
            [image."disk.img".hdimage]
            [image."disk.img".partition.boot]
            size = "1M"
            "#,
        );

        let err = Image::from_section(&section, &FlashRegistry::default()).unwrap_err();
        assert!(err.to_string().contains("no image reference"));
    }
}
