//! Flash chip geometries and flash-type propagation.
//!
//! Flash-oriented handlers need erase-block and page geometry. A geometry is
//! declared once under a `[flash."name"]` section and referenced by images;
//! images that embed flash partitions hand their geometry down to the
//! referenced images, and two different geometries meeting at the same image
//! is a fatal conflict.

use anyhow::{bail, Context, Result};

use crate::config::Section;
use crate::image::catalog::Catalog;

/// A named flash-chip geometry. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct FlashType {
    pub name: String,
    pub pebsize: u64,
    pub lebsize: u64,
    pub numpebs: u64,
    pub minimum_io_unit_size: u64,
    pub vid_header_offset: u64,
    pub sub_page_size: u64,
}

/// Lookup-by-name store for declared flash geometries.
#[derive(Debug, Default)]
pub struct FlashRegistry {
    types: Vec<FlashType>,
}

impl FlashRegistry {
    /// Parse every `flash` section of the build description.
    pub fn from_config(root: &Section) -> Result<Self> {
        let mut registry = FlashRegistry::default();
        for section in root.sections("flash") {
            let flash = FlashType::from_section(section)
                .with_context(|| format!("in flash type '{}'", section.title()))?;
            if registry.get(&flash.name).is_some() {
                bail!("duplicate flash type '{}'", flash.name);
            }
            registry.types.push(flash);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&FlashType> {
        self.types.iter().find(|flash| flash.name == name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, flash: FlashType) {
        self.types.push(flash);
    }
}

impl FlashType {
    fn from_section(section: &Section) -> Result<Self> {
        let name = section.title().to_string();
        if name.is_empty() {
            bail!("flash section without a name");
        }
        Ok(FlashType {
            pebsize: section.get_size("pebsize")?.unwrap_or(0),
            lebsize: section.get_size("lebsize")?.unwrap_or(0),
            numpebs: section.get_size("numpebs")?.unwrap_or(0),
            minimum_io_unit_size: section.get_size("minimum-io-unit-size")?.unwrap_or(0),
            vid_header_offset: section.get_size("vid-header-offset")?.unwrap_or(0),
            sub_page_size: section.get_size("sub-page-size")?.unwrap_or(0),
            name,
        })
    }
}

/// Propagate flash types along partition edges until nothing changes.
///
/// Each sweep hands every typed image's geometry to its partition targets;
/// sweeps repeat until a fixed point, so a geometry reaches targets any
/// number of hops away. A target already holding a different geometry is a
/// fatal conflict.
pub fn propagate_flash_types(catalog: &mut Catalog) -> Result<()> {
    let mut edges = Vec::new();
    for (index, image) in catalog.images().iter().enumerate() {
        for partition in &image.partitions {
            let target = catalog.index_of(&partition.image).ok_or_else(|| {
                anyhow::anyhow!(
                    "image '{}': no rule to generate '{}'",
                    image.file,
                    partition.image
                )
            })?;
            edges.push((index, target));
        }
    }

    loop {
        let mut changed = false;
        for &(source, target) in &edges {
            let Some(source_type) = catalog.images()[source].flash_type.clone() else {
                continue;
            };
            let source_file = catalog.images()[source].file.clone();
            let target_image = &mut catalog.images_mut()[target];
            match &target_image.flash_type {
                None => {
                    target_image.flash_type = Some(source_type);
                    changed = true;
                }
                Some(existing) if *existing != source_type => bail!(
                    "conflicting flash types: '{}' has flash type '{}' whereas '{}' has flash type '{}'",
                    target_image.file,
                    existing,
                    source_file,
                    source_type
                ),
                Some(_) => {}
            }
        }
        if !changed {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::image::catalog::Catalog;
    use std::fs;
    use tempfile::TempDir;

    fn load(body: &str) -> Section {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build.toml");
        fs::write(&path, body).unwrap();
        load_config(&path).unwrap()
    }

    fn catalog(body: &str) -> Catalog {
        let root = load(body);
        let flash = FlashRegistry::from_config(&root).unwrap();
        Catalog::from_config(&root, &flash).unwrap()
    }

    #[test]
    fn parses_geometry_fields() {
        let root = load(
            r#"
            [flash."nand-64M"]
            pebsize = "16k"
            lebsize = "15k"
            numpebs = 4096
            minimum-io-unit-size = "512"
            vid-header-offset = "512"
            sub-page-size = "512"
            "#,
        );

        let registry = FlashRegistry::from_config(&root).unwrap();
        let flash = registry.get("nand-64M").unwrap();
        assert_eq!(flash.pebsize, 16 * 1024);
        assert_eq!(flash.lebsize, 15 * 1024);
        assert_eq!(flash.numpebs, 4096);
        assert_eq!(flash.minimum_io_unit_size, 512);
        assert!(registry.get("nor-8M").is_none());
    }

    #[test]
    fn duplicate_flash_type_is_fatal() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("extra.toml"),
            "[flash.\"nand-64M\"]\npebsize = \"16k\"\n",
        )
        .unwrap();
        let path = temp.path().join("build.toml");
        fs::write(
            &path,
            "include = [\"extra.toml\"]\n[flash.\"nand-64M\"]\npebsize = \"16k\"\n",
        )
        .unwrap();

        let root = load_config(&path).unwrap();
        let err = FlashRegistry::from_config(&root).unwrap_err();
        assert!(err.to_string().contains("duplicate flash type"));
    }

    #[test]
    fn propagates_to_untyped_targets() {
        let mut catalog = catalog(
            r#"
            [flash."nand-64M"]
            pebsize = "16k"

            [image."flash.img"]
            flashtype = "nand-64M"
            [image."flash.img".flash]
            [image."flash.img".partition.root]
            image = "root.ubifs"

            [image."root.ubifs"]
            [image."root.ubifs".ubifs]
            "#,
        );

        propagate_flash_types(&mut catalog).unwrap();
        assert_eq!(
            catalog.get("root.ubifs").unwrap().flash_type.as_deref(),
            Some("nand-64M")
        );
    }

    #[test]
    fn reaches_targets_multiple_hops_away() {
        let mut catalog = catalog(
            r#"
            [flash."nand-64M"]
            pebsize = "16k"

            [image."inner.jffs2"]
            [image."inner.jffs2".jffs2]

            [image."middle.img"]
            [image."middle.img".flash]
            [image."middle.img".partition.inner]
            image = "inner.jffs2"

            [image."outer.img"]
            flashtype = "nand-64M"
            [image."outer.img".flash]
            [image."outer.img".partition.middle]
            image = "middle.img"
            "#,
        );

        propagate_flash_types(&mut catalog).unwrap();
        assert_eq!(
            catalog.get("middle.img").unwrap().flash_type.as_deref(),
            Some("nand-64M")
        );
        assert_eq!(
            catalog.get("inner.jffs2").unwrap().flash_type.as_deref(),
            Some("nand-64M")
        );
    }

    #[test]
    fn conflicting_types_meeting_at_a_shared_target_are_fatal() {
        let mut catalog = catalog(
            r#"
            [flash."nand-64M"]
            pebsize = "16k"
            [flash."nor-8M"]
            pebsize = "64k"

            [image."shared.ubifs"]
            [image."shared.ubifs".ubifs]

            [image."a.img"]
            flashtype = "nand-64M"
            [image."a.img".flash]
            [image."a.img".partition.data]
            image = "shared.ubifs"

            [image."b.img"]
            flashtype = "nor-8M"
            [image."b.img".flash]
            [image."b.img".partition.data]
            image = "shared.ubifs"
            "#,
        );

        let err = propagate_flash_types(&mut catalog).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("conflicting flash types"));
        assert!(message.contains("nand-64M"));
        assert!(message.contains("nor-8M"));
    }
}
