//! Image-type handlers.
//!
//! Each handler owns the construction algorithm for one image type and is
//! selected by declaring a sub-section under its key inside an image section
//! (`[image."x".tar]` picks the tar handler). Exactly one such sub-section
//! must be present per image.
//!
//! Handlers see the build through [`BuildContext`]: the staged mountpoint
//! tree, the resolved flash geometry, the ordered partitions with their
//! target images, and the input/output directories.

pub mod file;
pub mod flashimg;
pub mod hdimage;
pub mod jffs2;
pub mod tar;
pub mod ubifs;

use anyhow::{bail, Result};

use crate::build::BuildContext;
use crate::config::Section;
use crate::image::Image;

/// Capability interface for one image type.
pub trait ImageHandler: Sync {
    /// The config key selecting this handler.
    fn kind(&self) -> &'static str;

    /// Host tools this handler shells out to, as `(command, package)` pairs.
    fn required_tools(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Validate and prepare handler-specific state, once per image, before
    /// any generation begins.
    fn setup(&self, _ctx: &BuildContext, _image: &Image) -> Result<()> {
        Ok(())
    }

    /// Produce the image's output artifact. Dependencies are already
    /// generated when this runs.
    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()>;
}

static FILE: file::FileHandler = file::FileHandler;
static TAR: tar::TarHandler = tar::TarHandler;
static FLASH: flashimg::FlashImageHandler = flashimg::FlashImageHandler;
static HDIMAGE: hdimage::HdImageHandler = hdimage::HdImageHandler;
static UBIFS: ubifs::UbifsHandler = ubifs::UbifsHandler;
static JFFS2: jffs2::Jffs2Handler = jffs2::Jffs2Handler;

/// All known handlers, in resolution order.
pub fn handlers() -> &'static [&'static dyn ImageHandler] {
    &[&FILE, &TAR, &FLASH, &HDIMAGE, &UBIFS, &JFFS2]
}

/// Find the single handler whose key matches a sub-section of `section`.
///
/// Zero or multiple matches is a fatal configuration error.
pub fn resolve(section: &Section) -> Result<&'static dyn ImageHandler> {
    let mut matched = None;
    let mut matches = 0;
    for handler in handlers() {
        let count = section.section_count(handler.kind());
        if count > 0 {
            matched = Some(*handler);
            matches += count;
        }
    }

    match (matches, matched) {
        (1, Some(handler)) => Ok(handler),
        (0, _) => bail!("no image type given for image '{}'", section.title()),
        _ => bail!("multiple image types given for image '{}'", section.title()),
    }
}
