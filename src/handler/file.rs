//! Raw file copy handler.
//!
//! Copies a pre-existing input file into the output directory under the
//! image's name. The source is the handler's `name` field, or the image key
//! itself when absent, resolved against the input directory.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::build::BuildContext;
use crate::handler::ImageHandler;
use crate::image::Image;

pub struct FileHandler;

fn source(ctx: &BuildContext, image: &Image) -> PathBuf {
    let name = image
        .handler_config
        .get_str("name")
        .unwrap_or(&image.file);
    ctx.infile(name)
}

impl ImageHandler for FileHandler {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn setup(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let source = source(ctx, image);
        if !source.is_file() {
            bail!(
                "image '{}': input file '{}' not found",
                image.file,
                source.display()
            );
        }
        Ok(())
    }

    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let source = source(ctx, image);
        let out = ctx.outfile(image);
        fs::copy(&source, &out).with_context(|| {
            format!(
                "copying '{}' to '{}'",
                source.display(),
                out.display()
            )
        })?;
        Ok(())
    }
}
