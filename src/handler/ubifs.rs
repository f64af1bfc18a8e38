//! UBIFS filesystem image handler.
//!
//! Wraps the external `mkfs.ubifs` tool; the geometry flags come from the
//! image's resolved flash type.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::build::BuildContext;
use crate::handler::ImageHandler;
use crate::image::flash::FlashType;
use crate::image::Image;
use crate::process::Cmd;

pub struct UbifsHandler;

fn tool_args(flash: &FlashType, tree: &Path, out: &Path) -> Vec<String> {
    vec![
        "-r".to_string(),
        tree.display().to_string(),
        "-m".to_string(),
        flash.minimum_io_unit_size.to_string(),
        "-e".to_string(),
        flash.lebsize.to_string(),
        "-c".to_string(),
        flash.numpebs.to_string(),
        "-o".to_string(),
        out.display().to_string(),
    ]
}

fn geometry<'a>(ctx: &'a BuildContext, image: &Image) -> Result<&'a FlashType> {
    let Some(flash) = ctx.flash_type(image) else {
        bail!("no flash type given for image '{}'", image.file);
    };
    if flash.lebsize == 0 || flash.minimum_io_unit_size == 0 || flash.numpebs == 0 {
        bail!(
            "flash type '{}' is missing ubifs geometry (lebsize, minimum-io-unit-size, numpebs) for image '{}'",
            flash.name,
            image.file
        );
    }
    Ok(flash)
}

impl ImageHandler for UbifsHandler {
    fn kind(&self) -> &'static str {
        "ubifs"
    }

    fn required_tools(&self) -> &'static [(&'static str, &'static str)] {
        &[("mkfs.ubifs", "mtd-utils")]
    }

    fn setup(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        geometry(ctx, image).map(|_| ())
    }

    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let flash = geometry(ctx, image)?;
        let out = ctx.outfile(image);
        Cmd::new("mkfs.ubifs")
            .args(tool_args(flash, ctx.mountpath(image), &out))
            .error_msg("mkfs.ubifs failed")
            .run()
            .with_context(|| format!("building '{}'", out.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_args_carry_the_geometry() {
        let flash = FlashType {
            name: "nand".to_string(),
            pebsize: 16 * 1024,
            lebsize: 15 * 1024,
            numpebs: 4096,
            minimum_io_unit_size: 512,
            vid_header_offset: 512,
            sub_page_size: 512,
        };

        let args = tool_args(
            &flash,
            Path::new("/tmp/stage/root"),
            Path::new("/tmp/out/root.ubifs"),
        );
        assert_eq!(
            args,
            [
                "-r",
                "/tmp/stage/root",
                "-m",
                "512",
                "-e",
                "15360",
                "-c",
                "4096",
                "-o",
                "/tmp/out/root.ubifs"
            ]
        );
    }
}
