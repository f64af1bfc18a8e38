//! JFFS2 filesystem image handler.
//!
//! Wraps the external `mkfs.jffs2` tool; the erase block size comes from the
//! image's resolved flash type, and a declared image size pads the output to
//! that size.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::build::BuildContext;
use crate::handler::ImageHandler;
use crate::image::flash::FlashType;
use crate::image::Image;
use crate::process::Cmd;

pub struct Jffs2Handler;

fn tool_args(flash: &FlashType, tree: &Path, out: &Path, pad_to: u64) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        tree.display().to_string(),
        "-e".to_string(),
        flash.pebsize.to_string(),
        "-o".to_string(),
        out.display().to_string(),
    ];
    if pad_to > 0 {
        args.push(format!("--pad={}", pad_to));
    }
    args
}

fn geometry<'a>(ctx: &'a BuildContext, image: &Image) -> Result<&'a FlashType> {
    let Some(flash) = ctx.flash_type(image) else {
        bail!("no flash type given for image '{}'", image.file);
    };
    if flash.pebsize == 0 {
        bail!(
            "flash type '{}' has no erase block size (needed by image '{}')",
            flash.name,
            image.file
        );
    }
    Ok(flash)
}

impl ImageHandler for Jffs2Handler {
    fn kind(&self) -> &'static str {
        "jffs2"
    }

    fn required_tools(&self) -> &'static [(&'static str, &'static str)] {
        &[("mkfs.jffs2", "mtd-utils")]
    }

    fn setup(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        geometry(ctx, image).map(|_| ())
    }

    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let flash = geometry(ctx, image)?;
        let out = ctx.outfile(image);
        Cmd::new("mkfs.jffs2")
            .args(tool_args(flash, ctx.mountpath(image), &out, image.size))
            .error_msg("mkfs.jffs2 failed")
            .run()
            .with_context(|| format!("building '{}'", out.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nor() -> FlashType {
        FlashType {
            name: "nor".to_string(),
            pebsize: 64 * 1024,
            lebsize: 0,
            numpebs: 128,
            minimum_io_unit_size: 0,
            vid_header_offset: 0,
            sub_page_size: 0,
        }
    }

    #[test]
    fn tool_args_pad_when_the_image_has_a_size() {
        let args = tool_args(
            &nor(),
            Path::new("/tmp/stage/etc"),
            Path::new("/tmp/out/etc.jffs2"),
            8 * 1024 * 1024,
        );
        assert_eq!(
            args,
            [
                "-d",
                "/tmp/stage/etc",
                "-e",
                "65536",
                "-o",
                "/tmp/out/etc.jffs2",
                "--pad=8388608"
            ]
        );
    }

    #[test]
    fn tool_args_skip_padding_without_a_size() {
        let args = tool_args(
            &nor(),
            Path::new("/stage"),
            Path::new("/out/x.jffs2"),
            0,
        );
        assert!(!args.iter().any(|a| a.starts_with("--pad")));
    }
}
