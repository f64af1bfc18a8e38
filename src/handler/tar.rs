//! Tar archive handler.
//!
//! Packages an image's staged mountpoint tree into a tar archive. Output
//! names ending in `.zst` get zstd compression; everything else is a plain
//! archive.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::build::BuildContext;
use crate::handler::ImageHandler;
use crate::image::Image;

pub struct TarHandler;

fn archive_tree<W: Write>(writer: W, tree: &Path) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", tree)
        .with_context(|| format!("archiving '{}'", tree.display()))?;
    builder.into_inner().context("finishing archive")
}

impl ImageHandler for TarHandler {
    fn kind(&self) -> &'static str {
        "tar"
    }

    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let tree = ctx.mountpath(image);
        let out = ctx.outfile(image);
        let file = fs::File::create(&out)
            .with_context(|| format!("creating '{}'", out.display()))?;

        if image.file.ends_with(".zst") {
            let encoder =
                zstd::Encoder::new(file, 0).context("initializing zstd encoder")?;
            let encoder = archive_tree(encoder, tree)?;
            encoder
                .finish()
                .with_context(|| format!("compressing '{}'", out.display()))?;
        } else {
            archive_tree(file, tree)?;
        }
        Ok(())
    }
}
