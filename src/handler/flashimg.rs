//! Raw flash image handler.
//!
//! Concatenates partition artifacts at their declared offsets into one chip
//! image, filling gaps and trailing space with `0xFF` (the erased state of
//! NOR/NAND flash). Offsets and sizes must be erase-block aligned; the image
//! is padded out to the full chip when the geometry gives a block count.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{BufWriter, Write};

use crate::build::BuildContext;
use crate::handler::ImageHandler;
use crate::image::{Image, Partition};

pub struct FlashImageHandler;

const ERASED: u8 = 0xff;

fn align_up(value: u64, step: u64) -> u64 {
    if step == 0 {
        value
    } else {
        value.div_ceil(step) * step
    }
}

fn check_alignment(image: &Image, partition: &Partition, pebsize: u64) -> Result<()> {
    if partition.offset % pebsize != 0 {
        bail!(
            "image '{}': partition '{}' offset {} is not erase-block aligned ({})",
            image.file,
            partition.name,
            partition.offset,
            pebsize
        );
    }
    if partition.size % pebsize != 0 {
        bail!(
            "image '{}': partition '{}' size {} is not erase-block aligned ({})",
            image.file,
            partition.name,
            partition.size,
            pebsize
        );
    }
    Ok(())
}

fn write_padding<W: Write>(writer: &mut W, mut remaining: u64) -> std::io::Result<()> {
    let chunk = [ERASED; 4096];
    while remaining > 0 {
        let step = remaining.min(chunk.len() as u64) as usize;
        writer.write_all(&chunk[..step])?;
        remaining -= step as u64;
    }
    Ok(())
}

impl ImageHandler for FlashImageHandler {
    fn kind(&self) -> &'static str {
        "flash"
    }

    fn setup(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
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
        for partition in &image.partitions {
            check_alignment(image, partition, flash.pebsize)?;
        }
        Ok(())
    }

    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let flash = ctx
            .flash_type(image)
            .with_context(|| format!("no flash type given for image '{}'", image.file))?;
        let capacity = flash.pebsize * flash.numpebs;

        let out = ctx.outfile(image);
        let file = fs::File::create(&out)
            .with_context(|| format!("creating '{}'", out.display()))?;
        let mut writer = BufWriter::new(file);

        let mut cursor = 0u64;
        for partition in &image.partitions {
            let child = ctx.catalog().get(&partition.image).with_context(|| {
                format!(
                    "image '{}': no rule to generate '{}'",
                    image.file, partition.image
                )
            })?;
            let data = fs::read(ctx.outfile(child)).with_context(|| {
                format!("reading partition content '{}'", partition.image)
            })?;
            let length = data.len() as u64;

            let offset = if partition.offset > 0 {
                partition.offset
            } else {
                cursor
            };
            if offset < cursor {
                bail!(
                    "image '{}': partition '{}' at offset {} overlaps previous content ending at {}",
                    image.file,
                    partition.name,
                    offset,
                    cursor
                );
            }
            if partition.size > 0 && length > partition.size {
                bail!(
                    "image '{}': '{}' ({} bytes) exceeds partition '{}' size {}",
                    image.file,
                    partition.image,
                    length,
                    partition.name,
                    partition.size
                );
            }

            write_padding(&mut writer, offset - cursor)
                .with_context(|| format!("writing '{}'", out.display()))?;
            writer
                .write_all(&data)
                .with_context(|| format!("writing '{}'", out.display()))?;

            let end = if partition.size > 0 {
                offset + partition.size
            } else {
                align_up(offset + length, flash.pebsize)
            };
            write_padding(&mut writer, end - (offset + length))
                .with_context(|| format!("writing '{}'", out.display()))?;
            cursor = end;
        }

        if capacity > 0 {
            if cursor > capacity {
                bail!(
                    "image '{}': content ({} bytes) exceeds flash capacity {}",
                    image.file,
                    cursor,
                    capacity
                );
            }
            write_padding(&mut writer, capacity - cursor)
                .with_context(|| format!("writing '{}'", out.display()))?;
        }

        writer
            .flush()
            .with_context(|| format!("writing '{}'", out.display()))?;
        Ok(())
    }
}
