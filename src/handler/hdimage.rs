//! Block-device image handler.
//!
//! Splices partition artifacts into a sparse disk image at byte offsets.
//! Partitions carrying a partition type are entered into an MBR partition
//! table in the first sector; untyped partitions are placed but not listed.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::build::BuildContext;
use crate::handler::ImageHandler;
use crate::image::{Image, Partition};

pub struct HdImageHandler;

const SECTOR_SIZE: u64 = 512;
const MBR_ENTRY_OFFSET: u64 = 446;
const MBR_MAX_ENTRIES: usize = 4;

struct TableEntry {
    partition_type: u8,
    offset: u64,
    size: u64,
}

fn align_up(value: u64, step: u64) -> u64 {
    value.div_ceil(step) * step
}

fn uses_table(image: &Image) -> bool {
    image.partitions.iter().any(|p| p.partition_type != 0)
}

fn sector_aligned(image: &Image, partition: &Partition) -> Result<()> {
    if partition.offset % SECTOR_SIZE != 0 || partition.size % SECTOR_SIZE != 0 {
        bail!(
            "image '{}': partition '{}' is in the partition table but not sector aligned",
            image.file,
            partition.name
        );
    }
    Ok(())
}

fn splice(out: &mut fs::File, source: &Path, offset: u64) -> Result<()> {
    let mut child = fs::File::open(source)
        .with_context(|| format!("reading partition content '{}'", source.display()))?;
    out.seek(SeekFrom::Start(offset))
        .with_context(|| format!("seeking to offset {}", offset))?;
    std::io::copy(&mut child, out)
        .with_context(|| format!("splicing '{}'", source.display()))?;
    Ok(())
}

fn write_table(out: &mut fs::File, entries: &[TableEntry]) -> Result<()> {
    let mut table = [0u8; 66];
    for (index, entry) in entries.iter().enumerate() {
        let lba = entry.offset / SECTOR_SIZE;
        let sectors = entry.size / SECTOR_SIZE;
        if lba > u64::from(u32::MAX) || sectors > u64::from(u32::MAX) {
            bail!("partition at offset {} does not fit an MBR entry", entry.offset);
        }
        let record = &mut table[index * 16..index * 16 + 16];
        record[0] = 0x00; // not bootable
        record[1..4].copy_from_slice(&[0xff, 0xff, 0xff]); // CHS ignored, LBA only
        record[4] = entry.partition_type;
        record[5..8].copy_from_slice(&[0xff, 0xff, 0xff]);
        record[8..12].copy_from_slice(&(lba as u32).to_le_bytes());
        record[12..16].copy_from_slice(&(sectors as u32).to_le_bytes());
    }
    table[64] = 0x55;
    table[65] = 0xaa;

    out.seek(SeekFrom::Start(MBR_ENTRY_OFFSET))
        .context("seeking to partition table")?;
    out.write_all(&table).context("writing partition table")?;
    Ok(())
}

impl ImageHandler for HdImageHandler {
    fn kind(&self) -> &'static str {
        "hdimage"
    }

    fn setup(&self, _ctx: &BuildContext, image: &Image) -> Result<()> {
        let typed = image
            .partitions
            .iter()
            .filter(|p| p.partition_type != 0)
            .count();
        if typed > MBR_MAX_ENTRIES {
            bail!(
                "image '{}': {} partitions in the partition table, MBR holds at most {}",
                image.file,
                typed,
                MBR_MAX_ENTRIES
            );
        }
        for partition in &image.partitions {
            if partition.partition_type != 0 {
                sector_aligned(image, partition)?;
            }
            if partition.autoresize {
                if image.size == 0 {
                    bail!(
                        "image '{}': partition '{}' wants autoresize but the image has no size",
                        image.file,
                        partition.name
                    );
                }
                if image.partitions.last().map(|p| p.name.as_str())
                    != Some(partition.name.as_str())
                {
                    bail!(
                        "image '{}': only the last partition may autoresize",
                        image.file
                    );
                }
            }
        }
        Ok(())
    }

    fn generate(&self, ctx: &BuildContext, image: &Image) -> Result<()> {
        let table = uses_table(image);
        let out_path = ctx.outfile(image);
        let mut out = fs::File::create(&out_path)
            .with_context(|| format!("creating '{}'", out_path.display()))?;

        let mut entries = Vec::new();
        let mut cursor = if table { SECTOR_SIZE } else { 0 };

        for partition in &image.partitions {
            let child = ctx.catalog().get(&partition.image).with_context(|| {
                format!(
                    "image '{}': no rule to generate '{}'",
                    image.file, partition.image
                )
            })?;
            let child_path = ctx.outfile(child);
            let length = fs::metadata(&child_path)
                .with_context(|| {
                    format!("reading partition content '{}'", child_path.display())
                })?
                .len();

            let offset = if partition.offset > 0 {
                partition.offset
            } else {
                align_up(cursor, SECTOR_SIZE)
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

            let size = if partition.autoresize {
                image.size.checked_sub(offset).with_context(|| {
                    format!(
                        "image '{}': autoresize partition '{}' starts past the image end",
                        image.file, partition.name
                    )
                })?
            } else if partition.size > 0 {
                partition.size
            } else {
                align_up(length, SECTOR_SIZE)
            };
            if length > size {
                bail!(
                    "image '{}': '{}' ({} bytes) exceeds partition '{}' size {}",
                    image.file,
                    partition.image,
                    length,
                    partition.name,
                    size
                );
            }

            splice(&mut out, &child_path, offset)
                .with_context(|| format!("writing '{}'", out_path.display()))?;

            if partition.partition_type != 0 {
                entries.push(TableEntry {
                    partition_type: partition.partition_type,
                    offset,
                    size,
                });
            }
            cursor = offset + size;
        }

        let total = if image.size > 0 {
            if cursor > image.size {
                bail!(
                    "image '{}': partitions end at {} but the image size is {}",
                    image.file,
                    cursor,
                    image.size
                );
            }
            image.size
        } else {
            cursor.max(if table { SECTOR_SIZE } else { 0 })
        };
        out.set_len(total)
            .with_context(|| format!("sizing '{}'", out_path.display()))?;

        if table {
            write_table(&mut out, &entries)
                .with_context(|| format!("writing '{}'", out_path.display()))?;
        }
        Ok(())
    }
}
