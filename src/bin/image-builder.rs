use std::path::PathBuf;

use anyhow::{bail, Result};
use image_builder::{check, run, BuildOptions};

fn usage() -> &'static str {
    "Usage:\n  image-builder build <description.toml> [--root DIR] [--tmp DIR] [--input DIR] [--output DIR]\n  image-builder check <description.toml>"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.split_first() {
        Some((cmd, rest)) if cmd == "build" => run(&parse_options(rest)?),
        Some((cmd, rest)) if cmd == "check" => check(&parse_options(rest)?),
        _ => bail!(usage()),
    }
}

fn parse_options(args: &[String]) -> Result<BuildOptions> {
    let mut opts = BuildOptions::default();
    let mut iter = args.iter();

    let Some(config) = iter.next() else {
        bail!(usage());
    };
    opts.config = PathBuf::from(config);

    while let Some(flag) = iter.next() {
        let target = match flag.as_str() {
            "--root" => &mut opts.rootpath,
            "--tmp" => &mut opts.tmppath,
            "--input" => &mut opts.inputpath,
            "--output" => &mut opts.outputpath,
            other => bail!("unknown option '{}'\n{}", other, usage()),
        };
        let Some(value) = iter.next() else {
            bail!("option '{}' needs a value\n{}", flag, usage());
        };
        *target = Some(PathBuf::from(value));
    }

    Ok(opts)
}
