//! Build manifest.
//!
//! A successful run records what it produced: one entry per generated
//! artifact with its size and SHA-256 digest, written as
//! `build-manifest.json` next to the artifacts.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::build::BuildContext;

pub const MANIFEST_FILENAME: &str = "build-manifest.json";

#[derive(Debug, Serialize)]
pub struct BuildManifest {
    pub schema: u32,
    pub created: String,
    pub artifacts: Vec<ArtifactRecord>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactRecord {
    pub file: String,
    pub kind: String,
    pub size: u64,
    pub sha256: String,
}

/// Write the manifest for every catalog image's artifact.
pub fn write_manifest(ctx: &BuildContext) -> Result<PathBuf> {
    let mut artifacts = Vec::new();
    for image in ctx.catalog().images() {
        let path = ctx.outfile(image);
        let metadata = fs::metadata(&path)
            .with_context(|| format!("reading generated artifact '{}'", path.display()))?;
        artifacts.push(ArtifactRecord {
            file: image.file.clone(),
            kind: image.handler.kind().to_string(),
            size: metadata.len(),
            sha256: sha256_file(&path)?,
        });
    }

    let manifest = BuildManifest {
        schema: 1,
        created: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("formatting manifest timestamp")?,
        artifacts,
    };

    let path = ctx.outputpath().join(MANIFEST_FILENAME);
    let body = serde_json::to_string_pretty(&manifest).context("encoding build manifest")?;
    fs::write(&path, body)
        .with_context(|| format!("writing build manifest '{}'", path.display()))?;
    Ok(path)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("hashing artifact '{}'", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("hashing artifact '{}'", path.display()))?;
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use crate::image::catalog::Catalog;
    use crate::image::flash::FlashRegistry;
    use crate::image::testutil;
    use crate::stage::MountSet;
    use tempfile::TempDir;

    #[test]
    fn sha256_matches_known_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("artifact");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn manifest_lists_every_artifact() {
        let temp = TempDir::new().unwrap();
        let catalog = Catalog::from_images(vec![testutil::image(
            "out.img",
            handler::handlers()[0],
            Vec::new(),
        )]);
        let ctx = BuildContext::for_tests(
            catalog,
            FlashRegistry::default(),
            MountSet::root_only(temp.path()),
            temp.path(),
        );

        fs::create_dir_all(ctx.outputpath()).unwrap();
        fs::write(ctx.outputpath().join("out.img"), "payload").unwrap();

        let path = write_manifest(&ctx).unwrap();
        let body = fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(parsed["schema"], 1);
        assert_eq!(parsed["artifacts"][0]["file"], "out.img");
        assert_eq!(parsed["artifacts"][0]["size"], 7);
        assert!(parsed["created"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let temp = TempDir::new().unwrap();
        let catalog = Catalog::from_images(vec![testutil::image(
            "never-built.img",
            handler::handlers()[0],
            Vec::new(),
        )]);
        let ctx = BuildContext::for_tests(
            catalog,
            FlashRegistry::default(),
            MountSet::root_only(temp.path()),
            temp.path(),
        );
        fs::create_dir_all(ctx.outputpath()).unwrap();

        assert!(write_manifest(&ctx).is_err());
    }
}
