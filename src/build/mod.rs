//! Build orchestration.
//!
//! [`run`] drives a full batch build: load the description, build the flash
//! registry and image catalog, validate references, propagate flash types,
//! check host tools, stage mountpoints, run handler setup, then generate
//! every image in dependency order. The staging area is wiped on every exit
//! path once it has been touched.
//!
//! All state lives in an explicit [`BuildContext`] threaded through the
//! phases; there is no process-global catalog or registry.

pub mod manifest;
pub mod scheduler;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{self, Section};
use crate::image::catalog::Catalog;
use crate::image::flash::{self, FlashRegistry, FlashType};
use crate::image::Image;
use crate::preflight;
use crate::stage::{self, MountSet};
use scheduler::Scheduler;

/// Invocation parameters: the build description path plus optional
/// directory overrides (command line wins over the description's `[config]`
/// section, which wins over the defaults).
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub config: PathBuf,
    pub rootpath: Option<PathBuf>,
    pub tmppath: Option<PathBuf>,
    pub inputpath: Option<PathBuf>,
    pub outputpath: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct BuildPaths {
    rootpath: PathBuf,
    tmppath: PathBuf,
    inputpath: PathBuf,
    outputpath: PathBuf,
}

/// Everything the phases need, owned in one place and immutable during
/// generation.
pub struct BuildContext {
    paths: BuildPaths,
    catalog: Catalog,
    flash: FlashRegistry,
    mounts: MountSet,
}

impl BuildContext {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The resolved flash geometry for an image, if any.
    pub fn flash_type(&self, image: &Image) -> Option<&FlashType> {
        image
            .flash_type
            .as_deref()
            .and_then(|name| self.flash.get(name))
    }

    /// The staging directory holding exactly this image's mountpoint tree.
    pub fn mountpath(&self, image: &Image) -> &Path {
        self.mounts.mountpath_for(image)
    }

    /// Where this image's output artifact goes.
    pub fn outfile(&self, image: &Image) -> PathBuf {
        self.paths.outputpath.join(&image.file)
    }

    /// Resolve a handler input file: absolute paths pass through, everything
    /// else is looked up under the input directory.
    pub fn infile(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.inputpath.join(name)
        }
    }

    pub fn rootpath(&self) -> &Path {
        &self.paths.rootpath
    }

    pub fn tmppath(&self) -> &Path {
        &self.paths.tmppath
    }

    pub fn outputpath(&self) -> &Path {
        &self.paths.outputpath
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        catalog: Catalog,
        flash: FlashRegistry,
        mounts: MountSet,
        dir: &Path,
    ) -> Self {
        BuildContext {
            paths: BuildPaths {
                rootpath: dir.join("root"),
                tmppath: dir.join("tmp"),
                inputpath: dir.join("input"),
                outputpath: dir.join("out"),
            },
            catalog,
            flash,
            mounts,
        }
    }
}

struct Prepared {
    catalog: Catalog,
    flash: FlashRegistry,
    paths: BuildPaths,
}

/// Run the configuration-only phases: load, ingest, validate, propagate.
///
/// No filesystem mutation happens here, so failures leave the host
/// untouched.
fn prepare(opts: &BuildOptions) -> Result<Prepared> {
    let root = config::load_config(&opts.config)?;

    let flash = FlashRegistry::from_config(&root)?;
    let mut catalog = Catalog::from_config(&root, &flash)?;
    catalog.validate_references()?;
    flash::propagate_flash_types(&mut catalog)?;

    Ok(Prepared {
        paths: resolve_paths(&root, opts),
        catalog,
        flash,
    })
}

fn resolve_paths(root: &Section, opts: &BuildOptions) -> BuildPaths {
    let config = root.first_section("config");
    let pick = |flag: &Option<PathBuf>, key: &str, default: &str| {
        flag.clone().unwrap_or_else(|| {
            config
                .and_then(|section| section.get_str(key))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        })
    };

    BuildPaths {
        rootpath: pick(&opts.rootpath, "rootpath", "root"),
        tmppath: pick(&opts.tmppath, "tmppath", "tmp"),
        inputpath: pick(&opts.inputpath, "inputpath", "input"),
        outputpath: pick(&opts.outputpath, "outputpath", "images"),
    }
}

/// Validate a build description without generating anything.
pub fn check(opts: &BuildOptions) -> Result<()> {
    let prepared = prepare(opts)?;

    println!(
        "[check] {} flash type(s), {} image(s)",
        prepared.flash.len(),
        prepared.catalog.len()
    );
    for image in prepared.catalog.images() {
        println!("[check] '{}' ({})", image.file, image.handler.kind());
        for partition in &image.partitions {
            println!(
                "[check]   partition '{}' -> '{}'",
                partition.name, partition.image
            );
        }
    }
    println!("[check] configuration OK");
    Ok(())
}

/// Run a full batch build.
pub fn run(opts: &BuildOptions) -> Result<()> {
    let prepared = prepare(opts)?;

    preflight::check_handler_tools(&prepared.catalog)?;
    stage::check_tmp_path(&prepared.paths.tmppath)?;

    // The staging area exists from here on; wipe it on every exit path.
    let tmppath = prepared.paths.tmppath.clone();
    let result = execute(prepared);
    if let Err(err) = stage::cleanup(&tmppath) {
        eprintln!("[build] warning: staging cleanup failed: {:#}", err);
    }
    result
}

fn execute(prepared: Prepared) -> Result<()> {
    let Prepared {
        catalog,
        flash,
        paths,
    } = prepared;

    println!(
        "[build] staging '{}' under '{}'",
        paths.rootpath.display(),
        paths.tmppath.display()
    );
    let mounts = MountSet::collect(&catalog, &paths.rootpath, &paths.tmppath)?;

    fs::create_dir_all(&paths.outputpath).with_context(|| {
        format!(
            "creating output directory '{}'",
            paths.outputpath.display()
        )
    })?;

    let ctx = BuildContext {
        paths,
        catalog,
        flash,
        mounts,
    };

    for image in ctx.catalog().images() {
        image
            .handler
            .setup(&ctx, image)
            .with_context(|| format!("setup failed for image '{}'", image.file))?;
    }

    let mut scheduler = Scheduler::new(&ctx);
    scheduler.generate_all()?;

    let manifest_path = manifest::write_manifest(&ctx)?;
    println!("[build] wrote manifest '{}'", manifest_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn options(temp: &TempDir, config: &str) -> BuildOptions {
        let config_path = temp.path().join("build.toml");
        write(&config_path, config);
        BuildOptions {
            config: config_path,
            rootpath: Some(temp.path().join("root")),
            tmppath: Some(temp.path().join("tmp")),
            inputpath: Some(temp.path().join("input")),
            outputpath: Some(temp.path().join("images")),
        }
    }

    #[test]
    fn full_run_generates_artifacts_and_wipes_staging() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("root/etc/conf"), "conf");
        write(&temp.path().join("input/boot.bin"), "boot code");

        let opts = options(
            &temp,
            r#"
            [image."boot.img"]
            [image."boot.img".file]
            name = "boot.bin"

            [image."etc.tar"]
            mountpoint = "etc"
            [image."etc.tar".tar]
            "#,
        );

        run(&opts).unwrap();

        assert!(temp.path().join("images/boot.img").is_file());
        assert!(temp.path().join("images/etc.tar").is_file());
        assert!(temp.path().join("images/build-manifest.json").is_file());
        // Staging area wiped but kept.
        assert_eq!(
            fs::read_dir(temp.path().join("tmp")).unwrap().count(),
            0
        );
    }

    #[test]
    fn dangling_reference_fails_before_staging() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("root/etc/conf"), "conf");

        let opts = options(
            &temp,
            r#"
            [image."disk.img"]
            [image."disk.img".hdimage]
            [image."disk.img".partition.root]
            image = "missing.img"
            "#,
        );

        let err = run(&opts).unwrap_err();
        assert!(err.to_string().contains("no rule to generate"));
        assert!(!temp.path().join("tmp").exists());
    }

    #[test]
    fn populated_staging_directory_aborts_the_run() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("root/etc/conf"), "conf");
        write(&temp.path().join("tmp/leftover"), "x");

        let opts = options(
            &temp,
            r#"
            [image."etc.tar"]
            mountpoint = "etc"
            [image."etc.tar".tar]
            "#,
        );

        let err = run(&opts).unwrap_err();
        assert!(err.to_string().contains("not empty"));
        // The pre-existing content is untouched.
        assert!(temp.path().join("tmp/leftover").is_file());
    }

    #[test]
    fn check_validates_without_touching_the_filesystem() {
        let temp = TempDir::new().unwrap();

        let opts = options(
            &temp,
            r#"
            [image."etc.tar"]
            mountpoint = "etc"
            [image."etc.tar".tar]
            "#,
        );

        check(&opts).unwrap();
        assert!(!temp.path().join("tmp").exists());
        assert!(!temp.path().join("images").exists());
    }

    #[test]
    fn paths_resolve_from_config_section_when_flags_are_absent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("build.toml");
        write(
            &config_path,
            r#"
            [config]
            rootpath = "fs/root"
            outputpath = "artifacts"

            [image."all.tar"]
            [image."all.tar".tar]
            "#,
        );

        let root = config::load_config(&config_path).unwrap();
        let paths = resolve_paths(
            &root,
            &BuildOptions {
                config: config_path,
                tmppath: Some(PathBuf::from("override-tmp")),
                ..Default::default()
            },
        );

        assert_eq!(paths.rootpath, PathBuf::from("fs/root"));
        assert_eq!(paths.outputpath, PathBuf::from("artifacts"));
        assert_eq!(paths.tmppath, PathBuf::from("override-tmp"));
        assert_eq!(paths.inputpath, PathBuf::from("input"));
    }
}
