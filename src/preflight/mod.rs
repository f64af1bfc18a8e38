//! Preflight checks for host tool availability.
//!
//! External-tool handlers fail mid-build with cryptic errors when their tool
//! is missing; checking up front turns that into one readable report before
//! any staging work starts.

use anyhow::{bail, Result};

use crate::image::catalog::Catalog;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is `(command_name, package_name)`; all missing tools are
/// reported together.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        bail!("missing required host tools:\n{}", missing.join("\n"));
    }
    Ok(())
}

/// Check the tools required by every handler selected in the catalog.
pub fn check_handler_tools(catalog: &Catalog) -> Result<()> {
    let mut tools: Vec<(&str, &str)> = Vec::new();
    for image in catalog.images() {
        for tool in image.handler.required_tools() {
            if !tools.contains(tool) {
                tools.push(*tool);
            }
        }
    }
    check_required_tools(&tools)
}
