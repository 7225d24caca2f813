//! `from-file`: manifests to InferenceRequest NDJSON

use anyhow::{Context, Result};
use dataset_lib::collector::requests_from_manifest;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use crate::output::print_success;

/// Parse a (multi-document) manifest and write one NDJSON line per object
///
/// `-` reads from stdin. Without `out`, lines go to stdout; otherwise they
/// are appended to the file.
pub fn from_file(path: &Path, out: Option<&Path>) -> Result<()> {
    let yaml = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read manifest from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    let requests = requests_from_manifest(&yaml)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    debug!(objects = requests.len(), "Parsed manifest");

    let mut lines = String::new();
    for request in &requests {
        lines.push_str(&request.to_ndjson()?);
        lines.push('\n');
    }

    match out {
        Some(out) => {
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(out)
                .with_context(|| format!("Failed to open {}", out.display()))?;
            file.write_all(lines.as_bytes())?;
            print_success(&format!(
                "Appended {} request(s) to {}",
                requests.len(),
                out.display()
            ));
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(lines.as_bytes())?;
            stdout.flush()?;
        }
    }

    Ok(())
}
