use crate::{
    config::{Config, RasterColorMode},
    engine::{Engine, RasterizeIn, RewriteIn},
    error::NormalizeError,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

static PAGE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^page-(\d+)\.png$").expect("static regex"));

#[derive(Debug, Clone)]
pub struct RebuildOutput {
    pub document: PathBuf,
    pub page_count: usize,
    /// Recoverable problems, e.g. a failed pre-normalization pass.
    pub warnings: Vec<String>,
}

/// Flattens every page of `input` to a bitmap at `target_dpi` and assembles
/// the bitmaps into a fresh document under `work`.
pub fn rebuild(
    cfg: &Config,
    engine: &dyn Engine,
    input: &Path,
    work: &Path,
    target_dpi: u32,
    color_mode: RasterColorMode,
) -> Result<RebuildOutput, NormalizeError> {
    let mut warnings = Vec::new();

    let source = if cfg.rewrite.prenormalize_before_raster {
        let pre = work.join("prenormalized.pdf");
        let req = RewriteIn::neutral(
            input.to_path_buf(),
            pre.clone(),
            &cfg.rewrite.compatibility_level,
        );
        match engine.rewrite(&req) {
            Ok(()) => pre,
            Err(e) => {
                warn!("pre-normalization failed, rasterizing original: {e}");
                warnings.push(format!("pre-normalization failed, rasterizing original: {e}"));
                input.to_path_buf()
            }
        }
    } else {
        input.to_path_buf()
    };

    let raster_dir = work.join("raster");
    std::fs::create_dir_all(&raster_dir)?;
    engine.rasterize(&RasterizeIn {
        input: source,
        output_prefix: raster_dir.join("page"),
        dpi: target_dpi,
        color_mode,
    })?;

    let pages = collect_pages(&raster_dir)?;
    if pages.is_empty() {
        return Err(NormalizeError::Rasterization {
            detail: format!(
                "rasterizer wrote no page images for {} (empty or unreadable document?)",
                input.display()
            ),
        });
    }
    info!("rasterized {} pages at {target_dpi} dpi", pages.len());

    let document = work.join("rebuilt.pdf");
    engine.assemble(&pages, &document)?;
    if !document.exists() {
        return Err(NormalizeError::tool(
            "img2pdf",
            format!("exited 0 but wrote no output: {}", document.display()),
        ));
    }

    Ok(RebuildOutput {
        document,
        page_count: pages.len(),
        warnings,
    })
}

/// Page bitmaps in `dir`, ordered by page number rather than by name.
/// `pdftoppm` zero-pads to the page count's width, so names alone do not sort.
pub fn collect_pages(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = PAGE_FILE.captures(name) {
            if let Ok(n) = caps[1].parse::<u32>() {
                pages.push((n, entry.path()));
            }
        }
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}
