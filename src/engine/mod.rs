pub mod external;
pub mod types;

use crate::error::NormalizeError;
use std::path::{Path, PathBuf};

pub use types::{DownsamplePolicy, ImageParams, RasterizeIn, RewriteIn, ToolDiag};

/// The external programs the pipeline drives. Every call blocks until the
/// underlying process exits or its timeout expires.
pub trait Engine {
    fn doctor(&self) -> Vec<ToolDiag>;
    /// Raw `pdfimages -list` style listing for `input`.
    fn list_images(&self, input: &Path) -> Result<String, NormalizeError>;
    fn rewrite(&self, req: &RewriteIn) -> Result<(), NormalizeError>;
    fn rasterize(&self, req: &RasterizeIn) -> Result<(), NormalizeError>;
    fn assemble(&self, pages: &[PathBuf], output: &Path) -> Result<(), NormalizeError>;
}
