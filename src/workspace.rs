use std::path::Path;
use tempfile::TempDir;

/// Scratch directory owned by exactly one run.
///
/// Everything a run writes lives here. The directory is removed by
/// [`RunWorkspace::release`] or, on any early exit, when the value drops.
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    pub fn create(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("run-").tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn release(self) -> std::io::Result<()> {
        self.dir.close()
    }
}
