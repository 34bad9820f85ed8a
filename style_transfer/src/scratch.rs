use std::{
    io,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

const INPUT_FILE: &str = "input.jpg";
const OUTPUT_FILE: &str = "output.jpg";

/// Private working directory for a single request. Removed on drop.
#[derive(Debug)]
pub struct RequestScratch {
    dir: TempDir,
}

impl RequestScratch {
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("style-transfer-");
            builder
        };
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join(INPUT_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_FILE)
    }

    pub fn save_input(&self, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.input_path(), data)
    }

    pub fn save_output(&self, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.output_path(), data)
    }
}
