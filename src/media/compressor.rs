//! External JPEG encoders, invoked as opaque subprocesses.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::environment::CompressorSettings;

/// How to invoke an encoder that turns `input` into a JPEG at `output`.
/// The only contract is: exit status zero means `output` exists.
pub trait ImageCompressor: Send + Sync {
    fn program(&self) -> &Path;
    fn args(&self, input: &Path, output: &Path, quality: u8) -> Vec<OsString>;
}

/// jpegli's `cjpegli`.
pub struct Cjpegli {
    pub path: PathBuf,
}

/// mozjpeg's `cjpeg`.
pub struct Mozjpeg {
    pub path: PathBuf,
}

impl ImageCompressor for Cjpegli {
    fn program(&self) -> &Path {
        &self.path
    }

    fn args(&self, input: &Path, output: &Path, quality: u8) -> Vec<OsString> {
        vec![
            "-v".into(),
            "-q".into(),
            quality.to_string().into(),
            input.into(),
            output.into(),
        ]
    }
}

impl ImageCompressor for Mozjpeg {
    fn program(&self) -> &Path {
        &self.path
    }

    fn args(&self, input: &Path, output: &Path, quality: u8) -> Vec<OsString> {
        vec![
            "-outfile".into(),
            output.into(),
            "-quality".into(),
            quality.to_string().into(),
            input.into(),
        ]
    }
}

pub fn compressor_from_settings(settings: &CompressorSettings) -> Box<dyn ImageCompressor> {
    match settings {
        CompressorSettings::Cjpegli(path) => Box::new(Cjpegli { path: path.clone() }),
        CompressorSettings::Mozjpeg(path) => Box::new(Mozjpeg { path: path.clone() }),
    }
}
