//! `load_file` and `save_file`: raw bytes from and to the filesystem.
//!
//! Both block on I/O and therefore run detached. Neither touches the
//! filesystem during type inference. A path of `-` means stdin/stdout.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::chunk::ByteChunk;

use crate::adapter::{Describe, Source, SourceFn, Stream, StreamFn};
use crate::control::ControlHandle;
use crate::error::OpError;
use crate::registry::{OperatorSpec, Registry};
use crate::stream::Generator;
use crate::traits::{BoxedOperator, Location};

fn default_chunk_size() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFile {
    pub path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl LoadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: default_chunk_size(),
        }
    }

    pub fn boxed(self) -> BoxedOperator {
        Source::boxed(self)
    }
}

impl Describe for LoadFile {
    fn name(&self) -> String {
        "load_file".into()
    }

    fn location(&self) -> Location {
        Location::Local
    }

    fn detached(&self) -> bool {
        true
    }

    fn input_independent(&self) -> bool {
        true
    }

    fn config(&self) -> Result<Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl SourceFn for LoadFile {
    type Output = ByteChunk;

    fn produce(&self, ctrl: ControlHandle) -> Result<Generator<ByteChunk>, OpError> {
        let mut reader: Box<dyn Read + Send> = if self.path.as_os_str() == "-" {
            Box::new(io::stdin())
        } else {
            let file = File::open(&self.path).map_err(|e| {
                OpError::exec("load_file", format!("failed to open {}: {e}", self.path.display()))
            })?;
            Box::new(file)
        };
        tracing::debug!(path = %self.path.display(), "opened input file");
        let chunk_size = self.chunk_size.max(1);
        let path = self.path.clone();
        Ok(Box::new(std::iter::from_fn(move || {
            let mut buf = vec![0u8; chunk_size];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => return None,
                    Ok(n) => {
                        buf.truncate(n);
                        return Some(ByteChunk::from(buf));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        ctrl.abort(OpError::exec(
                            "load_file",
                            format!("failed to read {}: {e}", path.display()),
                        ));
                        return None;
                    }
                }
            }
        })))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    pub path: PathBuf,
    #[serde(default)]
    pub append: bool,
}

impl SaveFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: false,
        }
    }

    pub fn boxed(self) -> BoxedOperator {
        Stream::boxed(self)
    }

    fn open(&self) -> Result<Box<dyn Write + Send>, OpError> {
        if self.path.as_os_str() == "-" {
            return Ok(Box::new(io::stdout()));
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .map_err(|e| {
                OpError::exec("save_file", format!("failed to open {}: {e}", self.path.display()))
            })?;
        Ok(Box::new(file))
    }
}

impl Describe for SaveFile {
    fn name(&self) -> String {
        "save_file".into()
    }

    fn location(&self) -> Location {
        Location::Local
    }

    fn detached(&self) -> bool {
        true
    }

    fn config(&self) -> Result<Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl StreamFn for SaveFile {
    type Input = ByteChunk;
    type Output = ();

    fn transform(
        &self,
        mut input: Generator<ByteChunk>,
        ctrl: ControlHandle,
    ) -> Result<Generator<()>, OpError> {
        let mut writer = Some(BufWriter::new(self.open()?));
        let path = self.path.clone();
        Ok(Box::new(std::iter::from_fn(move || {
            let out = writer.as_mut()?;
            let result = match input.next() {
                Some(chunk) => out.write_all(chunk.as_bytes()).map(|()| true),
                None => out.flush().map(|()| false),
            };
            match result {
                Ok(true) => Some(()),
                Ok(false) => {
                    writer = None;
                    None
                }
                Err(e) => {
                    ctrl.abort(OpError::exec(
                        "save_file",
                        format!("failed to write {}: {e}", path.display()),
                    ));
                    writer = None;
                    None
                }
            }
        })))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("load_file", |spec: &OperatorSpec| {
        Ok(spec.parse::<LoadFile>()?.boxed())
    });
    registry.register("save_file", |spec: &OperatorSpec| {
        Ok(spec.parse::<SaveFile>()?.boxed())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlPlane, LocalControlPlane};
    use crate::stream::{generator, OperatorInput, OperatorOutput};
    use crate::traits::{Operator, OperatorExt};
    use sluice_core::kind::BatchKind;

    #[test]
    fn type_inference_does_not_open_files() {
        let load = LoadFile::new("/definitely/not/here").boxed();
        assert_eq!(load.infer_type(BatchKind::Void).ok(), Some(BatchKind::Bytes));
        assert!(load.detached());
        assert_eq!(load.location(), Location::Local);

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let save = SaveFile::new(&target).boxed();
        assert!(save.infer_signature().sink);
        assert!(!target.exists());
    }

    #[test]
    fn missing_input_file_fails_instantiation() {
        let load = LoadFile::new("/definitely/not/here").boxed();
        let err = load
            .instantiate(OperatorInput::Void, LocalControlPlane::shared("load_file"))
            .unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }

    #[test]
    fn copies_bytes_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        let dst = dir.path().join("out.txt");
        std::fs::write(&src, b"hello, world").unwrap();

        let ctrl = LocalControlPlane::shared("load_file | save_file");
        let load = LoadFile {
            path: src,
            chunk_size: 5,
        }
        .boxed();
        let OperatorOutput::Bytes(chunks) = load.instantiate(OperatorInput::Void, ctrl.clone()).unwrap() else {
            panic!("expected bytes");
        };
        let chunks: Vec<ByteChunk> = chunks.collect();
        assert_eq!(chunks.len(), 3);

        let save = SaveFile::new(&dst).boxed();
        let OperatorOutput::Void(steps) = save
            .instantiate(OperatorInput::Bytes(generator(chunks.into_iter())), ctrl.clone())
            .unwrap()
        else {
            panic!("expected void");
        };
        assert_eq!(steps.count(), 3);
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello, world");
        assert!(ctrl.take_abort().is_none());
    }
}
