//! Binary buffer files with rollover at a byte ceiling.
//!
//! Appends are 4-byte aligned and serialized by one lock, so each array
//! lands contiguously in exactly one file. When an array would push the
//! current file past the ceiling a new file is opened: `<base>.bin`, then
//! `<base>_1.bin`, `<base>_2.bin`, and so on. Byte lengths are only known
//! once every writer is done, at [`MultiBufferWriter::finish`].

use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};

const ALIGNMENT: u64 = 4;

/// Where an appended array landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlice {
    pub buffer: usize,
    pub offset: u64,
}

/// A closed buffer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferFile {
    /// File name relative to the document.
    pub uri: String,
    pub path: PathBuf,
    pub byte_length: u64,
}

struct OpenBuffer {
    uri: String,
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
}

#[derive(Default)]
struct WriterState {
    buffers: Vec<OpenBuffer>,
    finished: bool,
}

/// Shared, append-only writer over a growing list of buffer files.
pub struct MultiBufferWriter {
    dir: PathBuf,
    base_name: String,
    ceiling: u64,
    state: Mutex<WriterState>,
}

impl MultiBufferWriter {
    pub fn new(dir: impl Into<PathBuf>, base_name: impl Into<String>, ceiling: u64) -> Result<Self> {
        if ceiling < ALIGNMENT {
            return Err(ExportError::Configuration(format!(
                "buffer ceiling {} is below the {}-byte alignment",
                ceiling, ALIGNMENT
            )));
        }
        Ok(Self {
            dir: dir.into(),
            base_name: base_name.into(),
            ceiling,
            state: Mutex::new(WriterState::default()),
        })
    }

    /// File name of buffer `index`.
    pub fn file_name(base_name: &str, index: usize) -> String {
        if index == 0 {
            format!("{}.bin", base_name)
        } else {
            format!("{}_{}.bin", base_name, index)
        }
    }

    pub fn append_f32(&self, values: &[f32]) -> Result<BufferSlice> {
        self.append(bytemuck::cast_slice(values))
    }

    pub fn append_u32(&self, values: &[u32]) -> Result<BufferSlice> {
        self.append(bytemuck::cast_slice(values))
    }

    /// Append `bytes` as one contiguous, 4-byte aligned run.
    pub fn append(&self, bytes: &[u8]) -> Result<BufferSlice> {
        let needed = bytes.len() as u64;
        if needed > self.ceiling {
            return Err(ExportError::Configuration(format!(
                "array of {} bytes exceeds the buffer ceiling of {} bytes",
                needed, self.ceiling
            )));
        }

        let mut state = self.state.lock();
        if state.finished {
            return Err(ExportError::DataIntegrity(
                "append to a finished buffer writer".to_string(),
            ));
        }

        let must_roll = match state.buffers.last() {
            None => true,
            Some(current) => {
                current.len > 0 && current.len + padding(current.len) + needed > self.ceiling
            }
        };
        if must_roll {
            let index = state.buffers.len();
            let buffer = self.open_buffer(index)?;
            if index > 0 {
                log::debug!(
                    "[assemble] buffer {} reached {} bytes, rolling over to {}",
                    index - 1,
                    state.buffers[index - 1].len,
                    buffer.uri
                );
            }
            state.buffers.push(buffer);
        }

        let index = state.buffers.len() - 1;
        let Some(current) = state.buffers.last_mut() else {
            return Err(ExportError::DataIntegrity("no open buffer".to_string()));
        };
        let pad = padding(current.len);
        if pad > 0 {
            current.writer.write_all(&[0u8; ALIGNMENT as usize][..pad as usize])?;
            current.len += pad;
        }
        let offset = current.len;
        current.writer.write_all(bytes)?;
        current.len += needed;

        Ok(BufferSlice {
            buffer: index,
            offset,
        })
    }

    fn open_buffer(&self, index: usize) -> Result<OpenBuffer> {
        let uri = Self::file_name(&self.base_name, index);
        let path = self.dir.join(&uri);
        let writer = BufWriter::new(File::create(&path)?);
        Ok(OpenBuffer {
            uri,
            path,
            writer,
            len: 0,
        })
    }

    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Flush and close every file, returning their final byte lengths.
    pub fn finish(&self) -> Result<Vec<BufferFile>> {
        let mut state = self.state.lock();
        state.finished = true;
        let mut files = Vec::with_capacity(state.buffers.len());
        for buffer in state.buffers.iter_mut() {
            buffer.writer.flush()?;
            files.push(BufferFile {
                uri: buffer.uri.clone(),
                path: buffer.path.clone(),
                byte_length: buffer.len,
            });
        }
        Ok(files)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn padding(len: u64) -> u64 {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}
