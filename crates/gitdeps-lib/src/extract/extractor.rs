use super::error::PackError;
use crate::utils::{append_suffix, remove_file_quiet};
use crate::verification::{ContentDigestVerifier, ContentHasher};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Suffix of partially written files. Anything carrying it is an artifact of
/// an interrupted run and may be deleted.
pub const INCOMING_FILE_SUFFIX: &str = ".incoming";

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// One blob to cut out of a pack, and every destination that receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    /// Absolute destination paths. The first one is written from the
    /// stream; the others are copies of it.
    pub names: Vec<PathBuf>,
    pub hash: String,
    pub min_pack_offset: u64,
    pub max_pack_offset: u64,
}

impl IncomingFile {
    fn len(&self) -> u64 {
        self.max_pack_offset - self.min_pack_offset
    }

    fn temp_path(name: &Path) -> PathBuf {
        append_suffix(name, INCOMING_FILE_SUFFIX)
    }
}

/// Extracts `files` from a gzip-compressed pack stream.
pub fn extract_files<R: Read>(compressed: R, files: &[IncomingFile]) -> Result<(), PackError> {
    extract_files_from_raw_stream(GzDecoder::new(compressed), files, None)
}

/// Extracts `files` from a decompressed pack stream. `files` must be sorted
/// by `min_pack_offset`. When `pack_hasher` is given, the whole stream is
/// consumed and fed to it, even past the last requested range.
pub fn extract_files_from_raw_stream<R: Read>(
    mut raw: R,
    files: &[IncomingFile],
    mut pack_hasher: Option<&mut ContentHasher>,
) -> Result<(), PackError> {
    let mut demuxer = PackDemuxer::new(files);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut pack_offset = 0u64;

    while !demuxer.is_complete() || pack_hasher.is_some() {
        let bytes_read = match raw.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(PackError::Read(e)),
        };
        let chunk = &buffer[..bytes_read];
        if let Some(hasher) = pack_hasher.as_mut() {
            hasher.update(chunk);
        }
        demuxer.process(pack_offset, chunk)?;
        pack_offset += bytes_read as u64;
    }

    // Ranges ending exactly at the end of the stream, including empty ones.
    demuxer.process(pack_offset, &[])?;
    if !demuxer.is_complete() {
        return Err(PackError::corrupt("Unexpected end of file"));
    }
    Ok(())
}

struct OutputFile {
    writer: BufWriter<File>,
    verifier: ContentDigestVerifier,
}

/// Routes chunks of a pack stream into the output files whose ranges they
/// overlap. Files in `[min_idx, opened)` have an incoming file on disk; any
/// of those left when the demuxer is dropped are deleted.
struct PackDemuxer<'a> {
    files: &'a [IncomingFile],
    outputs: Vec<Option<OutputFile>>,
    min_idx: usize,
    opened: usize,
}

impl<'a> PackDemuxer<'a> {
    fn new(files: &'a [IncomingFile]) -> Self {
        Self {
            files,
            outputs: files.iter().map(|_| None).collect(),
            min_idx: 0,
            opened: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.min_idx >= self.files.len()
    }

    fn process(&mut self, chunk_start: u64, chunk: &[u8]) -> Result<(), PackError> {
        let files = self.files;
        let chunk_end = chunk_start + chunk.len() as u64;

        let mut idx = self.min_idx;
        while idx < files.len() && files[idx].min_pack_offset <= chunk_end {
            let file = &files[idx];
            if idx == self.opened {
                self.open(idx)?;
            }

            let start = file.min_pack_offset.max(chunk_start);
            let end = file.max_pack_offset.min(chunk_end);
            if end > start
                && let Some(output) = self.outputs[idx].as_mut()
            {
                let slice = &chunk[(start - chunk_start) as usize..(end - chunk_start) as usize];
                output.verifier.update(slice);
                output
                    .writer
                    .write_all(slice)
                    .map_err(|e| PackError::filesystem("write", &file.names[0], e))?;
            }

            if idx == self.min_idx && file.max_pack_offset <= chunk_end {
                self.complete(idx)?;
                self.min_idx += 1;
            }
            idx += 1;
        }
        Ok(())
    }

    fn open(&mut self, idx: usize) -> Result<(), PackError> {
        let file = &self.files[idx];
        let primary = &file.names[0];
        if let Some(parent) = primary.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PackError::filesystem("create directory", parent, e))?;
        }

        let temp_path = IncomingFile::temp_path(primary);
        let handle = File::create(&temp_path)
            .map_err(|e| PackError::filesystem("create", &temp_path, e))?;
        self.opened = idx + 1;
        handle
            .set_len(file.len())
            .map_err(|e| PackError::filesystem("allocate", &temp_path, e))?;

        self.outputs[idx] = Some(OutputFile {
            writer: BufWriter::new(handle),
            verifier: ContentDigestVerifier::new(file.hash.clone()),
        });
        Ok(())
    }

    fn complete(&mut self, idx: usize) -> Result<(), PackError> {
        let file = &self.files[idx];
        let primary = &file.names[0];
        let temp_path = IncomingFile::temp_path(primary);

        let Some(output) = self.outputs[idx].take() else {
            return Err(PackError::corrupt(format!(
                "Output for {} was never opened",
                primary.display()
            )));
        };
        let OutputFile {
            mut writer,
            verifier,
        } = output;
        writer
            .flush()
            .map_err(|e| PackError::filesystem("write", &temp_path, e))?;
        drop(writer);

        verifier
            .verify(primary.display().to_string())
            .map_err(|e| PackError::corrupt(e.to_string()))?;

        for secondary in &file.names[1..] {
            if let Some(parent) = secondary.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PackError::filesystem("create directory", parent, e))?;
            }
            let secondary_temp = IncomingFile::temp_path(secondary);
            std::fs::copy(&temp_path, &secondary_temp)
                .map_err(|e| PackError::filesystem("copy", &secondary_temp, e))?;
            replace_file(&secondary_temp, secondary)?;
        }
        replace_file(&temp_path, primary)?;

        tracing::trace!(file = %primary.display(), copies = file.names.len() - 1, "Extracted file");
        Ok(())
    }
}

impl Drop for PackDemuxer<'_> {
    fn drop(&mut self) {
        for idx in self.min_idx..self.opened {
            self.outputs[idx] = None;
            for name in &self.files[idx].names {
                remove_file_quiet(&IncomingFile::temp_path(name));
            }
        }
    }
}

/// Moves `source` over `destination`. The destination is only deleted first
/// when the platform refuses to rename over it.
fn replace_file(source: &Path, destination: &Path) -> Result<(), PackError> {
    let Err(first_error) = std::fs::rename(source, destination) else {
        return Ok(());
    };
    tracing::trace!(
        file = %destination.display(),
        error = %first_error,
        "Rename failed, deleting destination first"
    );

    match std::fs::remove_file(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(PackError::filesystem("delete", destination, e)),
    }
    std::fs::rename(source, destination)
        .map_err(|e| PackError::filesystem("rename", source, e))
}
