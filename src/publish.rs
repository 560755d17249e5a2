//! Compressing artifacts and announcing them as `result` events.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{ChunkData, Compressor, OutputType};
use crate::event_logger::EventLogger;
use crate::exec::{CommandSpec, Executor};
use crate::{AgentError, AgentResult, compress, fsutil};

pub struct Publisher {
    executor: Arc<dyn Executor>,
    logger: Arc<EventLogger>,
    gzip: PathBuf,
    split: PathBuf,
}

impl Publisher {
    pub fn new(
        executor: Arc<dyn Executor>,
        logger: Arc<EventLogger>,
        gzip: impl Into<PathBuf>,
        split: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            logger,
            gzip: gzip.into(),
            split: split.into(),
        }
    }

    /// Compresses `file` into `<file><ext>` and emits a result event for the
    /// compressed file. With no compressor the file is announced as is.
    pub fn publish(
        &self,
        compressor: Compressor,
        file: &Path,
        output_type: OutputType,
    ) -> AgentResult<PathBuf> {
        let input = File::open(file).map_err(|e| {
            AgentError::MissingInput(format!("artifact {}: {e}", file.display()))
        })?;

        let target = if compressor == Compressor::None {
            file.to_path_buf()
        } else {
            let target = append_extension(file, compressor.extension());
            let out = File::create(&target).map_err(|e| {
                AgentError::PublishFailure(format!("cannot create {}: {e}", target.display()))
            })?;
            let mut writer = BufWriter::new(out);
            compress::encode(compressor, &mut BufReader::new(input), &mut writer).map_err(
                |e| AgentError::PublishFailure(format!("compressing {}: {e}", file.display())),
            )?;
            writer.flush()?;
            target
        };

        let size = fsutil::file_size(&target)?;
        let checksum = fsutil::file_checksum(&target)?;
        self.logger.result(
            output_type,
            &target.to_string_lossy(),
            size,
            &checksum,
            compressor,
            Vec::new(),
        )?;
        Ok(target)
    }

    /// Gzips `file` with the system gzip, splits the result into
    /// `chunk_size` pieces and emits one result event listing the chunks.
    pub fn publish_split(
        &self,
        file: &Path,
        chunk_size: &str,
        output_type: OutputType,
    ) -> AgentResult<PathBuf> {
        if !file.is_file() {
            return Err(AgentError::MissingInput(format!(
                "artifact {} does not exist",
                file.display()
            )));
        }
        let chunk_size = chunk_size.trim();
        if chunk_size.is_empty() {
            return Err(AgentError::BadArgument("chunk size must not be empty".to_string()));
        }

        let gz = append_extension(file, ".gz");
        self.run_step(
            CommandSpec::new(&self.gzip)
                .arg("-3")
                .arg(file.to_string_lossy()),
        )?;
        if !gz.is_file() {
            return Err(AgentError::PublishFailure(format!(
                "gzip did not produce {}",
                gz.display()
            )));
        }

        let prefix = format!("{}.", gz.to_string_lossy());
        self.run_step(
            CommandSpec::new(&self.split)
                .args(["-b", chunk_size, "-e", "--numeric-suffixes"])
                .arg(gz.to_string_lossy())
                .arg(prefix),
        )?;
        std::fs::remove_file(&gz)?;

        let dir = gz.parent().unwrap_or(Path::new("."));
        let pattern = match gz.file_name() {
            Some(name) => format!("{}.*", globset_escape(&name.to_string_lossy())),
            None => {
                return Err(AgentError::PublishFailure(format!(
                    "bad artifact path {}",
                    gz.display()
                )));
            }
        };
        let parts = fsutil::find_matching_files(dir, &pattern)?;
        if parts.is_empty() {
            return Err(AgentError::PublishFailure(format!(
                "split produced no chunks for {}",
                gz.display()
            )));
        }

        let mut chunks = Vec::with_capacity(parts.len());
        let mut total = 0;
        for part in &parts {
            let size = fsutil::file_size(part)?;
            total += size;
            chunks.push(ChunkData {
                file: part.to_string_lossy().to_string(),
                file_size_in_bytes: size,
                checksum: fsutil::file_checksum(part)?,
            });
        }
        let checksum = fsutil::concat_checksum(&parts)?;
        self.logger.result(
            output_type,
            &gz.to_string_lossy(),
            total,
            &checksum,
            Compressor::Gzip,
            chunks,
        )?;
        Ok(gz)
    }

    fn run_step(&self, spec: CommandSpec) -> AgentResult<()> {
        let out = self.executor.run(&spec)?;
        if !out.success() {
            return Err(AgentError::PublishFailure(format!(
                "{} failed ({:?}): {}",
                spec.command_line(),
                out.code,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

fn append_extension(file: &Path, ext: &str) -> PathBuf {
    let mut s = file.as_os_str().to_os_string();
    s.push(ext);
    PathBuf::from(s)
}

fn globset_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
