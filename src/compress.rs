//! Streaming encode/decode over the supported compressors.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use std::io::{self, Read, Write};

use crate::api::Compressor;
use crate::{AgentError, AgentResult};

pub fn encode(kind: Compressor, input: &mut dyn Read, output: &mut dyn Write) -> AgentResult<()> {
    match kind {
        Compressor::None => {
            io::copy(input, output)?;
        }
        Compressor::Gzip => {
            let mut encoder = GzEncoder::new(output, Compression::default());
            io::copy(input, &mut encoder)?;
            encoder.finish()?;
        }
        Compressor::Snappy => {
            let mut encoder = snap::write::FrameEncoder::new(output);
            io::copy(input, &mut encoder)?;
            encoder.flush()?;
        }
        Compressor::Zstd => {
            zstd::stream::copy_encode(input, output, 0)?;
        }
        Compressor::Lzo => {
            let mut raw = Vec::new();
            input.read_to_end(&mut raw)?;
            let packed = lzokay_native::compress(&raw)
                .map_err(|e| AgentError::PublishFailure(format!("lzo encode: {e:?}")))?;
            // The block format does not carry the original length.
            output.write_all(&(raw.len() as u64).to_le_bytes())?;
            output.write_all(&packed)?;
        }
    }
    Ok(())
}

pub fn decode(kind: Compressor, input: &mut dyn Read, output: &mut dyn Write) -> AgentResult<()> {
    match kind {
        Compressor::None => {
            io::copy(input, output)?;
        }
        Compressor::Gzip => {
            io::copy(&mut GzDecoder::new(input), output)?;
        }
        Compressor::Snappy => {
            io::copy(&mut snap::read::FrameDecoder::new(input), output)?;
        }
        Compressor::Zstd => {
            zstd::stream::copy_decode(input, output)?;
        }
        Compressor::Lzo => {
            let mut len = [0u8; 8];
            input.read_exact(&mut len)?;
            let expected = usize::try_from(u64::from_le_bytes(len))
                .map_err(|_| AgentError::PublishFailure("lzo length overflow".to_string()))?;
            let mut packed = Vec::new();
            input.read_to_end(&mut packed)?;
            let raw = lzokay_native::decompress_all(&packed, Some(expected))
                .map_err(|e| AgentError::PublishFailure(format!("lzo decode: {e:?}")))?;
            output.write_all(&raw)?;
        }
    }
    Ok(())
}
