//! Newline-delimited JSON events exchanged between agent and client.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{Compressor, LogLevel, OutputType};
use crate::AgentResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    Progress(ProgressData),
    Result(ResultData),
    Log(LogData),
    Error(ErrorData),
    Notice(NoticeData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Started,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResultData {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub result_type: OutputType,
    pub file: String,
    pub file_size_in_bytes: u64,
    pub checksum: String,
    pub compressor_type: Compressor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChunkData {
    pub file: String,
    pub file_size_in_bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub level: LogLevel,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeData {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub msg: String,
}

impl Event {
    pub fn progress(stage: Stage) -> Self {
        Self::Progress(ProgressData {
            time: OffsetDateTime::now_utc(),
            stage,
        })
    }

    pub fn log(level: LogLevel, msg: impl Into<String>) -> Self {
        Self::Log(LogData {
            time: OffsetDateTime::now_utc(),
            level,
            msg: msg.into(),
        })
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error(ErrorData {
            reason: reason.into(),
        })
    }

    /// Single JSON line, without the trailing newline.
    pub fn to_line(&self) -> AgentResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one line of agent output, dispatching on its `type`.
    pub fn parse(line: &str) -> AgentResult<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Result(_) => "result",
            Self::Log(_) => "log",
            Self::Error(_) => "error",
            Self::Notice(_) => "notice",
        }
    }
}
