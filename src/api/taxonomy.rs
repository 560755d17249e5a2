//! Closed sets shared by the agent and its clients.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;
use std::str::FromStr;

use crate::{AgentError, AgentResult};

macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($what:literal, $err:path) {
            $($variant:ident => $canon:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $canon),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AgentError;

            fn from_str(s: &str) -> AgentResult<Self> {
                match s.trim() {
                    $($canon $(| $alias)* => Ok($name::$variant),)+
                    other => Err($err(format!("unsupported {} {other:?}", $what))),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(D::Error::custom)
            }
        }

        impl clap::ValueEnum for $name {
            fn value_variants<'a>() -> &'a [Self] {
                Self::ALL
            }

            fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
                Some(match self {
                    $($name::$variant => clap::builder::PossibleValue::new($canon)$(.alias($alias))*),+
                })
            }
        }
    };
}

closed_set! {
    /// Language of the profiled workload.
    pub enum Language ("language", AgentError::BadArgument) {
        Java => "java",
        Go => "go",
        Python => "python",
        Ruby => "ruby",
        Node => "node",
        Clang => "clang",
        ClangPlusPlus => "clang++",
        Rust => "rust",
        Fake => "fake",
    }
}

closed_set! {
    /// External profiler driven by the agent.
    pub enum ProfilingTool ("profiling tool", AgentError::UnsupportedTool) {
        AsyncProfiler => "async-profiler",
        Jcmd => "jcmd",
        Pyspy => "pyspy",
        Bpf => "bpf",
        Btf => "btf",
        Perf => "perf",
        Rbspy => "rbspy",
        NodeDummy => "node-dummy",
        CargoFlame => "cargo-flame" | "cargo-flamegraph",
        Fake => "fake",
    }
}

closed_set! {
    pub enum OutputType ("output type", AgentError::UnsupportedOutput) {
        Flamegraph => "flamegraph",
        Speedscope => "speedscope",
        Jfr => "jfr",
        ThreadDump => "threaddump",
        HeapDump => "heapdump",
        HeapHistogram => "heaphistogram",
        Flat => "flat",
        Traces => "traces",
        Collapsed => "collapsed",
        Tree => "tree",
        Raw => "raw",
        HeapSnapshot => "heapsnapshot",
    }
}

closed_set! {
    /// Sampling event requested from profilers that support more than one.
    pub enum ProfilingEvent ("event type", AgentError::BadArgument) {
        Cpu => "cpu",
        Alloc => "alloc",
        Lock => "lock",
        CacheMisses => "cache-misses",
        Wall => "wall",
        Itimer => "itimer",
    }
}

closed_set! {
    pub enum Compressor ("compressor", AgentError::BadArgument) {
        None => "none",
        Snappy => "snappy",
        Gzip => "gzip",
        Lzo => "lzo",
        Zstd => "zstd",
    }
}

closed_set! {
    pub enum ContainerRuntime ("container runtime", AgentError::UnsupportedRuntime) {
        Crio => "cri-o" | "crio",
        Containerd => "containerd",
    }
}

closed_set! {
    pub enum LogLevel ("log level", AgentError::BadArgument) {
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
    }
}

impl Compressor {
    /// Suffix appended to a compressed artifact, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Snappy => ".snappy",
            Self::Gzip => ".gz",
            Self::Lzo => ".lzo",
            Self::Zstd => ".zst",
        }
    }
}

impl ContainerRuntime {
    pub fn default_path(self) -> &'static str {
        match self {
            Self::Crio => "/var/lib/containers/storage",
            Self::Containerd => "/run/containerd",
        }
    }

    /// Prefix Kubernetes puts in front of container ids of this runtime.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Crio => "cri-o://",
            Self::Containerd => "containerd://",
        }
    }
}

impl OutputType {
    /// Outputs large enough to be gzip-split into chunks.
    pub fn is_heap_artifact(self) -> bool {
        matches!(self, Self::HeapDump | Self::HeapSnapshot)
    }
}

impl Language {
    pub fn upper(self) -> String {
        self.as_str().to_uppercase()
    }
}
