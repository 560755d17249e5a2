//! Cross-validity tables and artifact naming.

use std::path::{Path, PathBuf};

use super::{Language, OutputType, ProfilingTool};

/// Filename prefix carried by every artifact the agent writes.
pub const PROFILING_PREFIX: &str = "agent-";

/// Tools that can profile `language`; the first entry is the default.
pub fn tools_for(language: Language) -> &'static [ProfilingTool] {
    use ProfilingTool::*;
    match language {
        Language::Java => &[AsyncProfiler, Jcmd],
        Language::Python => &[Pyspy],
        Language::Go => &[Bpf, Btf],
        Language::Node => &[Bpf, Perf, NodeDummy],
        Language::Clang | Language::ClangPlusPlus => &[Perf, Bpf],
        Language::Ruby => &[Rbspy],
        Language::Rust => &[CargoFlame, Perf],
        Language::Fake => &[Fake],
    }
}

/// Outputs `tool` can produce; the first entry is the default.
pub fn outputs_for(tool: ProfilingTool) -> &'static [OutputType] {
    use OutputType::*;
    match tool {
        ProfilingTool::AsyncProfiler => &[Flamegraph, Jfr, Flat, Traces, Collapsed, Tree],
        ProfilingTool::Jcmd => &[Jfr, ThreadDump, HeapDump, HeapHistogram],
        ProfilingTool::Pyspy => &[Flamegraph, Speedscope, ThreadDump],
        ProfilingTool::Bpf
        | ProfilingTool::Btf
        | ProfilingTool::Perf
        | ProfilingTool::Rbspy
        | ProfilingTool::CargoFlame => &[Flamegraph],
        ProfilingTool::NodeDummy => &[HeapSnapshot],
        ProfilingTool::Fake => OutputType::ALL,
    }
}

pub fn is_tool_supported(language: Language, tool: ProfilingTool) -> bool {
    tools_for(language).contains(&tool)
}

pub fn is_output_supported(tool: ProfilingTool, output: OutputType) -> bool {
    outputs_for(tool).contains(&output)
}

pub fn default_tool(language: Language) -> ProfilingTool {
    tools_for(language)[0]
}

pub fn default_output(tool: ProfilingTool) -> OutputType {
    outputs_for(tool)[0]
}

/// Tool picked when the caller names a language and output but no tool.
pub fn tool_for(language: Language, output: OutputType) -> ProfilingTool {
    use OutputType::*;
    match (language, output) {
        (Language::Java, Jfr | ThreadDump | HeapDump | HeapHistogram) => ProfilingTool::Jcmd,
        (Language::Java, _) => ProfilingTool::AsyncProfiler,
        (Language::Python, _) => ProfilingTool::Pyspy,
        (Language::Go, _) => ProfilingTool::Bpf,
        (Language::Rust, _) => ProfilingTool::CargoFlame,
        (Language::Clang | Language::ClangPlusPlus, _) => ProfilingTool::Bpf,
        (Language::Ruby, _) => ProfilingTool::Rbspy,
        (Language::Node, HeapSnapshot | HeapDump) => ProfilingTool::NodeDummy,
        (Language::Node, _) => ProfilingTool::Bpf,
        (Language::Fake, _) => ProfilingTool::Fake,
    }
}

/// Artifact extension, including the leading dot.
pub fn extension(tool: ProfilingTool, output: OutputType) -> &'static str {
    use OutputType::*;
    match tool {
        ProfilingTool::Jcmd | ProfilingTool::AsyncProfiler => match output {
            Jfr => ".jfr",
            ThreadDump | HeapHistogram | Flat | Traces | Collapsed | Speedscope | Raw => ".txt",
            HeapDump => ".hprof",
            _ => ".html",
        },
        ProfilingTool::Pyspy => match output {
            Speedscope => ".json",
            ThreadDump | Raw => ".txt",
            _ => ".svg",
        },
        ProfilingTool::Bpf | ProfilingTool::Btf | ProfilingTool::Perf => match output {
            Speedscope | Raw => ".txt",
            _ => ".svg",
        },
        ProfilingTool::NodeDummy if output == HeapSnapshot => ".heapsnapshot",
        _ => ".svg",
    }
}

/// `<tmp>/<prefix><output>-<pid>-<iteration><ext>`.
pub fn result_file_name(
    tmp_dir: &Path,
    tool: ProfilingTool,
    output: OutputType,
    pid: &str,
    iteration: u32,
) -> PathBuf {
    tmp_dir.join(format!(
        "{PROFILING_PREFIX}{output}-{pid}-{iteration}{}",
        extension(tool, output)
    ))
}
