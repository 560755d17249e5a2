//! Folded stacks to SVG through the FlameGraph perl script.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::Language;
use crate::exec::{CommandSpec, Executor};
use crate::job::ProfilingJob;
use crate::{AgentError, AgentResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlameGraphOptions {
    pub path: PathBuf,
    pub title: String,
    pub subtitle: Option<String>,
    pub width: u32,
    pub height: u32,
    pub min_width: Option<String>,
    pub font_type: String,
    pub font_size: u32,
    pub count_name: Option<String>,
    pub name_type: Option<String>,
    pub colors: Option<String>,
    pub bg_colors: Option<String>,
    pub hash: bool,
    pub reverse: bool,
    pub inverted: bool,
    pub flame_chart: bool,
    pub negate: bool,
}

impl FlameGraphOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: "CPU Flamegraph".to_string(),
            subtitle: None,
            width: 1800,
            height: 16,
            min_width: None,
            font_type: "Verdana".to_string(),
            font_size: 12,
            count_name: None,
            name_type: None,
            colors: None,
            bg_colors: None,
            hash: false,
            reverse: false,
            inverted: false,
            flame_chart: false,
            negate: false,
        }
    }

    /// Options for `job`: language title and palette, then any
    /// `flamegraph-*` additional arguments.
    pub fn for_job(script: impl Into<PathBuf>, job: &ProfilingJob) -> AgentResult<Self> {
        let mut opts = Self::new(script);
        opts.title = format!("{} - CPU Flamegraph", job.language.upper());
        opts.colors = palette(job.language).map(str::to_string);

        let arg = |key: &str| job.additional_argument(key);
        if let Some(v) = arg("flamegraph-width-in-pixels") {
            opts.width = numeric("flamegraph-width-in-pixels", v)?;
        }
        if let Some(v) = arg("flamegraph-height") {
            opts.height = numeric("flamegraph-height", v)?;
        }
        if let Some(v) = arg("flamegraph-min-width") {
            v.parse::<f64>().map_err(|_| {
                AgentError::BadArgument(format!("flamegraph-min-width must be numeric, got {v:?}"))
            })?;
            opts.min_width = Some(v.to_string());
        }
        if let Some(v) = arg("flamegraph-font-size") {
            opts.font_size = numeric("flamegraph-font-size", v)?;
        }
        if let Some(v) = arg("flamegraph-title") {
            opts.title = v.to_string();
        }
        if let Some(v) = arg("flamegraph-font-type") {
            opts.font_type = v.to_string();
        }
        opts.subtitle = arg("flamegraph-subtitle").map(str::to_string).or(opts.subtitle);
        opts.colors = arg("flamegraph-colors").map(str::to_string).or(opts.colors);
        opts.count_name = arg("flamegraph-count-name").map(str::to_string);
        opts.name_type = arg("flamegraph-name-type").map(str::to_string);
        opts.bg_colors = arg("flamegraph-bg-colors").map(str::to_string);
        opts.hash = flag(arg("flamegraph-hash"));
        opts.reverse = flag(arg("flamegraph-reverse"));
        opts.inverted = flag(arg("flamegraph-inverted"));
        opts.flame_chart = flag(arg("flamegraph-flame-chart"));
        opts.negate = flag(arg("flamegraph-negate"));
        Ok(opts)
    }

    pub fn with_colors(mut self, colors: &str) -> Self {
        self.colors = Some(colors.to_string());
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--title".to_string(),
            self.title.clone(),
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "--fonttype".to_string(),
            self.font_type.clone(),
            "--fontsize".to_string(),
            self.font_size.to_string(),
        ];
        let valued = [
            ("--subtitle", &self.subtitle),
            ("--minwidth", &self.min_width),
            ("--countname", &self.count_name),
            ("--nametype", &self.name_type),
            ("--colors", &self.colors),
            ("--bgcolors", &self.bg_colors),
        ];
        for (flag, value) in valued {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                args.push(flag.to_string());
                args.push(v.to_string());
            }
        }
        let switches = [
            ("--hash", self.hash),
            ("--reverse", self.reverse),
            ("--inverted", self.inverted),
            ("--flamechart", self.flame_chart),
            ("--negate", self.negate),
        ];
        args.extend(
            switches
                .into_iter()
                .filter(|(_, on)| *on)
                .map(|(flag, _)| flag.to_string()),
        );
        args
    }
}

pub fn palette(language: Language) -> Option<&'static str> {
    match language {
        Language::Node => Some("js"),
        Language::Java => Some("java"),
        Language::Clang | Language::ClangPlusPlus => Some("mem"),
        _ => None,
    }
}

fn numeric(key: &str, value: &str) -> AgentResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentError::BadArgument(format!("{key} must be numeric, got {value:?}")))
}

fn flag(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true" | "1" | "yes"))
}

pub struct FlameGraphRenderer {
    executor: Arc<dyn Executor>,
    options: FlameGraphOptions,
}

impl FlameGraphRenderer {
    pub fn new(executor: Arc<dyn Executor>, options: FlameGraphOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &FlameGraphOptions {
        &self.options
    }

    /// Renders folded stacks read from `input` into `output`.
    pub fn stack_samples(&self, input: &Path, output: &Path) -> AgentResult<()> {
        File::open(input).map_err(|e| {
            AgentError::MissingInput(format!("folded stacks {}: {e}", input.display()))
        })?;
        File::create(output).map_err(|e| {
            AgentError::RendererFailure(format!("cannot create {}: {e}", output.display()))
        })?;

        let spec = CommandSpec::new(&self.options.path)
            .args(self.options.args())
            .stdin_from(input)
            .stdout_to(output);
        let out = self.executor.run(&spec)?;
        if !out.success() {
            return Err(AgentError::RendererFailure(format!(
                "{} exited with {:?}: {}",
                self.options.path.display(),
                out.code,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}
