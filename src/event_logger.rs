//! Stdout event writer and the tracing layer that feeds it.

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use std::fmt::Write as _;
use std::io::Write;
use std::sync::Mutex;

use crate::api::{ChunkData, Compressor, Event, LogLevel, OutputType, ResultData, Stage};
use crate::AgentResult;

/// Single writer of protocol lines. Log events are dropped unless printing
/// is enabled; every other event is always written.
pub struct EventLogger {
    print_logs: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl EventLogger {
    pub fn stdout(print_logs: bool) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), print_logs)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, print_logs: bool) -> Self {
        Self {
            print_logs,
            out: Mutex::new(out),
        }
    }

    pub fn prints_logs(&self) -> bool {
        self.print_logs
    }

    pub fn emit(&self, event: &Event) -> AgentResult<()> {
        if matches!(event, Event::Log(_)) && !self.prints_logs() {
            return Ok(());
        }
        let mut line = event.to_line()?;
        line.push('\n');
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        out.write_all(line.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    pub fn progress(&self, stage: Stage) -> AgentResult<()> {
        self.emit(&Event::progress(stage))
    }

    pub fn result(
        &self,
        result_type: OutputType,
        file: &str,
        file_size_in_bytes: u64,
        checksum: &str,
        compressor_type: Compressor,
        chunks: Vec<ChunkData>,
    ) -> AgentResult<()> {
        self.emit(&Event::Result(ResultData {
            time: OffsetDateTime::now_utc(),
            result_type,
            file: file.to_string(),
            file_size_in_bytes,
            checksum: checksum.to_string(),
            compressor_type,
            chunks,
        }))
    }

    pub fn log(&self, level: LogLevel, msg: impl Into<String>) -> AgentResult<()> {
        self.emit(&Event::log(level, msg))
    }

    pub fn error(&self, reason: impl Into<String>) -> AgentResult<()> {
        self.emit(&Event::error(reason))
    }
}

/// Mirrors tracing events at DEBUG and above onto the stdout protocol as
/// `log` events.
pub struct EventLayer {
    logger: std::sync::Arc<EventLogger>,
}

impl EventLayer {
    pub fn new(logger: std::sync::Arc<EventLogger>) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for EventLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            Level::INFO => LogLevel::Info,
            Level::DEBUG => LogLevel::Debug,
            Level::TRACE => return,
        };
        if !self.logger.prints_logs() {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        // Nowhere left to report a failed stdout write.
        let _ = self.logger.log(level, visitor.finish());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SharedBuffer;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn logger(print_logs: bool) -> (Arc<EventLogger>, SharedBuffer) {
        let buf = SharedBuffer::default();
        let logger = Arc::new(EventLogger::with_writer(Box::new(buf.clone()), print_logs));
        (logger, buf)
    }

    #[test]
    fn log_events_are_suppressed_unless_enabled() {
        let (logger, buf) = logger(false);
        logger.log(LogLevel::Info, "hidden").expect("log");
        logger.error("shown").expect("error");
        let events = buf.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "error");

        let (logger, buf) = self::logger(true);
        logger.log(LogLevel::Info, "visible").expect("log");
        assert_eq!(buf.events()[0].kind(), "log");
    }

    #[test]
    fn every_line_is_a_complete_event() {
        let (logger, buf) = logger(true);
        std::thread::scope(|s| {
            for i in 0..8 {
                let logger = logger.clone();
                s.spawn(move || {
                    for j in 0..25 {
                        logger
                            .log(LogLevel::Debug, format!("worker {i} line {j}"))
                            .expect("log");
                    }
                });
            }
        });
        assert_eq!(buf.events().len(), 200);
    }

    #[test]
    fn layer_forwards_tracing_events() {
        let (logger, buf) = logger(true);
        let subscriber = tracing_subscriber::registry().with(EventLayer::new(logger));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("default {} will be used", "jfr");
            tracing::info!(pid = 7, "attached");
            tracing::trace!("dropped");
        });
        let events = buf.events();
        assert_eq!(events.len(), 2);
        let Event::Log(first) = &events[0] else {
            panic!("expected log event");
        };
        assert_eq!(first.level, LogLevel::Warn);
        assert_eq!(first.msg, "default jfr will be used");
        let Event::Log(second) = &events[1] else {
            panic!("expected log event");
        };
        assert_eq!(second.msg, "attached pid=7");
    }
}
