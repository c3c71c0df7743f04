//! Console sink and its output template.
//!
//! Templates are plain text with `{Token}` or `{Token:format}` placeholders:
//!
//! | token        | renders                                         |
//! |--------------|-------------------------------------------------|
//! | `Timestamp`  | record time; format is a `chrono` strftime string |
//! | `Level`      | level; `u3` = `INF`, `w3` = `inf`, `u` = `INFO`, `w` = `info` |
//! | `Category`   | logger category                                 |
//! | `TraceId`    | trace id, empty when uncorrelated               |
//! | `SpanId`     | span id, empty when uncorrelated                |
//! | `ParentId`   | parent span id, empty when absent               |
//! | `Message`    | the message                                     |
//! | `Exception`  | exception text followed by a newline, or nothing |
//! | `NewLine`    | a line break                                    |
//!
//! `{{` and `}}` render literal braces.

use super::sink::LogSink;
use crate::models::{LogLevel, LogRecord};
use chrono::format::{Item, StrftimeItems};
use serde::{Serialize, Serializer};
use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// The default console template.
pub const DEFAULT_OUTPUT_TEMPLATE: &str =
    "[{Timestamp:%H:%M:%S} {Level:u3}] {TraceId} {SpanId} {Message}{NewLine}{Exception}";

/// Errors in an output template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A placeholder names an unknown token.
    #[error("unknown template token `{0}`")]
    UnknownToken(String),

    /// A token was given a format it does not support.
    #[error("unsupported format `{format}` for token `{token}`")]
    UnsupportedFormat {
        /// The token name.
        token: String,
        /// The rejected format.
        format: String,
    },

    /// A `{` was never closed.
    #[error("unclosed `{{` at byte {0}")]
    Unclosed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LevelFormat {
    Default,
    Upper,
    Lower,
    UpperShort,
    LowerShort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Timestamp(String),
    Level(LevelFormat),
    Category,
    TraceId,
    SpanId,
    ParentId,
    Message,
    Exception,
    NewLine,
}

/// A parsed console output template.
///
/// # Example
///
/// ```
/// use telemetry::logs::OutputTemplate;
/// use telemetry::models::{LogLevel, LogRecord};
///
/// let template: OutputTemplate = "{Level:u3} {Message}".parse().unwrap();
/// let record = LogRecord::new(LogLevel::Warn, "app", "disk almost full");
///
/// assert_eq!(template.render(&record), "WRN disk almost full");
/// assert!("{Bogus}".parse::<OutputTemplate>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl OutputTemplate {
    /// The template text as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders one record.
    #[must_use]
    pub fn render(&self, record: &LogRecord) -> String {
        let mut out = String::with_capacity(self.source.len() + record.message.len());
        let correlation = &record.correlation;

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Timestamp(format) => {
                    let _ = write!(out, "{}", record.timestamp.format(format));
                }
                Segment::Level(format) => out.push_str(&render_level(record.level, format)),
                Segment::Category => out.push_str(&record.category),
                Segment::TraceId => out.push_str(correlation.trace_id.as_deref().unwrap_or("")),
                Segment::SpanId => out.push_str(correlation.span_id.as_deref().unwrap_or("")),
                Segment::ParentId => out.push_str(correlation.parent_id.as_deref().unwrap_or("")),
                Segment::Message => out.push_str(&record.message),
                Segment::Exception => {
                    if let Some(exception) = &record.exception {
                        out.push_str(exception);
                        out.push('\n');
                    }
                }
                Segment::NewLine => out.push('\n'),
            }
        }
        out
    }
}

fn render_level(level: LogLevel, format: &LevelFormat) -> String {
    match format {
        LevelFormat::Default | LevelFormat::Lower => level.to_string(),
        LevelFormat::Upper => level.as_upper_str().to_string(),
        LevelFormat::UpperShort => level.short_code().to_string(),
        LevelFormat::LowerShort => level.short_code().to_ascii_lowercase(),
    }
}

fn parse_token(body: &str) -> Result<Segment, TemplateError> {
    let (name, format) = match body.split_once(':') {
        Some((name, format)) => (name.trim(), Some(format)),
        None => (body.trim(), None),
    };
    let unsupported = |format: &str| TemplateError::UnsupportedFormat {
        token: name.to_string(),
        format: format.to_string(),
    };

    let segment = match name {
        "Timestamp" => {
            let format = format.unwrap_or("%Y-%m-%d %H:%M:%S%.3f %:z");
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(unsupported(format));
            }
            return Ok(Segment::Timestamp(format.to_string()));
        }
        "Level" => {
            let level_format = match format {
                None => LevelFormat::Default,
                Some("u") => LevelFormat::Upper,
                Some("w") => LevelFormat::Lower,
                Some("u3") => LevelFormat::UpperShort,
                Some("w3") => LevelFormat::LowerShort,
                Some(other) => return Err(unsupported(other)),
            };
            return Ok(Segment::Level(level_format));
        }
        "Category" | "SourceContext" => Segment::Category,
        "TraceId" => Segment::TraceId,
        "SpanId" => Segment::SpanId,
        "ParentId" => Segment::ParentId,
        "Message" => Segment::Message,
        "Exception" => Segment::Exception,
        "NewLine" => Segment::NewLine,
        other => return Err(TemplateError::UnknownToken(other.to_string())),
    };

    match format {
        Some(format) => Err(unsupported(format)),
        None => Ok(segment),
    }
}

impl FromStr for OutputTemplate {
    type Err = TemplateError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(pos) = rest.find(['{', '}']) {
            literal.push_str(&rest[..pos]);
            let brace = &rest[pos..];

            if brace.starts_with("{{") || brace.starts_with("}}") {
                literal.push_str(&brace[..1]);
                rest = &brace[2..];
                offset += pos + 2;
                continue;
            }
            if brace.starts_with('}') {
                literal.push('}');
                rest = &brace[1..];
                offset += pos + 1;
                continue;
            }

            let end = brace.find('}').ok_or(TemplateError::Unclosed(offset + pos))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_token(&brace[1..end])?);
            rest = &brace[end + 1..];
            offset += pos + end + 1;
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }
}

impl Default for OutputTemplate {
    fn default() -> Self {
        // The default template only uses known tokens.
        DEFAULT_OUTPUT_TEMPLATE.parse().unwrap_or_else(|_| Self {
            source: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            segments: vec![Segment::Message, Segment::NewLine],
        })
    }
}

impl Serialize for OutputTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// Formats each record with an [`OutputTemplate`] and writes it immediately.
pub struct ConsoleSink {
    template: OutputTemplate,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    /// A sink writing to standard output.
    #[must_use]
    pub fn stdout(template: OutputTemplate) -> Self {
        Self::with_writer(template, Box::new(std::io::stdout()))
    }

    /// A sink writing to any writer.
    #[must_use]
    pub fn with_writer(template: OutputTemplate, writer: Box<dyn Write + Send>) -> Self {
        Self {
            template,
            writer: Mutex::new(writer),
        }
    }

    /// The template in use.
    #[must_use]
    pub fn template(&self) -> &OutputTemplate {
        &self.template
    }
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("template", &self.template.source)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl LogSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn emit(&self, record: &LogRecord) {
        let line = self.template.render(record);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.write_all(line.as_bytes()) {
            tracing::warn!(error = %e, "Console sink write failed");
        }
    }

    async fn flush(&self) -> crate::TelemetryResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.flush() {
            tracing::warn!(error = %e, "Console sink flush failed");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Correlation;
    use chrono::TimeZone;
    use std::sync::Arc;

    /// A writer whose output can be read back.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub(crate) Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record() -> LogRecord {
        let mut record = LogRecord::new(LogLevel::Info, "checkout::orders", "order placed")
            .with_timestamp(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 30).unwrap());
        record.correlation = Correlation {
            trace_id: Some("5759e988bd862e3fe1be46a994272793".into()),
            span_id: Some("53995c3f42cd8ad8".into()),
            ..Correlation::default()
        };
        record
    }

    #[test]
    fn test_default_template_renders_correlated_record() {
        let line = OutputTemplate::default().render(&record());
        assert_eq!(
            line,
            "[13:45:30 INF] 5759e988bd862e3fe1be46a994272793 53995c3f42cd8ad8 order placed\n"
        );
    }

    #[test]
    fn test_uncorrelated_record_renders_empty_ids() {
        let record = LogRecord::new(LogLevel::Error, "app", "boom").with_exception("io error");
        let template: OutputTemplate = "{Level:u}|{TraceId}|{SpanId}|{Message}{NewLine}{Exception}"
            .parse()
            .unwrap();

        assert_eq!(template.render(&record), "ERROR|||boom\nio error\n");
    }

    #[test]
    fn test_escaped_braces_and_category() {
        let template: OutputTemplate = "{{{Category}}} {Level:w3}".parse().unwrap();
        assert_eq!(template.render(&record()), "{checkout::orders} inf");
    }

    #[test]
    fn test_template_errors() {
        assert_eq!(
            "{Nope}".parse::<OutputTemplate>().unwrap_err(),
            TemplateError::UnknownToken("Nope".into())
        );
        assert!(matches!(
            "{Level:x9}".parse::<OutputTemplate>(),
            Err(TemplateError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            "{Message:u}".parse::<OutputTemplate>(),
            Err(TemplateError::UnsupportedFormat { .. })
        ));
        assert_eq!(
            "ab {Message".parse::<OutputTemplate>().unwrap_err(),
            TemplateError::Unclosed(3)
        );
    }

    #[test]
    fn test_console_sink_writes_immediately() {
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::with_writer(
            "{Message}{NewLine}".parse().unwrap(),
            Box::new(buffer.clone()),
        );

        sink.emit(&record());
        sink.emit(&LogRecord::new(LogLevel::Debug, "app", "second"));

        assert_eq!(buffer.contents(), "order placed\nsecond\n");
    }
}
