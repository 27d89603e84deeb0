//! Compact, colored event format for terminals.
use std::{fmt, io};

use nu_ansi_term::{Color, Style};
use tracing::{Event, Level, Subscriber, field, span};
use tracing_subscriber::{
    field::{RecordFields, VisitFmt, VisitOutput},
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::LookupSpan,
};

const TIME_FORMAT: &str =
    r#"[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"#;

/// Writes events as `LEVEL time target: message key=value ...`.
///
/// Fields named `error` are painted red, other fields blue.
pub struct TernFormat {
    time_format: time::format_description::OwnedFormatItem,
    with_target: bool,
}

impl TernFormat {
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    fn format_time(&self, writer: &mut Writer<'_>) -> fmt::Result {
        let now = time::OffsetDateTime::now_utc();
        let mut adaptor = WriteAdaptor { inner: writer };
        now.format_into(&mut adaptor, &self.time_format)
            .map_err(|_| fmt::Error)?;
        Ok(())
    }
}

impl Default for TernFormat {
    fn default() -> Self {
        let time_format = time::format_description::parse_owned::<2>(TIME_FORMAT)
            .expect("static time format is valid");

        Self {
            time_format,
            with_target: true,
        }
    }
}

impl<S, N> FormatEvent<S, N> for TernFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        write!(writer, "{} ", LevelLabel(meta.level(), ansi))?;

        if self.format_time(&mut writer).is_err() {
            write!(writer, "<unknown-time>")?;
        }
        writer.write_char(' ')?;

        if self.with_target {
            if ansi {
                let dimmed = Style::new().dimmed();
                write!(writer, "{}{}:{} ", dimmed.prefix(), meta.target(), dimmed.suffix())?;
            } else {
                write!(writer, "{}: ", meta.target())?;
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<N>>() else {
                    continue;
                };
                if !fields.is_empty() {
                    write!(writer, " {}", fields)?;
                }
            }
        }

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for TernFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, true);
        fields.record(&mut visitor);
        visitor.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &span::Record<'_>,
    ) -> fmt::Result {
        let is_empty = current.is_empty();
        let mut visitor = FieldVisitor::new(current.as_writer(), is_empty);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    is_empty: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, is_empty: bool) -> Self {
        Self {
            writer,
            is_empty,
            result: Ok(()),
        }
    }

    fn separator(&mut self) -> &'static str {
        if self.is_empty {
            self.is_empty = false;
            ""
        } else {
            " "
        }
    }

    fn write_message(&mut self, message: &dyn fmt::Display) {
        let separator = self.separator();
        self.result = write!(self.writer, "{separator}{message}");
    }

    fn write_field(&mut self, name: &str, value: &dyn fmt::Display) {
        let separator = self.separator();
        self.result = if self.writer.has_ansi_escapes() {
            let color = if name == "error" {
                Color::Red
            } else {
                Color::Blue
            };
            write!(
                self.writer,
                "{separator}{name}={}",
                color.paint(value.to_string())
            )
        } else {
            write!(self.writer, "{separator}{name}={value}")
        };
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if self.result.is_err() {
            return;
        }

        match field.name() {
            "message" => self.write_message(&value),
            name => self.write_field(name, &format_args!("{value:?}")),
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        match field.name() {
            "message" => self.write_message(&format_args!("{value:?}")),
            // Fields recorded by the `log` bridge.
            name if name.starts_with("log.") => {}
            name => self.write_field(name, &format_args!("{value:?}")),
        }
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(self) -> fmt::Result {
        self.result
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

struct LevelLabel<'a>(&'a Level, bool);

impl fmt::Display for LevelLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, color) = match *self.0 {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => (" INFO", Color::Green),
            Level::WARN => (" WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.1 {
            write!(f, "{}", color.paint(label))
        } else {
            f.write_str(label)
        }
    }
}

struct WriteAdaptor<'a, 'w> {
    inner: &'a mut Writer<'w>,
}

impl io::Write for WriteAdaptor<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = std::str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.write_str(s).map_err(io::Error::other)?;
        Ok(s.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
