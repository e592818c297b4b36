use core::fmt as core_fmt;

use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        FmtContext,
        format::{FormatEvent, FormatFields, Writer},
    },
    registry::LookupSpan,
};

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

/// Escape sequences used for one line; all empty when colour is off.
struct Palette {
    reset: &'static str,
    dim: &'static str,
    level: &'static str,
}

impl Palette {
    fn for_level(ansi: bool, level: &Level) -> Self {
        if !ansi {
            return Self {
                reset: "",
                dim: "",
                level: "",
            };
        }
        let level = match *level {
            Level::ERROR => "\x1b[1;31m",
            Level::WARN => "\x1b[1;33m",
            Level::INFO => "\x1b[1;32m",
            Level::DEBUG => "\x1b[1;34m",
            Level::TRACE => "\x1b[1;35m",
        };
        Self {
            reset: "\x1b[0m",
            dim: "\x1b[2m",
            level,
        }
    }
}

/// Drops the crate prefix so `httpsrc::source::http_src` prints as
/// `source::http_src`.
fn short_target(target: &str) -> &str {
    target
        .strip_prefix(concat!(env!("CARGO_CRATE_NAME"), "::"))
        .unwrap_or(target)
}

/// Single-line event format:
/// `HH:MM:SS.mmm LEVEL [thread] target:line > message`.
///
/// The pull loop and the event/signal threads are named, so the thread
/// column shows which side of a blocking wait logged the line.
pub struct CustomFormatter {
    use_ansi: bool,
}

impl CustomFormatter {
    pub fn new(use_ansi: bool) -> Self {
        Self { use_ansi }
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> core_fmt::Result {
        let metadata = event.metadata();
        let colors = Palette::for_level(self.use_ansi, metadata.level());

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        match now.format(TIMESTAMP) {
            Ok(ts) => write!(writer, "{}{}{} ", colors.dim, ts, colors.reset)?,
            Err(_) => write!(writer, "{}--:--:--.---{} ", colors.dim, colors.reset)?,
        }

        write!(
            writer,
            "{}{:<5}{} ",
            colors.level,
            metadata.level(),
            colors.reset
        )?;

        let thread = std::thread::current();
        match thread.name() {
            Some(name) => write!(writer, "[{name}] ")?,
            None => write!(writer, "[{:?}] ", thread.id())?,
        }

        write!(writer, "{}{}", colors.dim, short_target(metadata.target()))?;
        if let Some(line) = metadata.line() {
            write!(writer, ":{line}")?;
        }
        write!(writer, "{} > ", colors.reset)?;

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
