//! Opt-in `tracing` subscriber for binaries embedding this crate.
//!
//! The crate's own modules only ever call `tracing::{debug,warn,error}!` —
//! a library must never install a global subscriber itself. `init_tracing`
//! is offered here for embedders that want the same clean, colorized,
//! level-only console output this crate's own author tooling uses.

use std::fmt;

use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// A custom tracing event formatter for colorizing log output based on level.
///
/// Colors the whole line by severity, with no timestamp or level prefix —
/// meant for a human reading a terminal, not for a log aggregator.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
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
        // Buffer the formatted fields so the whole line can be colored at
        // once; `format_fields` writes directly otherwise.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Install a process-wide `tracing` subscriber that writes colorized,
/// level-filtered output to stderr using [`ColorizedFormatter`].
///
/// Intended for a binary or example embedding this crate, never for the
/// crate's own code paths. Panics if a global subscriber is already set —
/// call it at most once, early in `main`.
pub fn init_tracing(level: Level) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ColorizedFormatter)
                .with_filter(LevelFilter::from_level(level)),
        )
        .init();
}
