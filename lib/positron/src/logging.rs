pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the default terminal logger used by the binaries. Library code
/// takes a parent logger instead and falls back to `Discard` when none is
/// supplied.
pub fn init() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);
    builder.build().expect("Error building terminal logger")
}

/// Resolves an optional parent logger into a child or a discard logger.
#[inline]
pub(crate) fn child<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => Logger::root(Discard, o!()),
    }
}
