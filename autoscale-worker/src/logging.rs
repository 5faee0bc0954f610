//! Process-wide `slog` setup, grounded in `syncserver::logging::init_logging`.
//! The teacher additionally picks a MozLog-JSON drain and a journald drain
//! depending on environment; neither crate is part of this workspace's
//! stack, so both `json` and pretty modes render through `slog-term` here,
//! distinguished by decorator (plain vs colored), with the async wrapper
//! and global-logger wiring kept identical to the teacher's.

use slog::Drain;

pub fn init_logging(json: bool) {
    let logger = if json {
        let decorator = slog_term::PlainDecorator::new(std::io::stdout());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog::slog_o!("version" => env!("CARGO_PKG_VERSION")))
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog::slog_o!())
    };
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
}

pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog::slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
