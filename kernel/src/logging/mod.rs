use core::fmt::Arguments;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

pub use kernel_shared::config::LogLevel;
use kernel_shared::thread::ThreadId;
use lazy_static::lazy_static;
use spin::RwLock;

/// Destination for formatted log lines, usually a UART or an RTT channel.
pub trait LogSink: Sync {
    fn write_line(&self, level: LogLevel, line: Arguments);
}

const NO_THREAD: u32 = u32::MAX;

struct Logger {
    sink: RwLock<Option<&'static dyn LogSink>>,
    max_level: AtomicU8,
    thread: AtomicU32,
}

lazy_static! {
    static ref LOGGER: Logger = Logger {
        sink: RwLock::new(None),
        max_level: AtomicU8::new(LogLevel::INFO as u8),
        thread: AtomicU32::new(NO_THREAD),
    };
}

pub fn set_sink(sink: &'static dyn LogSink) {
    *LOGGER.sink.write() = Some(sink);
}

pub fn set_max_level(level: LogLevel) {
    LOGGER.max_level.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: LogLevel) -> bool {
    level as u8 >= LOGGER.max_level.load(Ordering::Relaxed)
}

/// Thread shown in the line prefix. Updated on every context switch.
pub fn set_current_thread(thread: Option<ThreadId>) {
    LOGGER
        .thread
        .store(thread.map_or(NO_THREAD, |id| id.0), Ordering::Relaxed);
}

pub fn _print(log_level: LogLevel, args: Arguments) {
    if !enabled(log_level) {
        return;
    }
    let sink = match *LOGGER.sink.read() {
        Some(sink) => sink,
        None => return,
    };
    let thread = LOGGER.thread.load(Ordering::Relaxed);
    if thread == NO_THREAD {
        sink.write_line(log_level, format_args!("[T:---][{}]: {}", log_level, args));
    } else {
        sink.write_line(log_level, format_args!("[T:{:03}][{}]: {}", thread, log_level, args));
    }
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::logging::_print($crate::logging::LogLevel::DEBUG, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! verbose {
    ($($arg:tt)*) => {
        $crate::logging::_print($crate::logging::LogLevel::VERBOSE, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logging::_print($crate::logging::LogLevel::INFO, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logging::_print($crate::logging::LogLevel::WARNING, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logging::_print($crate::logging::LogLevel::ERROR, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::logging::_print($crate::logging::LogLevel::FATAL, format_args!($($arg)*));
    };
}

/// Stops the kernel: logs the stop code at FATAL and panics. On target the
/// panic handler halts the core.
#[macro_export]
macro_rules! bug_check {
    ($code:expr) => {{
        let code: $crate::StopCode = $code;
        $crate::fatal!("BUG CHECK {}", code);
        panic!("bug check {}", code)
    }};
    ($code:expr, $($arg:tt)+) => {{
        let code: $crate::StopCode = $code;
        $crate::fatal!("BUG CHECK {}: {}", code, format_args!($($arg)+));
        panic!("bug check {}: {}", code, format_args!($($arg)+))
    }};
}

#[cfg(test)]
mod tests {
    use std::string::String;
    use std::vec::Vec;

    use spin::Mutex;

    use super::*;

    struct CapturingSink(Mutex<Vec<String>>);

    impl LogSink for CapturingSink {
        fn write_line(&self, _level: LogLevel, line: Arguments) {
            self.0.lock().push(std::format!("{}", line));
        }
    }

    static SINK: CapturingSink = CapturingSink(Mutex::new(Vec::new()));

    #[test]
    fn lines_carry_thread_and_padded_level() {
        set_sink(&SINK);
        set_max_level(LogLevel::DEBUG);
        set_current_thread(Some(ThreadId(7)));
        info!("scheduler started with {} threads", 3);
        set_current_thread(None);
        warn!("no current thread");

        set_max_level(LogLevel::ERROR);
        info!("dropped");
        assert!(enabled(LogLevel::FATAL));
        set_max_level(LogLevel::DEBUG);

        let lines = SINK.0.lock();
        assert!(lines.contains(&String::from("[T:007][INFO   ]: scheduler started with 3 threads")));
        assert!(lines.contains(&String::from("[T:---][WARNING]: no current thread")));
        assert!(!lines.iter().any(|line| line.ends_with("dropped")));
    }
}
