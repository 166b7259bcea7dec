/// Logs a message at the error level, then exits the process with a
/// failure status. A daemonized process has no terminal to show a panic
/// backtrace on, so this dies quietly after the log line.
#[macro_export]
macro_rules! fatal {
  (target: $target:expr, $($arg:tt)*) => ({
    log!(target: $target, ::log::LogLevel::Error, $($arg)*);
    ::std::process::exit(1);
  });
  ($($arg:tt)*) => ({
    log!(::log::LogLevel::Error, $($arg)*);
    ::std::process::exit(1);
  });
}
