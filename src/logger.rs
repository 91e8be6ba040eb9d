//! `log` backend that writes to the kernel console.
//!
//! ```ignore
//! static UART: Pl011 = unsafe { Pl011::new(uart_pl011::DEFAULT_BASE) };
//! mrt_kernel::logger::init(&UART, log::LevelFilter::Debug)?;
//! log::info!("booting");
//! ```

use core::fmt::{self, Write};
use spin::Once;

/// Byte sink for kernel messages. Must be usable from interrupt context.
pub trait Console: Sync {
    fn write_str(&self, s: &str);
}

/// Logger that formats records as `[LEVEL target] message`.
pub struct KernelLogger {
    console: &'static dyn Console,
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

impl KernelLogger {
    pub const fn new(console: &'static dyn Console) -> Self {
        Self { console }
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    // The log macros have already checked the level.
    fn log(&self, record: &log::Record<'_>) {
        let _ = writeln!(
            ConsoleWriter(self.console),
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: Once<KernelLogger> = Once::new();

/// Install the console logger. Only the first call has an effect.
///
/// # Returns
///
/// `Busy` if another logger was already installed.
pub fn init(
    console: &'static dyn Console,
    level: log::LevelFilter,
) -> crate::errors::KResult<()> {
    let logger = LOGGER.call_once(|| KernelLogger::new(console));
    log::set_logger(logger).map_err(|_| crate::errors::KernelError::Busy)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use log::Log;

    struct Capture(spin::Mutex<String>);

    impl Console for Capture {
        fn write_str(&self, s: &str) {
            self.0.lock().push_str(s);
        }
    }

    #[test]
    fn test_record_format() {
        let capture: &'static Capture =
            alloc::boxed::Box::leak(alloc::boxed::Box::new(Capture(spin::Mutex::new(String::new()))));
        let logger = KernelLogger::new(capture);
        logger.log(
            &log::Record::builder()
                .level(log::Level::Error)
                .target("sched")
                .args(format_args!("tid {} died", 3))
                .build(),
        );
        assert_eq!(&*capture.0.lock(), "[ERROR sched] tid 3 died\n");
    }
}
