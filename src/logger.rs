//! Library logger.
//!
//! The inspector carries an explicit logger value rather than writing to a
//! process-global. With no callback installed, messages at or above the
//! minimum severity forward to the `log` facade, so hosts that already run
//! env_logger or similar get library messages for free. Installing a callback
//! redirects everything to the callback instead.

use std::fmt;

/// Message severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    fn as_log_level(self) -> log::Level {
        match self {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Callback receiving log messages instead of the `log` facade.
pub type LogCallback = Box<dyn Fn(Severity, &str) + Send>;

pub struct Logger {
    min_severity: Severity,
    callback: Option<LogCallback>,
}

impl Default for Logger {
    fn default() -> Self {
        Logger {
            min_severity: Severity::Info,
            callback: None,
        }
    }
}

impl Logger {
    pub fn set_callback(&mut self, cb: LogCallback) {
        self.callback = Some(cb);
    }

    pub fn set_min_severity(&mut self, sev: Severity) {
        self.min_severity = sev;
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    pub fn log(&self, sev: Severity, msg: &str) {
        if sev < self.min_severity {
            return;
        }
        match &self.callback {
            Some(cb) => cb(sev, msg),
            None => log::log!(target: "sysinspect", sev.as_log_level(), "{msg}"),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_severity", &self.min_severity)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_receives_messages_at_or_above_min() {
        let seen: Arc<Mutex<Vec<(Severity, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);

        let mut logger = Logger::default();
        logger.set_min_severity(Severity::Warning);
        logger.set_callback(Box::new(move |sev, msg| {
            seen_cb.lock().unwrap().push((sev, msg.to_string()));
        }));

        logger.log(Severity::Info, "dropped");
        logger.log(Severity::Warning, "kept");
        logger.log(Severity::Error, "also kept");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Severity::Warning, "kept".to_string()));
        assert_eq!(seen[1], (Severity::Error, "also kept".to_string()));
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }
}
