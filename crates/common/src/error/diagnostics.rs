use std::{borrow::Cow, fmt, panic::Location};

/// An error message paired with the source location that produced it.
///
/// Build one with [`DiagnosticMessage::new`] or the [`diag!`] macro. Both
/// capture the caller through `#[track_caller]`, so constructors that are
/// themselves `#[track_caller]` report the site that raised the error
/// rather than the helper.
#[derive(Clone, Debug)]
pub struct DiagnosticMessage {
    message: Cow<'static, str>,
    location: &'static Location<'static>,
}

impl DiagnosticMessage {
    #[track_caller]
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            location: Location::caller(),
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_ref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}:{})",
            self.message,
            self.location.file(),
            self.location.line()
        )
    }
}

/// `format!`-style shorthand for [`DiagnosticMessage::new`].
#[macro_export]
macro_rules! diag {
    ($msg:literal $(,)?) => {
        $crate::error::diagnostics::DiagnosticMessage::new($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::diagnostics::DiagnosticMessage::new(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_the_construction_site() {
        let msg = DiagnosticMessage::new("boom");
        assert_eq!(msg.message(), "boom");
        assert!(msg.location().file().ends_with("diagnostics.rs"));
        assert!(msg.to_string().starts_with("boom (at "));
    }

    #[test]
    fn diag_macro_formats_arguments() {
        let msg = crate::diag!("step {} failed", "contacts");
        assert_eq!(msg.message(), "step contacts failed");
    }
}
