use std::error::Error as StdError;

/// An error that can be reported.
///
/// The backtrace is a list of raw lines in the format `<file>:<line>:in '<method>'`, innermost
/// call first. Causes form a chain that may contain cycles; the reporter stops at the first
/// cause it has already seen.
pub trait Reportable {
    /// Name of the error type, used for grouping and for level filters.
    fn class_name(&self) -> String;

    /// Human-readable message.
    fn message(&self) -> String;

    /// Raw backtrace lines, innermost call first.
    fn backtrace(&self) -> Option<Vec<String>> {
        None
    }

    /// The error that caused this one.
    fn cause(&self) -> Option<&dyn Reportable> {
        None
    }
}

/// An owned snapshot of an error and its causes.
///
/// ```
/// use faultline::CapturedError;
///
/// let err = "12a".parse::<u32>().unwrap_err();
/// let captured = CapturedError::from_error(&err);
/// assert_eq!("ParseIntError", faultline::Reportable::class_name(&captured));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    class_name: String,
    message: String,
    backtrace: Option<Vec<String>>,
    cause: Option<Box<CapturedError>>,
}

impl CapturedError {
    /// Create an error from its parts.
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        CapturedError {
            class_name: class_name.into(),
            message: message.into(),
            backtrace: None,
            cause: None,
        }
    }

    /// Capture an error and its `source()` chain.
    ///
    /// The class name of the outer error is its type name. Sources are only known as trait
    /// objects; their class name is taken from their `Debug` output.
    pub fn from_error<E: StdError + 'static>(err: &E) -> Self {
        let class_name = short_type_name(std::any::type_name::<E>());
        let visited = vec![identity(err, &class_name)];
        let mut captured = CapturedError::new(class_name, err.to_string());
        captured.cause = capture_sources(err.source(), visited).map(Box::new);
        captured
    }

    /// Capture a boxed or borrowed error trait object and its `source()` chain.
    pub fn from_dyn(err: &(dyn StdError + 'static)) -> Self {
        let class_name = class_from_debug(err);
        let visited = vec![identity(err, &class_name)];
        let mut captured = CapturedError::new(class_name, err.to_string());
        captured.cause = capture_sources(err.source(), visited).map(Box::new);
        captured
    }

    /// Attach raw backtrace lines, innermost call first.
    pub fn with_backtrace(mut self, lines: Vec<String>) -> Self {
        self.backtrace = Some(lines);
        self
    }

    /// Attach the current call stack, without this library's own frames.
    pub fn with_current_backtrace(self) -> Self {
        self.with_backtrace(crate::backtrace::current_stack())
    }

    /// Set the cause of this error.
    pub fn with_cause(mut self, cause: CapturedError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl Reportable for CapturedError {
    fn class_name(&self) -> String {
        self.class_name.clone()
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn backtrace(&self) -> Option<Vec<String>> {
        self.backtrace.clone()
    }

    fn cause(&self) -> Option<&dyn Reportable> {
        self.cause.as_deref().map(|cause| cause as &dyn Reportable)
    }
}

fn capture_sources(
    source: Option<&(dyn StdError + 'static)>,
    mut visited: Vec<Identity>,
) -> Option<CapturedError> {
    let source = source?;
    let class_name = class_from_debug(source);
    let id = identity(source, &class_name);
    if visited.contains(&id) {
        return None;
    }
    visited.push(id);
    let mut captured = CapturedError::new(class_name, source.to_string());
    captured.cause = capture_sources(source.source(), visited).map(Box::new);
    Some(captured)
}

/// Address and class name of an error.
///
/// The address alone is ambiguous: a cause stored as the first field of its parent shares the
/// parent's address.
pub(crate) type Identity = (*const (), String);

pub(crate) fn identity<T: ?Sized>(value: &T, class_name: &str) -> Identity {
    (value as *const T as *const (), class_name.to_string())
}

/// `std::num::error::ParseIntError` -> `ParseIntError`, `Box<dyn Error>` -> `Box`.
fn short_type_name(name: &str) -> String {
    let without_generics = name.split('<').next().unwrap_or(name);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

fn class_from_debug(err: &dyn StdError) -> String {
    let debug = format!("{:?}", err);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        "Error".into()
    } else {
        name
    }
}
