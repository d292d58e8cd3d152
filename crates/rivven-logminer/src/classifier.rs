//! # Retriable Error Classification
//!
//! Decides whether a mining session failure is transient (reopen the
//! session) or fatal (stop and report). The classifier is a pure function
//! over an [`ErrorDescription`] chain, so it can be tested without a
//! database connection.
//!
//! Rules, first match wins:
//!
//! 1. any error in the chain is a recoverable connection condition
//! 2. the outermost message starts with a known error code (case-sensitive)
//! 3. the outermost message contains a known fragment (case-insensitive)
//! 4. the outermost error's immediate cause is an I/O error
//!
//! Everything else is fatal. Codes, fragments and the I/O rule only look at
//! the outermost error; an I/O error two levels down does not count.

use crate::config::ClassifierConfig;
use crate::error::{LogMinerError, SessionFaultKind};
use std::error::Error as StdError;
use std::fmt;

/// Error codes treated as transient session failures.
pub const DEFAULT_RETRIABLE_CODES: &[&str] = &[
    "ORA-03135", // connection lost contact
    "ORA-12543", // TNS:destination host unreachable
    "ORA-00604", // error occurred at recursive SQL level 1
    "ORA-01089", // immediate shutdown in progress
    "ORA-01333", // failed to establish LogMiner dictionary
    "ORA-01284", // file cannot be opened
    "ORA-26653", // apply process did not start properly
    "ORA-01291", // missing logfile
    "ORA-01327", // failed to exclusively lock system dictionary
    "ORA-04030", // out of process memory
    "ORA-00310", // archived log contains sequence; sequence required
    "ORA-01343", // LogMiner encountered corruption in the log stream
    "ORA-01371", // complete LogMiner dictionary not found
];

/// Message fragments treated as transient session failures.
pub const DEFAULT_RETRIABLE_MESSAGES: &[&str] = &["No more data to read from socket"];

/// One error in a failure chain, reduced to what the classifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescription {
    pub kind: SessionFaultKind,
    pub message: String,
    pub cause: Option<Box<ErrorDescription>>,
}

impl ErrorDescription {
    pub fn new(kind: SessionFaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ErrorDescription) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// This error followed by its causes, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &ErrorDescription> {
        std::iter::successors(Some(self), |d| d.cause.as_deref())
    }

    /// Describe a live error by walking its `source()` chain.
    ///
    /// `std::io::Error` maps to [`SessionFaultKind::Io`]; a
    /// [`LogMinerError::Session`] keeps its kind and bare message.
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let mut levels = Vec::new();
        let mut current = Some(error);
        while let Some(e) = current {
            levels.push(describe_one(e));
            current = e.source();
        }

        let mut description: Option<ErrorDescription> = None;
        for (kind, message) in levels.into_iter().rev() {
            let mut level = ErrorDescription::new(kind, message);
            level.cause = description.map(Box::new);
            description = Some(level);
        }
        description.unwrap_or_else(|| ErrorDescription::new(SessionFaultKind::Other, ""))
    }
}

impl From<&LogMinerError> for ErrorDescription {
    fn from(error: &LogMinerError) -> Self {
        Self::from_error(error)
    }
}

fn describe_one(error: &(dyn StdError + 'static)) -> (SessionFaultKind, String) {
    // Boxed causes may surface as the box itself
    let own = error
        .downcast_ref::<LogMinerError>()
        .or_else(|| error.downcast_ref::<Box<LogMinerError>>().map(|b| &**b));
    if let Some(e) = own {
        return match e {
            LogMinerError::Session { kind, message, .. } => (*kind, message.clone()),
            LogMinerError::Io(io) => (SessionFaultKind::Io, io.to_string()),
            other => (SessionFaultKind::Other, other.to_string()),
        };
    }
    if error.downcast_ref::<std::io::Error>().is_some() {
        return (SessionFaultKind::Io, error.to_string());
    }
    (SessionFaultKind::Other, error.to_string())
}

/// Which rule made an error retriable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    RecoverableConnection,
    ErrorCode(String),
    MessageFragment(String),
    IoCause,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RecoverableConnection => write!(f, "recoverable connection"),
            RetryReason::ErrorCode(code) => write!(f, "error code {}", code),
            RetryReason::MessageFragment(fragment) => write!(f, "message '{}'", fragment),
            RetryReason::IoCause => write!(f, "I/O cause"),
        }
    }
}

/// Classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Retriable(RetryReason),
    Fatal,
}

impl Verdict {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Verdict::Retriable(_))
    }
}

/// Classifies session failures as retriable or fatal.
#[derive(Debug, Clone)]
pub struct RetriableErrorClassifier {
    codes: Vec<String>,
    /// Stored lowercased
    fragments: Vec<String>,
}

impl Default for RetriableErrorClassifier {
    fn default() -> Self {
        Self {
            codes: DEFAULT_RETRIABLE_CODES.iter().map(|c| c.to_string()).collect(),
            fragments: DEFAULT_RETRIABLE_MESSAGES
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }
}

impl RetriableErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults plus the configured extra codes and fragments.
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let mut classifier = Self::default();
        for code in &config.error_codes {
            classifier = classifier.with_error_code(code.clone());
        }
        for message in &config.error_messages {
            classifier = classifier.with_error_message(message.clone());
        }
        classifier
    }

    /// Treat messages starting with `code` as retriable.
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        if !code.is_empty() && !self.codes.contains(&code) {
            self.codes.push(code);
        }
        self
    }

    /// Treat messages containing `fragment` (any case) as retriable.
    pub fn with_error_message(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into().to_lowercase();
        if !fragment.is_empty() && !self.fragments.contains(&fragment) {
            self.fragments.push(fragment);
        }
        self
    }

    pub fn error_codes(&self) -> &[String] {
        &self.codes
    }

    pub fn classify(&self, error: &ErrorDescription) -> Verdict {
        if error
            .chain()
            .any(|e| e.kind == SessionFaultKind::RecoverableConnection)
        {
            return Verdict::Retriable(RetryReason::RecoverableConnection);
        }

        if let Some(code) = self.codes.iter().find(|c| error.message.starts_with(c.as_str())) {
            return Verdict::Retriable(RetryReason::ErrorCode(code.clone()));
        }

        let message = error.message.to_lowercase();
        if let Some(fragment) = self.fragments.iter().find(|f| message.contains(f.as_str())) {
            return Verdict::Retriable(RetryReason::MessageFragment(fragment.clone()));
        }

        if error
            .cause
            .as_ref()
            .is_some_and(|cause| cause.kind == SessionFaultKind::Io)
        {
            return Verdict::Retriable(RetryReason::IoCause);
        }

        Verdict::Fatal
    }

    /// Classify a live error
    pub fn classify_error(&self, error: &(dyn StdError + 'static)) -> Verdict {
        self.classify(&ErrorDescription::from_error(error))
    }

    pub fn is_retriable(&self, error: &ErrorDescription) -> bool {
        self.classify(error).is_retriable()
    }
}
