//! Optional, non-authoritative progress output.
//!
//! This loader does not depend on a logging crate; the console print
//! channel an embedder might wire up is modelled as a small sink trait
//! instead, the way bare-metal kernels wrap their own UART/VGA text
//! writers. Nothing here ever influences success or failure: that is
//! the error slot's job alone.
pub trait DiagnosticSink {
    /// Receives one line of optional, non-authoritative progress output.
    /// Never consulted to determine success or failure.
    fn note(&self, message: &str);
}

/// Default sink: writes to stderr. An embedder without a stderr (the
/// console-less host this loader targets) supplies its own sink via
/// [`crate::set_diagnostic_sink`].
pub(crate) struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn note(&self, message: &str) {
        eprintln!("ppcdl: {message}");
    }
}
