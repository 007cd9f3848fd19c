//! Runtime configuration types.

/// Diagnostic switches threaded from the CLI into the compiler and VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Print the value stack and the disassembled instruction before each
    /// dispatch.
    pub trace_execution: bool,
    /// Disassemble each function when its compilation ends.
    pub print_code: bool,
}
