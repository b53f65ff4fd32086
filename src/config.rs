// src/config.rs

//! Runtime limits and debugging switches for the VM.
//! The configuration only states the limits; the VM enforces them.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of simultaneously active calls, the top-level frame included.
    pub max_call_depth: usize,

    /// Maximum operand stack depth.
    pub max_stack_size: usize,

    /// Log every executed instruction at trace level.
    pub trace_execution: bool,

    /// Dump compiled functions before running them.
    pub disassemble: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_call_depth: 1024,
            max_stack_size: 65536,
            trace_execution: false,
            disassemble: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_stack_size(mut self, size: usize) -> Self {
        self.max_stack_size = size;
        self
    }

    pub fn with_trace_execution(mut self, enabled: bool) -> Self {
        self.trace_execution = enabled;
        self
    }

    pub fn with_disassemble(mut self, enabled: bool) -> Self {
        self.disassemble = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = Config::new();
        assert_eq!(config.max_call_depth, 1024);
        assert_eq!(config.max_stack_size, 65536);
        assert!(!config.trace_execution);

        let config = config.with_max_call_depth(8).with_trace_execution(true);
        assert_eq!(config.max_call_depth, 8);
        assert!(config.trace_execution);
    }
}
