use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_QUANTUM_MILLISECONDS, DEFAULT_STACK_SIZE, DIRTY_MEMORY_PATTERN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    DEBUG,
    VERBOSE,
    INFO,
    WARNING,
    ERROR,
    FATAL,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LogLevel::DEBUG => write!(f, "DEBUG  "),
            LogLevel::VERBOSE => write!(f, "VERBOSE"),
            LogLevel::INFO => write!(f, "INFO   "),
            LogLevel::WARNING => write!(f, "WARNING"),
            LogLevel::ERROR => write!(f, "ERROR  "),
            LogLevel::FATAL => write!(f, "FATAL  "),
        }
    }
}

/// What free heap memory is filled with once initialization is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapFill {
    None,
    Zero,
    Dirty(usize),
}

impl HeapFill {
    pub const fn dirty() -> Self {
        HeapFill::Dirty(DIRTY_MEMORY_PATTERN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfiguration {
    pub quantum_milliseconds: u64,
    pub default_stack_size: usize,
    pub heap_fill: HeapFill,
    pub log_level: LogLevel,
}

impl Default for KernelConfiguration {
    fn default() -> Self {
        Self {
            quantum_milliseconds: DEFAULT_QUANTUM_MILLISECONDS,
            default_stack_size: DEFAULT_STACK_SIZE,
            heap_fill: HeapFill::Zero,
            log_level: LogLevel::INFO,
        }
    }
}

impl KernelConfiguration {
    /// Decodes a configuration blob produced by the board build tooling.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        postcard::from_bytes(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_pad_to_the_same_width() {
        for level in [LogLevel::DEBUG, LogLevel::INFO, LogLevel::FATAL, LogLevel::WARNING] {
            assert_eq!(format!("{}", level).len(), 7);
        }
    }

    #[test]
    fn configuration_survives_postcard() {
        let configuration = KernelConfiguration {
            quantum_milliseconds: 5,
            heap_fill: HeapFill::dirty(),
            ..KernelConfiguration::default()
        };
        let bytes = postcard::to_allocvec(&configuration).unwrap();
        assert_eq!(KernelConfiguration::decode(&bytes), Some(configuration));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert_eq!(KernelConfiguration::decode(&[0xFF, 0xFF, 0xFF]), None);
    }
}
