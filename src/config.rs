//! Controller configuration.

use std::num::NonZeroUsize;

const DEFAULT_OUTPUT_BUFFER_SIZE: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(size) => size,
    None => unreachable!(),
};

/// Tunables for a single connection controller.
#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    /// Maximum number of messages held in the outbound queue. A push
    /// arriving with the queue at this size is refused, which is the
    /// application-level backpressure signal.
    pub output_buffer_size: NonZeroUsize,
}

impl ControllerConfig {
    /// Build a configuration with the given outbound queue bound.
    #[must_use]
    pub fn with_output_buffer_size(size: NonZeroUsize) -> Self {
        Self {
            output_buffer_size: size,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
        }
    }
}
