//! VM configuration.

/// Default bound on nested calls before "Stack overflow." is reported.
pub const DEFAULT_MAX_FRAMES: usize = 64;

/// Settings for a [`Vm`](super::Vm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    /// Log every executed instruction and the stack before it at `trace` level.
    pub trace_execution: bool,
    /// Attach the call stack to runtime errors.
    pub stack_trace: bool,
    pub max_frames: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            trace_execution: false,
            stack_trace: true,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl VmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `LOX_TRACE` and `LOX_MAX_FRAMES`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(value) = lookup("LOX_TRACE") {
            options.trace_execution = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(value) = lookup("LOX_MAX_FRAMES") {
            match value.trim().parse::<usize>() {
                Ok(frames) if frames > 0 => options.max_frames = frames,
                _ => log::warn!("ignoring invalid LOX_MAX_FRAMES value '{}'", value),
            }
        }
        options
    }

    pub fn trace_execution(mut self, enabled: bool) -> Self {
        self.trace_execution = enabled;
        self
    }

    pub fn stack_trace(mut self, enabled: bool) -> Self {
        self.stack_trace = enabled;
        self
    }

    pub fn max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = VmOptions::default();
        assert!(!options.trace_execution);
        assert!(options.stack_trace);
        assert_eq!(options.max_frames, 64);
    }

    #[test]
    fn test_builder() {
        let options = VmOptions::new()
            .trace_execution(true)
            .stack_trace(false)
            .max_frames(0);
        assert!(options.trace_execution);
        assert!(!options.stack_trace);
        assert_eq!(options.max_frames, 1);
    }

    #[test]
    fn test_from_lookup() {
        let options = VmOptions::from_lookup(|key| match key {
            "LOX_TRACE" => Some("1".to_string()),
            "LOX_MAX_FRAMES" => Some("128".to_string()),
            _ => None,
        });
        assert!(options.trace_execution);
        assert_eq!(options.max_frames, 128);

        let invalid = VmOptions::from_lookup(|key| match key {
            "LOX_MAX_FRAMES" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(invalid.max_frames, DEFAULT_MAX_FRAMES);
    }
}
