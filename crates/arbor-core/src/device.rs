use std::fmt;

/// Compute device a buffer lives on.
///
/// Kernel dispatch is keyed by (operation, element type, device). Only the
/// CPU backend ships with this workspace; the `Cuda` variant keeps the
/// dispatch key honest for downstream backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device() {
        assert!(Device::Cpu.is_cpu());
        assert!(!Device::Cuda(0).is_cpu());
        assert_eq!(Device::default(), Device::Cpu);
        assert_eq!(format!("{}", Device::Cuda(1)), "cuda:1");
    }
}
