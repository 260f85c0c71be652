//! Typed register values

use crate::arch::FilterWrite;

/// Bit layout of one register, convertible to and from its raw 64-bit value
///
/// # Example
///
/// ```
/// use slicemap_raw::register::RegisterLayout;
///
/// struct BoxControl {
///     clear_counters: bool,
/// }
///
/// impl RegisterLayout for BoxControl {
///     fn to_msr_value(&self) -> u64 {
///         u64::from(self.clear_counters) << 1
///     }
///
///     fn from_msr_value(value: u64) -> Self {
///         Self { clear_counters: value & 0x2 != 0 }
///     }
/// }
///
/// assert_eq!(BoxControl { clear_counters: true }.to_msr_value(), 0x2);
/// ```
pub trait RegisterLayout: Sized {
    fn to_msr_value(&self) -> u64;

    fn from_msr_value(value: u64) -> Self;

    /// Reject field values wider than their bit range
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Register address paired with the layout to program into it
#[derive(Debug, Clone, Copy)]
pub struct Register<T: RegisterLayout> {
    pub address: u64,
    pub layout: T,
}

impl<T: RegisterLayout> Register<T> {
    pub fn new(address: u64, layout: T) -> Self {
        Self { address, layout }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        self.layout.validate()
    }

    pub fn to_msr_value(&self) -> u64 {
        self.layout.to_msr_value()
    }

    /// The raw write that programs this register
    pub fn write(&self) -> FilterWrite {
        FilterWrite {
            address: self.address,
            value: self.to_msr_value(),
        }
    }
}
