// Processor signature from CPUID leaf 1

/// Family and model fields of EAX, extended fields included; stepping dropped
pub const SIGNATURE_MASK: u32 = 0x0fff_0ff0;

/// Raw EAX of CPUID leaf 1, zero where CPUID does not exist
#[cfg(target_arch = "x86_64")]
pub fn leaf1_eax() -> u32 {
    // SAFETY: CPUID is available on every x86_64 processor
    unsafe { std::arch::x86_64::__cpuid(1) }.eax
}

#[cfg(not(target_arch = "x86_64"))]
pub fn leaf1_eax() -> u32 {
    0
}

pub fn signature() -> u32 {
    normalize(leaf1_eax())
}

pub fn normalize(eax: u32) -> u32 {
    eax & SIGNATURE_MASK
}
