//! Target capabilities that change instruction selection
//!
//! One implementation per instruction-set family, chosen once by
//! `cfg(target_arch)` as [`HostPlatform`].

/// How int32 division and remainder are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerDivision {
    /// Native `sdiv`/`srem` after the operands are guarded.
    Hardware,
    /// Call the `Int32Divide`/`Int32Modulo` helpers.
    Helper,
}

/// Capabilities of the target the emitted code runs on.
pub trait Platform {
    /// Short name for diagnostics.
    const NAME: &'static str;
    /// Integer division strategy.
    const INTEGER_DIVISION: IntegerDivision;
    /// Whether round-to-nearest-even is a single instruction.
    const HAS_FLOAT_ROUNDING: bool;
}

/// x86-64 (`idiv`, `roundsd` with SSE4.1).
#[derive(Debug, Clone, Copy)]
pub struct X86_64;

impl Platform for X86_64 {
    const NAME: &'static str = "x86_64";
    const INTEGER_DIVISION: IntegerDivision = IntegerDivision::Hardware;
    const HAS_FLOAT_ROUNDING: bool = true;
}

/// AArch64 (`sdiv`, `frintn`).
#[derive(Debug, Clone, Copy)]
pub struct Aarch64;

impl Platform for Aarch64 {
    const NAME: &'static str = "aarch64";
    const INTEGER_DIVISION: IntegerDivision = IntegerDivision::Hardware;
    const HAS_FLOAT_ROUNDING: bool = true;
}

/// Anything else: assume neither.
#[derive(Debug, Clone, Copy)]
pub struct Generic;

impl Platform for Generic {
    const NAME: &'static str = "generic";
    const INTEGER_DIVISION: IntegerDivision = IntegerDivision::Helper;
    const HAS_FLOAT_ROUNDING: bool = false;
}

/// The platform this crate was built for.
#[cfg(target_arch = "x86_64")]
pub type HostPlatform = X86_64;

/// The platform this crate was built for.
#[cfg(target_arch = "aarch64")]
pub type HostPlatform = Aarch64;

/// The platform this crate was built for.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub type HostPlatform = Generic;
