// Copyright 2023 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides interrupt masking for critical sections.

/// Access to the CPU's interrupt flag.
///
/// The kernel drives the real flag with `cli`/`sti`; host test
/// suites substitute a recording implementation.
///
pub trait InterruptController: Send + Sync {
    /// Returns whether interrupts are currently enabled.
    ///
    fn enabled(&self) -> bool;

    /// Enables interrupts.
    ///
    fn enable(&self);

    /// Disables interrupts.
    ///
    fn disable(&self);
}

/// Runs `f` with interrupts masked, restoring the previous interrupt
/// state afterwards.
///
/// Nesting is safe: when interrupts are already disabled on entry,
/// they are left disabled on exit.
///
pub fn without_interrupts<R>(controller: &dyn InterruptController, f: impl FnOnce() -> R) -> R {
    let was_enabled = controller.enabled();
    if was_enabled {
        controller.disable();
    }

    let result = f();

    if was_enabled {
        controller.enable();
    }

    result
}

/// An [`InterruptController`] for environments in which this kernel
/// does not drive the hardware, such as a host test process.
///
/// The flag state is tracked but nothing reaches any hardware.
///
pub struct InertInterrupts {
    enabled: core::sync::atomic::AtomicBool,
}

impl InertInterrupts {
    /// Returns a new controller with interrupts enabled.
    ///
    pub const fn new() -> Self {
        InertInterrupts {
            enabled: core::sync::atomic::AtomicBool::new(true),
        }
    }
}

impl Default for InertInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for InertInterrupts {
    fn enabled(&self) -> bool {
        self.enabled.load(core::sync::atomic::Ordering::Relaxed)
    }

    fn enable(&self) {
        self.enabled.store(true, core::sync::atomic::Ordering::Relaxed);
    }

    fn disable(&self) {
        self.enabled.store(false, core::sync::atomic::Ordering::Relaxed);
    }
}

/// The [`InterruptController`] backed by the real interrupt flag.
///
#[cfg(target_arch = "x86")]
pub struct HardwareInterrupts;

#[cfg(target_arch = "x86")]
impl InterruptController for HardwareInterrupts {
    fn enabled(&self) -> bool {
        x86::bits32::eflags::read().contains(x86::bits32::eflags::EFlags::FLAGS_IF)
    }

    fn enable(&self) {
        unsafe { x86::irq::enable() };
    }

    fn disable(&self) {
        unsafe { x86::irq::disable() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_restores_the_previous_state() {
        let controller = InertInterrupts::new();
        assert!(controller.enabled());

        // Masking from the enabled state disables, then restores.
        let result = without_interrupts(&controller, || {
            assert!(!controller.enabled());
            42
        });
        assert_eq!(result, 42);
        assert!(controller.enabled());

        // Masking from the disabled state must not enable on exit.
        controller.disable();
        without_interrupts(&controller, || {
            assert!(!controller.enabled());
        });
        assert!(!controller.enabled());
    }
}
