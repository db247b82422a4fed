//! Idle class: the per-CPU thread that runs when every other sub-queue is
//! empty. Never admission-controlled, never migrated.

/// Parks the core until the next interrupt. Real backend halts; the host
/// stand-in just returns so tests don't block.
pub fn park() {
    #[cfg(not(test))]
    unsafe {
        core::arch::asm!("sti; hlt", options(nomem, nostack));
    }
}
