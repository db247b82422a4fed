//! IDT bring-up. CPU exceptions 0..=31 are installed; `#PF` (14) is the one
//! that matters to the rest of the kernel — it calls into
//! `memory::AddressSpace::handle_fault` so `sched`'s fork/COW pages and
//! demand-zero regions actually get resolved instead of just being logged.
//! Trimmed of the IST-per-vector table, the GS-base fault counters, and the
//! `int 0x80` gate (syscalls dispatch through `syscall::dispatch`, reached
//! from userspace via the trampoline in a later milestone, not from this
//! table).

use lazy_static::lazy_static;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::arch::x86_64::{gdt, vga};

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error);
        idt.breakpoint.set_handler_fn(breakpoint);
        idt.invalid_opcode.set_handler_fn(invalid_opcode);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.general_protection_fault.set_handler_fn(general_protection_fault);
        idt.page_fault.set_handler_fn(page_fault);
        idt
    };
}

pub fn init(cpu_id: usize) {
    assert_eq!(cpu_id, 0, "AP IDT bring-up not wired (vesper-smp reserved)");
    IDT.load();
    crate::log_info!("arch", "IDT installed");
}

extern "x86-interrupt" fn divide_error(stack: InterruptStackFrame) {
    crate::log_err!("arch", "#DE at {:#x}", stack.instruction_pointer.as_u64());
    halt_loop();
}

extern "x86-interrupt" fn breakpoint(stack: InterruptStackFrame) {
    crate::log_warn!("arch", "#BP at {:#x}", stack.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn invalid_opcode(stack: InterruptStackFrame) {
    crate::log_err!("arch", "#UD at {:#x}", stack.instruction_pointer.as_u64());
    halt_loop();
}

extern "x86-interrupt" fn general_protection_fault(stack: InterruptStackFrame, code: u64) {
    crate::log_err!("arch", "#GP code={:#x} rip={:#x}", code, stack.instruction_pointer.as_u64());
    halt_loop();
}

extern "x86-interrupt" fn double_fault(stack: InterruptStackFrame, code: u64) -> ! {
    vga::print_critical("double fault\n");
    crate::log_err!("arch", "#DF code={:#x} rip={:#x}", code, stack.instruction_pointer.as_u64());
    halt_loop();
}

/// Routes into the faulting thread's address space. `handle_fault` returns
/// `Ok(())` when the fault was resolved (demand-zero, COW, guard growth);
/// anything else is a genuine segfault and the thread is killed.
extern "x86-interrupt" fn page_fault(stack: InterruptStackFrame, code: PageFaultErrorCode) {
    let addr = Cr2::read();
    let present = code.contains(PageFaultErrorCode::PROTECTION_VIOLATION);
    let write = code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);
    let user = code.contains(PageFaultErrorCode::USER_MODE);

    match crate::kernel::on_page_fault(addr.as_u64(), present, write, user) {
        Ok(()) => {}
        Err(e) => {
            crate::log_err!(
                "arch",
                "unresolved #PF addr={:#x} rip={:#x}: {}",
                addr.as_u64(),
                stack.instruction_pointer.as_u64(),
                e
            );
            crate::kernel::kill_current_thread();
        }
    }
}

fn halt_loop() -> ! {
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
    }
}
