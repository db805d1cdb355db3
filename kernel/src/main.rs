//! Kernel binary: entry point, bring-up order, and the panic handler.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use core::panic::PanicInfo;

    use kestrel_kernel::drivers::{keyboard, pit, serial, vga};
    use kestrel_kernel::interrupts::{idt, pic, VECTOR_COUNT};
    use kestrel_kernel::{arch, logger, mm, print, println, sched};

    /// Descriptor slab the loader reserves for the live IDT (0x0600..0x0780).
    const IDT_STORAGE: usize = 0x0600;

    #[no_mangle]
    pub extern "C" fn _start() -> ! {
        kernel_main()
    }

    fn kernel_main() -> ! {
        serial::init();
        logger::init();
        println!("kestrel v{}", env!("CARGO_PKG_VERSION"));
        log::info!(target: "boot", "kestrel v{} booting", env!("CARGO_PKG_VERSION"));

        pic::init();
        // SAFETY: the loader reserves the low-memory slab at IDT_STORAGE
        // for exactly VECTOR_COUNT descriptors.
        unsafe { idt::install(IDT_STORAGE as *mut idt::GateDescriptor, VECTOR_COUNT) };
        mm::init();
        sched::init();
        pit::configure(pit::DEFAULT_TICK_HZ);
        keyboard::init();
        pic::enable(sched::TIMER_VECTOR);
        arch::enable_interrupts();

        if let Err(error) = sched::spawn(echo_keys, 0, "echo", sched::DEFAULT_PRIORITY) {
            panic!("failed to spawn the echo thread: {error}");
        }
        log::info!(target: "boot", "bring-up complete, {} threads", sched::thread_count());

        // The boot flow becomes the idle thread.
        arch::halt();
    }

    /// Consumer side of the keyboard handoff: echo every decoded key.
    extern "C" fn echo_keys(_arg: usize) {
        loop {
            let key = keyboard::next_key();
            print!("{key}");
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        arch::disable_interrupts();
        vga::panic_screen();
        println!("KERNEL PANIC");
        if let Some(location) = info.location() {
            println!("  at {}:{}:{}", location.file(), location.line(), location.column());
        }
        println!("  {}", info.message());
        arch::halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
