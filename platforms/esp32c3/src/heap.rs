use core::mem::MaybeUninit;
use esp_alloc::EspHeap;

#[global_allocator]
static HEAP: EspHeap = EspHeap::empty();

pub const HEAP_SIZE: usize = 1024 * 16;

/// Initialize the heap.
///
/// # Safety
///
/// Must only be called once, before anything allocates.
pub unsafe fn init() {
    static mut HEAP_MEM: MaybeUninit<[u8; HEAP_SIZE]> = MaybeUninit::uninit();
    HEAP.init(HEAP_MEM.as_mut_ptr().cast(), HEAP_SIZE)
}
