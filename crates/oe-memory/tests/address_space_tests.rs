//! Tests for the guest address space layout and typed access

use oe_memory::{constants::*, Address, MemoryManager, PageFlags};

#[test]
fn test_address_space_boundaries() {
    let mem = MemoryManager::new().unwrap();

    let addr = Address(CODE_BASE);
    mem.write::<u32>(addr, 0xDEADBEEF).unwrap();
    assert_eq!(mem.read::<u32>(addr).unwrap(), 0xDEADBEEF);

    // Last word of the code region
    let addr = Address(CODE_BASE + CODE_SIZE - 4);
    mem.write::<u32>(addr, 0xCAFEBABE).unwrap();
    assert_eq!(mem.read::<u32>(addr).unwrap(), 0xCAFEBABE);

    // Straddling the end of the region is rejected
    assert!(mem.read::<u64>(Address(CODE_BASE + CODE_SIZE - 4)).is_err());

    let alloc_addr = mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
    assert!(alloc_addr.get() >= HEAP_BASE);
    assert!(alloc_addr.get() < HEAP_BASE + DEFAULT_HEAP_SIZE);

    mem.write::<u64>(alloc_addr, 0x1234567890ABCDEF).unwrap();
    assert_eq!(mem.read::<u64>(alloc_addr).unwrap(), 0x1234567890ABCDEF);
}

#[test]
fn test_unmapped_access_fails() {
    let mem = MemoryManager::new().unwrap();

    assert!(mem.read::<u32>(Address(0x8000_0000)).is_err());
    assert!(mem.write::<u8>(Address(0xFBAD_CDE0), 1).is_err());
    assert!(!mem.is_mapped(Address(CODE_BASE + CODE_SIZE), 1));
}

#[test]
fn test_memory_region_isolation() {
    let mem = MemoryManager::new().unwrap();

    let code_addr = Address(CODE_BASE + 0x1000);
    mem.write::<u32>(code_addr, 0x11111111).unwrap();

    let heap_addr = mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
    mem.write::<u32>(heap_addr, 0x22222222).unwrap();

    let stack_top = mem.allocate_stack(0x4000).unwrap();
    mem.write::<u32>(stack_top - 4, 0x33333333).unwrap();

    assert_eq!(mem.read::<u32>(code_addr).unwrap(), 0x11111111);
    assert_eq!(mem.read::<u32>(heap_addr).unwrap(), 0x22222222);
    assert_eq!(mem.read::<u32>(stack_top - 4).unwrap(), 0x33333333);
}

#[test]
fn test_allocations_do_not_overlap() {
    let mem = MemoryManager::new().unwrap();

    let size = 0x100000;
    let addr1 = mem.allocate(size, 0x1000, PageFlags::RW).unwrap();
    for i in 0..100 {
        mem.write::<u32>(addr1 + i * 4, i).unwrap();
    }

    let addr2 = mem.allocate(size, 0x1000, PageFlags::RW).unwrap();
    assert!(addr2 - addr1 >= size);

    mem.write::<u32>(addr2, 0xFFFFFFFF).unwrap();
    assert_eq!(mem.read::<u32>(addr1).unwrap(), 0);
    assert_eq!(mem.read::<u32>(addr1 + 4).unwrap(), 1);
}

#[test]
fn test_allocation_size_rounding() {
    let mem = MemoryManager::new().unwrap();

    let addr1 = mem.allocate(0x1001, 0x1000, PageFlags::RW).unwrap();
    let addr2 = mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
    assert!(addr1.is_aligned(PAGE_SIZE));
    assert!(addr2.is_aligned(PAGE_SIZE));
    assert!(addr2 - addr1 >= 0x2000);
}

#[test]
fn test_heap_exhaustion() {
    let mem = MemoryManager::new().unwrap();
    assert!(mem.allocate(DEFAULT_HEAP_SIZE, PAGE_SIZE, PageFlags::RW).is_ok());
    assert!(mem.allocate(1, PAGE_SIZE, PageFlags::RW).is_err());
}

#[test]
fn test_unaligned_access() {
    let mem = MemoryManager::new().unwrap();
    let addr = Address(CODE_BASE + 1);

    mem.write::<u32>(addr, 0x12345678).unwrap();
    assert_eq!(mem.read::<u32>(addr).unwrap(), 0x12345678);

    mem.write::<u64>(addr, 0xDEADBEEFCAFEBABE).unwrap();
    assert_eq!(mem.read::<u64>(addr).unwrap(), 0xDEADBEEFCAFEBABE);
}

#[test]
fn test_big_endian_layout() {
    let mem = MemoryManager::new().unwrap();
    let addr = Address(CODE_BASE + 0x1000);

    mem.write::<u16>(addr, 0x1234).unwrap();
    assert_eq!(mem.read::<u8>(addr).unwrap(), 0x12);
    assert_eq!(mem.read::<u8>(addr + 1).unwrap(), 0x34);
    assert_eq!(mem.read_be16(addr).unwrap(), 0x1234);

    mem.write_be32(addr + 4, 0x12345678).unwrap();
    let mut bytes = [0u8; 4];
    mem.read_bytes(addr + 4, &mut bytes).unwrap();
    assert_eq!(bytes, [0x12, 0x34, 0x56, 0x78]);

    mem.write::<f32>(addr + 8, 1.0).unwrap();
    assert_eq!(mem.read_be32(addr + 8).unwrap(), 0x3F80_0000);

    mem.write::<u64>(addr + 16, 0xDEADBEEFCAFEBABE).unwrap();
    assert_eq!(mem.read_be64(addr + 16).unwrap(), 0xDEADBEEFCAFEBABE);
    assert_eq!(mem.read_be32(addr + 16).unwrap(), 0xDEADBEEF);
}

#[test]
fn test_thunk_region_is_executable() {
    let mem = MemoryManager::new().unwrap();
    let thunk = mem.allocate_thunk(8).unwrap();
    assert!(thunk.get() >= THUNK_BASE);

    mem.write_be32(thunk, 0x4400_0003).unwrap();
    assert_eq!(mem.fetch_instruction(thunk).unwrap(), 0x4400_0003);
}
