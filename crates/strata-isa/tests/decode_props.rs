#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use strata_ir::Arch;
use strata_isa::{BlockDecoder, BlockLimits, DecoderRegistry};

fn decode_inputs() -> impl Strategy<Value = (Arch, Vec<u8>, usize)> {
    let arch = prop_oneof![Just(Arch::X86), Just(Arch::Arm64), Just(Arch::Bytecode)];
    (arch, proptest::collection::vec(any::<u8>(), 0..=64), 0usize..=80)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 2048,
        .. ProptestConfig::default()
    })]

    #[test]
    fn decoders_never_read_out_of_bounds_and_keep_block_invariants(
        (arch, bytes, offset) in decode_inputs(),
    ) {
        let registry = DecoderRegistry::new();
        // Keep addresses aligned so the fixed-width decoder accepts them; the
        // decoder itself only derives sizes from the buffer.
        let address = (offset as u64) * 4;

        let Ok(block) = registry.get(arch).decode_block(&bytes, offset, address, BlockLimits::default()) else {
            return Ok(());
        };

        prop_assert!(block.validate().is_ok(), "invalid block: {block:?}");
        prop_assert_eq!(block.id, block.start_addr);
        prop_assert!(block.end_addr >= block.start_addr);

        if offset >= bytes.len() {
            prop_assert!(block.is_empty());
            prop_assert!(block.successors.is_empty());
        } else {
            // The block never covers more bytes than the buffer holds past
            // `offset`.
            prop_assert!(block.byte_len() <= (bytes.len() - offset) as u64);
            let consumed: u64 = block.insts.iter().map(|i| u64::from(i.size)).sum();
            prop_assert_eq!(consumed, block.byte_len());
        }
    }
}
