//! Integration-level coverage of the segment table's public contract,
//! exercised the way a loader or interpreter actually would — through
//! `regvm::prelude` rather than any internal test seam.

use regvm::prelude::*;

#[test]
fn code_segment_starts_as_the_loaded_image() {
    let table = SegmentTable::new(vec![1, 2, 3, 4]);
    assert_eq!(table.code(), &[1, 2, 3, 4]);
}

#[test]
fn map_unmap_map_cycle_recycles_storage_and_rezeroes() {
    let mut table = SegmentTable::new(vec![]);

    let a = table.map(8).unwrap();
    for i in 0..8 {
        table.write(a, i, 0xDEAD_BEEF);
    }
    table.unmap(a);

    let b = table.map(4).unwrap();
    assert_eq!(a, b, "the freed identifier should be recycled LIFO");
    for i in 0..4 {
        assert_eq!(table.read(b, i), 0, "recycled storage must be rezeroed");
    }
}

#[test]
fn load_replaces_the_code_segment_wholesale() {
    let mut table = SegmentTable::new(vec![0xAAAA_AAAA]);
    let replacement = table.map(2).unwrap();
    table.write(replacement, 0, 0x1111_1111);
    table.write(replacement, 1, 0x2222_2222);

    table.load(replacement);

    assert_eq!(table.code(), &[0x1111_1111, 0x2222_2222]);
}

#[test]
fn multiple_live_segments_are_independent() {
    let mut table = SegmentTable::new(vec![]);
    let a = table.map(1).unwrap();
    let b = table.map(1).unwrap();

    table.write(a, 0, 10);
    table.write(b, 0, 20);

    assert_eq!(table.read(a, 0), 10);
    assert_eq!(table.read(b, 0), 20);
}
