//! End-to-end coverage: a hand-assembled 16 KiB INDEX page carrying two
//! clustered-index leaf records, walked and decoded through the public
//! API exactly the way `ibd_dump` does it.

use innodb::innodb::page::index::IndexPage;
use innodb::innodb::page::record::{RecordType, INFIMUM_ORIGIN, SUPREMUM_ORIGIN};
use innodb::innodb::page::{Page, FIL_PAGE_SIZE};
use innodb::innodb::table::field::{ColumnValue, Field, FieldType};
use innodb::innodb::table::TableDefinition;
use innodb::innodb::ErrorKind;

const INDEX_PAGE_TYPE: u16 = 0x45BF;
const FIL_TRAILER_SIZE: usize = 8;

fn users_table() -> TableDefinition {
    TableDefinition {
        name: "users".into(),
        columns: vec![
            Field::new("id", FieldType::Int(false), false),
            Field::new(
                "name",
                FieldType::Text(10, innodb::innodb::charset::InnoDBCharset::Ascii),
                false,
            ),
            Field::new("age", FieldType::TinyInt(true), true),
        ],
        pk_len: 1,
    }
}

fn write_record_header(page: &mut [u8], origin: usize, rt: RecordType, next_origin: Option<usize>) {
    let h = origin - 5;
    let rel: i32 = match next_origin {
        None => 0,
        Some(next) => next as i32 - origin as i32,
    };
    page[h] = 0;
    let type_and_heap = rt as u16; // heap number 0, fine for this test
    page[h + 1..h + 3].copy_from_slice(&type_and_heap.to_be_bytes());
    page[h + 3..h + 5].copy_from_slice(&(rel as i16).to_be_bytes());
}

/// Builds a three-record chain (INFIMUM -> rec(id=1,"ann",30) ->
/// rec(id=2,"bob",NULL) -> SUPREMUM) laid out per spec.md's compact
/// record format (S2/S3/S4 scenarios combined into one page).
fn build_users_page() -> Vec<u8> {
    let mut page = vec![0u8; FIL_PAGE_SIZE];

    // FIL header
    page[24..26].copy_from_slice(&INDEX_PAGE_TYPE.to_be_bytes());
    page[8..12].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    page[12..16].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    // last_mod_lsn = 0, trailer low32 = 0: envelope validates trivially.

    // INDEX header (offset 38, 36 bytes)
    page[38..40].copy_from_slice(&2u16.to_be_bytes()); // 2 directory slots
    page[42..44].copy_from_slice(&(0x8000u16 | 4u16).to_be_bytes()); // compact, 4 heap recs
    page[54..56].copy_from_slice(&4u16.to_be_bytes()); // number_of_records
    page[64..66].copy_from_slice(&0u16.to_be_bytes()); // page_level = 0 (leaf)

    // System records
    page[INFIMUM_ORIGIN..INFIMUM_ORIGIN + 8].copy_from_slice(b"infimum\0");
    page[SUPREMUM_ORIGIN..SUPREMUM_ORIGIN + 8].copy_from_slice(b"supremum");

    const REC1_ORIGIN: usize = 150;
    const REC2_ORIGIN: usize = 200;

    write_record_header(&mut page, INFIMUM_ORIGIN, RecordType::Infimum, Some(REC1_ORIGIN));
    write_record_header(&mut page, REC1_ORIGIN, RecordType::Conventional, Some(REC2_ORIGIN));
    write_record_header(&mut page, REC2_ORIGIN, RecordType::Conventional, Some(SUPREMUM_ORIGIN));
    write_record_header(&mut page, SUPREMUM_ORIGIN, RecordType::Supremum, None);

    // Both records have exactly one nullable column ("age", a single
    // null-bitmap byte) and one variable column ("name", a 1-byte
    // length since its declared max of 10 is under the 255 threshold).
    // Layout going backward from `origin`: [length byte][bitmap byte][5-byte header].

    // Record 1: id=1, name="ann", age=30 (not null).
    page[REC1_ORIGIN - 7] = 3; // variable length of "name" = 3
    page[REC1_ORIGIN - 6] = 0x00; // null bitmap: age present
    page[REC1_ORIGIN..REC1_ORIGIN + 4].copy_from_slice(&1u32.to_be_bytes());
    let rec1_name_start = REC1_ORIGIN + 4 + 13;
    page[rec1_name_start..rec1_name_start + 3].copy_from_slice(b"ann");
    page[rec1_name_start + 3] = 30u8 ^ 0x80; // sign-bit-flipped encoding of +30

    // Record 2: id=2, name="bob", age=NULL.
    page[REC2_ORIGIN - 7] = 3; // variable length of "name" = 3
    page[REC2_ORIGIN - 6] = 0x80; // null bitmap: age is null (MSB of single byte)
    page[REC2_ORIGIN..REC2_ORIGIN + 4].copy_from_slice(&2u32.to_be_bytes());
    let rec2_name_start = REC2_ORIGIN + 4 + 13;
    page[rec2_name_start..rec2_name_start + 3].copy_from_slice(b"bob");

    // Physical (low-to-high address) order is the reverse of logical
    // slot order: slot 1 (supremum) nearest the heap, slot 0 (infimum)
    // nearest the trailer (spec.md §4.3 step 5).
    let dir_start = FIL_PAGE_SIZE - FIL_TRAILER_SIZE - 2 * 2;
    page[dir_start..dir_start + 2].copy_from_slice(&(SUPREMUM_ORIGIN as u16).to_be_bytes());
    page[dir_start + 2..dir_start + 4].copy_from_slice(&(INFIMUM_ORIGIN as u16).to_be_bytes());

    page
}

#[test]
fn decodes_all_rows_from_a_synthetic_leaf_page() {
    let raw = build_users_page();
    let page = Page::from_bytes(&raw).unwrap();
    page.validate_envelope().unwrap();
    let index_page = IndexPage::from_page(&page).unwrap();
    assert!(index_page.is_leaf());

    let table = users_table();

    let mut rows = Vec::new();
    for cursor in index_page.walk_records(1000, true) {
        let cursor = cursor.unwrap();
        assert_eq!(cursor.header.record_type, RecordType::Conventional);
        let record = table.decode_record(index_page.raw(), cursor.origin, true, true).unwrap();
        assert_eq!(record.origin, cursor.origin);
        rows.push(record.fields);
    }

    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0][0], ("id".to_string(), ColumnValue::UnsignedInt(1)));
    assert_eq!(rows[0][1], ("name".to_string(), ColumnValue::Text("ann".to_string())));
    assert_eq!(rows[0][2], ("age".to_string(), ColumnValue::SignedInt(30)));

    assert_eq!(rows[1][0], ("id".to_string(), ColumnValue::UnsignedInt(2)));
    assert_eq!(rows[1][1], ("name".to_string(), ColumnValue::Text("bob".to_string())));
    assert_eq!(rows[1][2], ("age".to_string(), ColumnValue::Null));
}

#[test]
fn skip_system_records_false_surfaces_sentinels_first_and_last() {
    let raw = build_users_page();
    let page = Page::from_bytes(&raw).unwrap();
    let index_page = IndexPage::from_page(&page).unwrap();

    let types: Vec<RecordType> = index_page
        .walk_records(1000, false)
        .map(|r| r.unwrap().header.record_type)
        .collect();

    assert_eq!(types.first(), Some(&RecordType::Infimum));
    assert_eq!(types.last(), Some(&RecordType::Supremum));
    assert_eq!(types.len(), 4);
}

#[test]
fn redundant_format_page_is_rejected_before_any_record_is_touched() {
    let mut raw = build_users_page();
    raw[42..44].copy_from_slice(&4u16.to_be_bytes()); // clear compact bit
    let page = Page::from_bytes(&raw).unwrap();
    let err = IndexPage::from_page(&page).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedRedundantFormat);
}
