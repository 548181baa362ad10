//! End-to-end tests over a hand-built minimal Unicode PST byte buffer: a header plus a
//! single-page NBT and BBT, two empty (`cb == 0`) data blocks for `MESSAGE_STORE` and
//! `ROOT_FOLDER`. No real `.pst` fixture is shipped; everything is assembled in-process.

use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};

use outlook_pst_reader::ndb::NdbCryptMethod;
use outlook_pst_reader::{well_known, BlockId, NodeId, Reader};

const NBT_OFFSET: u64 = 1024;
const BBT_OFFSET: u64 = 1536;
const MSG_STORE_BLOCK_OFFSET: u64 = 2048;
const ROOT_FOLDER_BLOCK_OFFSET: u64 = 2112;
const FILE_EOF: u64 = 2176;
const MSG_STORE_BID: u64 = 4; // BlockId::new(false, 1)
const ROOT_FOLDER_BID: u64 = 8; // BlockId::new(false, 2)

const CRC_POLY: u32 = 0xEDB8_8320;

fn crc_table() -> [u32; 256] {
    let mut table = [0_u32; 256];
    for i in 0..256_u32 {
        let mut value = i;
        for _ in 0..8 {
            value = if value & 1 != 0 {
                (value >> 1) ^ CRC_POLY
            } else {
                value >> 1
            };
        }
        table[i as usize] = value;
    }
    table
}

/// Reflected CRC-32 (IEEE 802.3), matching the wire-format checksum the reader validates
/// page and block trailers against.
fn crc32(seed: u32, data: &[u8]) -> u32 {
    let table = crc_table();
    let mut crc = !seed;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[index];
    }
    !crc
}

fn block_sig(offset: u32, bid: u32) -> u16 {
    let value = offset ^ bid;
    (value >> 16) as u16 ^ (value as u16)
}

fn minimum_index_for_slot(slot: u8) -> u32 {
    match slot {
        0x03 => 0x4000,
        0x04 => 0x1_0000,
        0x08 => 0x8000,
        _ => 0x0400,
    }
}

fn build_header(nbt_offset: u64, bbt_offset: u64, file_eof: u64) -> Vec<u8> {
    let mut buffer = vec![0_u8; 516];
    {
        let mut cursor = Cursor::new(&mut buffer[..]);
        cursor.write_all(b"SM").unwrap();
        cursor.write_u16::<LittleEndian>(23).unwrap(); // wVer: Unicode
        cursor.write_u16::<LittleEndian>(19).unwrap(); // wVerClient
        cursor.write_u8(1).unwrap(); // bPlatformCreate
        cursor.write_u8(1).unwrap(); // bPlatformAccess
        cursor.write_u32::<LittleEndian>(0).unwrap();
        cursor.write_u32::<LittleEndian>(0).unwrap();
        cursor.write_u64::<LittleEndian>(0).unwrap(); // bidUnused
        cursor.write_u64::<LittleEndian>(0).unwrap(); // bidNextP
        cursor.write_u32::<LittleEndian>(1).unwrap(); // dwUnique
        for slot in 0..32_u8 {
            cursor
                .write_u32::<LittleEndian>(minimum_index_for_slot(slot))
                .unwrap();
        }
        cursor.write_u64::<LittleEndian>(0).unwrap(); // qwUnused

        // ROOT (72 bytes)
        cursor.write_u32::<LittleEndian>(0).unwrap();
        cursor.write_u64::<LittleEndian>(file_eof).unwrap();
        cursor.write_u64::<LittleEndian>(0).unwrap(); // ibAMapLast
        cursor.write_u64::<LittleEndian>(0).unwrap(); // cbAMapFree
        cursor.write_u64::<LittleEndian>(0).unwrap(); // cbPMapFree
        cursor.write_u64::<LittleEndian>(0).unwrap(); // bidNBT, unchecked
        cursor.write_u64::<LittleEndian>(nbt_offset).unwrap();
        cursor.write_u64::<LittleEndian>(0).unwrap(); // bidBBT, unchecked
        cursor.write_u64::<LittleEndian>(bbt_offset).unwrap();
        cursor.write_u8(1).unwrap(); // fAMapValid
        cursor.write_u8(0).unwrap();
        cursor.write_u16::<LittleEndian>(0).unwrap();

        cursor.write_u32::<LittleEndian>(0).unwrap(); // dwAlign
        cursor.write_all(&[0_u8; 128]).unwrap(); // rgbFM
        cursor.write_all(&[0_u8; 128]).unwrap(); // rgbFP

        cursor.write_u8(0x80).unwrap(); // bSentinel
        cursor.write_u8(0x01).unwrap(); // bCryptMethod: Permute
        cursor.write_u16::<LittleEndian>(0).unwrap();
        cursor.write_u64::<LittleEndian>(0).unwrap(); // bidNextB
    }

    let mut out = Vec::with_capacity(564);
    out.extend_from_slice(b"!BDN");
    out.extend_from_slice(&crc32(0, &buffer[..471]).to_le_bytes());
    out.extend_from_slice(&buffer);
    out.extend_from_slice(&crc32(0, &buffer).to_le_bytes());
    out.extend_from_slice(&[0_u8; 36]);
    assert_eq!(out.len(), 564);
    out
}

fn build_nbt_entries(records: &[(u32, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(node, data_bid) in records {
        out.write_u64::<LittleEndian>(u64::from(node)).unwrap();
        out.write_u64::<LittleEndian>(data_bid).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap(); // bidSub: none
        out.write_u32::<LittleEndian>(0).unwrap(); // nidParent: none
        out.write_u32::<LittleEndian>(0).unwrap(); // padding
    }
    out
}

fn build_bbt_entries(records: &[(u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(bid, offset) in records {
        out.write_u64::<LittleEndian>(bid).unwrap();
        out.write_u64::<LittleEndian>(offset).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // cb
        out.write_u16::<LittleEndian>(1).unwrap(); // cRef
        out.write_u32::<LittleEndian>(0).unwrap(); // padding
    }
    out
}

fn build_btree_page(
    ptype: u8,
    offset: u32,
    page_bid: u64,
    entries: Vec<u8>,
    entry_size: u8,
    count: u8,
) -> [u8; 512] {
    let mut data = [0_u8; 496];
    data[..entries.len()].copy_from_slice(&entries);
    data[488] = count;
    data[489] = 8; // max_count, unchecked beyond count <= max_count
    data[490] = entry_size;
    data[491] = 0; // level: leaf

    let crc = crc32(0, &data);
    let sig = block_sig(offset, page_bid as u32);

    let mut page = [0_u8; 512];
    page[..496].copy_from_slice(&data);
    page[496] = ptype;
    page[497] = ptype;
    page[498..500].copy_from_slice(&sig.to_le_bytes());
    page[500..504].copy_from_slice(&crc.to_le_bytes());
    page[504..512].copy_from_slice(&page_bid.to_le_bytes());
    page
}

fn build_empty_data_block(bid: u64) -> [u8; 64] {
    let mut block = [0_u8; 64];
    block[48..50].copy_from_slice(&0_u16.to_le_bytes()); // cb
    block[50..52].copy_from_slice(&0_u16.to_le_bytes()); // wSig, unvalidated for data blocks
    block[52..56].copy_from_slice(&crc32(0, &[]).to_le_bytes()); // crc of an empty payload
    block[56..64].copy_from_slice(&bid.to_le_bytes());
    block
}

/// Assemble a minimal Unicode PST file with exactly the given NBT leaf entries (and the two
/// backing data blocks for `MESSAGE_STORE`/`ROOT_FOLDER`, referenced or not).
fn build_pst(nbt_records: &[(u32, u64)]) -> Vec<u8> {
    let mut file = vec![0_u8; FILE_EOF as usize];

    file[..564].copy_from_slice(&build_header(NBT_OFFSET, BBT_OFFSET, FILE_EOF));

    let nbt_entries = build_nbt_entries(nbt_records);
    let nbt_page = build_btree_page(0x81, NBT_OFFSET as u32, 1, nbt_entries, 32, nbt_records.len() as u8);
    file[NBT_OFFSET as usize..NBT_OFFSET as usize + 512].copy_from_slice(&nbt_page);

    let bbt_records = [
        (MSG_STORE_BID, MSG_STORE_BLOCK_OFFSET),
        (ROOT_FOLDER_BID, ROOT_FOLDER_BLOCK_OFFSET),
    ];
    let bbt_entries = build_bbt_entries(&bbt_records);
    let bbt_page = build_btree_page(0x80, BBT_OFFSET as u32, 2, bbt_entries, 24, bbt_records.len() as u8);
    file[BBT_OFFSET as usize..BBT_OFFSET as usize + 512].copy_from_slice(&bbt_page);

    let msg_block = build_empty_data_block(MSG_STORE_BID);
    file[MSG_STORE_BLOCK_OFFSET as usize..MSG_STORE_BLOCK_OFFSET as usize + 64]
        .copy_from_slice(&msg_block);
    let root_block = build_empty_data_block(ROOT_FOLDER_BID);
    file[ROOT_FOLDER_BLOCK_OFFSET as usize..ROOT_FOLDER_BLOCK_OFFSET as usize + 64]
        .copy_from_slice(&root_block);

    file
}

fn write_temp_pst(bytes: &[u8], name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "outlook_pst_reader_test_{}_{name}.pst",
        std::process::id()
    ));
    fs::write(&path, bytes).expect("write temp pst fixture");
    path
}

#[test]
fn reader_open_resolves_well_known_nodes() -> anyhow::Result<()> {
    let bytes = build_pst(&[
        (well_known::MESSAGE_STORE, MSG_STORE_BID),
        (well_known::ROOT_FOLDER, ROOT_FOLDER_BID),
    ]);
    let path = write_temp_pst(&bytes, "happy");

    let outcome = (|| -> anyhow::Result<()> {
        let reader = Reader::open(&path)?;
        assert_eq!(reader.header().crypt_method(), NdbCryptMethod::Permute);

        let store = reader.nbt_get(NodeId::from(well_known::MESSAGE_STORE))?;
        assert_eq!(u64::from(store.data), MSG_STORE_BID);
        assert!(store.sub_node.is_none());

        let bbt_entry = reader.bbt_get(BlockId::from(MSG_STORE_BID))?;
        assert_eq!(bbt_entry.size, 0);

        let data_tree = reader.data_tree(bbt_entry.block, bbt_entry.size)?;
        assert_eq!(data_tree.block_count(), 1);
        assert!(data_tree.concat_all().is_empty());

        let root = reader.nbt_get(NodeId::from(well_known::ROOT_FOLDER))?;
        assert_eq!(u64::from(root.data), ROOT_FOLDER_BID);

        let unknown = NodeId::from(0x41_u32);
        assert!(reader.nbt_get(unknown).is_err());

        Ok(())
    })();

    fs::remove_file(&path).ok();
    outcome
}

#[test]
fn reader_open_rejects_corrupt_header_magic() {
    let mut bytes = build_pst(&[
        (well_known::MESSAGE_STORE, MSG_STORE_BID),
        (well_known::ROOT_FOLDER, ROOT_FOLDER_BID),
    ]);
    bytes[0] ^= 0xFF;
    let path = write_temp_pst(&bytes, "bad_magic");

    let result = Reader::open(&path);
    fs::remove_file(&path).ok();
    assert!(result.is_err());
}

#[test]
fn reader_open_rejects_missing_message_store() {
    let bytes = build_pst(&[(well_known::ROOT_FOLDER, ROOT_FOLDER_BID)]);
    let path = write_temp_pst(&bytes, "missing_store");

    let result = Reader::open(&path);
    fs::remove_file(&path).ok();
    assert!(result.is_err());
}

#[test]
fn reader_open_rejects_duplicate_root_folder() {
    let bytes = build_pst(&[
        (well_known::MESSAGE_STORE, MSG_STORE_BID),
        (well_known::ROOT_FOLDER, ROOT_FOLDER_BID),
        (well_known::ROOT_FOLDER, ROOT_FOLDER_BID),
    ]);
    let path = write_temp_pst(&bytes, "dup_root");

    let result = Reader::open(&path);
    fs::remove_file(&path).ok();
    assert!(result.is_err());
}
