//! Packer round trips: build a data block from real files on disk, verify
//! it, and push it through the transfer path.

use otakit_core::fwdb::{self, FWDB_DATA_START};
use otakit_core::wire::ChunkHeader;
use otakit_services::packer::{self, PackInputs};
use otakit_services::{Outcome, Session};
use zerocopy::AsBytes;

use crate::Scratch;

const BT_VERSION: &str = "CYW4343A2_001.003.016.0053.000";

/// Lay down the three input files and return ready-to-pack inputs.
fn write_inputs(scratch: &Scratch, wifi: &[u8], clm: &[u8], patch: &[u8]) -> PackInputs {
    let wifi_src = scratch.path("4343WA1.bin");
    let clm_src = scratch.path("4343WA1.clm_blob");
    let bt_c = scratch.path("w_bt_firmware_controller.c");
    std::fs::write(&wifi_src, wifi).unwrap();
    std::fs::write(&clm_src, clm).unwrap();
    std::fs::write(
        &bt_c,
        format!("const char brcm_patch_version[] = \"{BT_VERSION}\";\n"),
    )
    .unwrap();
    std::fs::write(scratch.path(&format!("{BT_VERSION}.hcd")), patch).unwrap();

    let mut inputs = PackInputs::new(scratch.path("fw_data_block.bin"));
    inputs.wifi_src = Some(wifi_src);
    inputs.clm_src = Some(clm_src);
    inputs.bt_src = Some(bt_c);
    inputs
}

fn wifi_image(len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i % 199) as u8).collect();
    image[100..121].copy_from_slice(b"Version: 7.45.98.120\x00");
    image
}

#[test]
fn packed_block_verifies_and_carries_its_metadata() {
    let scratch = Scratch::new("pack-verify");
    let wifi = wifi_image(5000);
    let clm = vec![0x5a; 1201];
    let patch = vec![0xbd; 777];
    let inputs = write_inputs(&scratch, &wifi, &clm, &patch);

    let report = packer::pack(&inputs).unwrap();
    assert_eq!(report.wifi_version, [7, 45, 98, 120]);
    assert_eq!(report.bt_version, BT_VERSION);

    let header = packer::verify(&inputs.out_file).unwrap();
    assert_eq!(header.wifi_offset.get() as u64, FWDB_DATA_START);
    assert_eq!(header.wifi_size.get(), 5000);
    assert_eq!(header.clm_offset.get(), 5256);
    assert_eq!(header.clm_size.get(), 1201);
    // 5256 + 1201 = 6457, aligned up to 6460.
    assert_eq!(header.bt_offset.get(), 6460);
    assert_eq!(header.bt_size.get(), 777);
    assert_eq!(header.bt_version_str(), BT_VERSION);

    let image = std::fs::read(&inputs.out_file).unwrap();
    assert_eq!(&image[256..5256], &wifi[..]);
    assert_eq!(&image[5256..6457], &clm[..]);
    assert_eq!(&image[6460..7237], &patch[..]);
    assert_eq!(
        fwdb::payload_crc(&image[FWDB_DATA_START as usize..]),
        header.crc.get()
    );
}

#[test]
fn wider_alignment_spreads_the_sections() {
    let scratch = Scratch::new("pack-align");
    let mut inputs = write_inputs(&scratch, &wifi_image(1001), b"abc", b"xy");
    inputs.alignment = 512;

    packer::pack(&inputs).unwrap();
    let header = packer::verify(&inputs.out_file).unwrap();
    // 256 + 1001 = 1257, next 512 boundary is 1536.
    assert_eq!(header.clm_offset.get(), 1536);
    assert_eq!(header.bt_offset.get(), 2048);
}

#[test]
fn bit_flip_in_a_section_fails_verification() {
    let scratch = Scratch::new("pack-tamper");
    let inputs = write_inputs(&scratch, &wifi_image(600), b"clm", b"patch");
    packer::pack(&inputs).unwrap();

    let mut image = std::fs::read(&inputs.out_file).unwrap();
    image[300] ^= 0x01;
    std::fs::write(&inputs.out_file, &image).unwrap();

    assert!(packer::verify(&inputs.out_file).is_err());
}

#[test]
fn packed_block_survives_chunked_delivery() {
    let scratch = Scratch::new("pack-transfer");
    let inputs = write_inputs(&scratch, &wifi_image(9000), &vec![0x11; 2000], &vec![0x22; 500]);
    packer::pack(&inputs).unwrap();
    let block = std::fs::read(&inputs.out_file).unwrap();

    // Ship the block through the OTA transfer path and verify the copy.
    let topic = "anycloud/kit/subscriber/image7";
    let delivered = scratch.path("delivered.bin");
    let mut session = Session::new(topic, &delivered, false);

    let chunk_size = 4096;
    let total = block.len().div_ceil(chunk_size) as u32;
    let mut completed = false;
    for (index, payload) in block.chunks(chunk_size).enumerate() {
        let mut message = ChunkHeader::new(index as u16, total, payload.len() as u32)
            .as_bytes()
            .to_vec();
        message.extend_from_slice(payload);
        if let (Outcome::Completed(_), _) = session.handle_message(topic, &message) {
            completed = true;
        }
    }
    assert!(completed);
    assert_eq!(std::fs::read(&delivered).unwrap(), block);
    packer::verify(&delivered).unwrap();
}
