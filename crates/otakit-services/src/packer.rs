//! Firmware data-block packer.
//!
//! Bundles a WiFi firmware binary, a CLM calibration blob, and a BT patch
//! into one combo image: a 184-byte header zero-padded to 256 bytes, then
//! the sections in that order, each starting on an alignment boundary.
//! Metadata is harvested from the inputs themselves: the WiFi version from
//! a `Version: a.b.c.d` marker embedded in the binary, the BT version from
//! the `brcm_patch_version` string in the patch's generated C source, which
//! also names the sibling `<version>.hcd` file that holds the actual patch.
//!
//! Any section may be absent; its offset and size stay zero in the header.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use otakit_core::fwdb::{
    self, FwDataBlockHeader, FwdbError, DEFAULT_ALIGNMENT, FWDB_DATA_START,
};
use zerocopy::byteorder::{U16, U32};
use zerocopy::AsBytes;

/// What to pack and where to put it.
#[derive(Debug, Clone)]
pub struct PackInputs {
    /// WiFi firmware binary.
    pub wifi_src: Option<PathBuf>,
    /// CLM calibration blob.
    pub clm_src: Option<PathBuf>,
    /// Generated C source of the BT patch, e.g. `w_bt_firmware_controller.c`.
    /// The binary patch is the `<brcm_patch_version>.hcd` file next to it.
    pub bt_src: Option<PathBuf>,
    pub out_file: PathBuf,
    /// Section alignment within the block.
    pub alignment: u64,
}

impl PackInputs {
    pub fn new(out_file: impl Into<PathBuf>) -> Self {
        Self {
            wifi_src: None,
            clm_src: None,
            bt_src: None,
            out_file: out_file.into(),
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

/// Summary of a successful pack, for logging and tests.
#[derive(Debug)]
pub struct PackReport {
    pub out_file: PathBuf,
    pub total_size: u64,
    pub crc: u32,
    pub wifi_version: [u16; 4],
    pub bt_version: String,
}

/// Build the data block, stamp the payload CRC, and verify the file on
/// read-back before reporting success.
pub fn pack(inputs: &PackInputs) -> Result<PackReport> {
    if inputs.wifi_src.is_none() && inputs.clm_src.is_none() && inputs.bt_src.is_none() {
        bail!("nothing to pack: no WiFi, CLM, or BT input given");
    }

    let wifi = read_optional(inputs.wifi_src.as_deref()).context("reading WiFi firmware")?;
    let clm = read_optional(inputs.clm_src.as_deref()).context("reading CLM blob")?;

    let mut header = FwDataBlockHeader::default();
    let mut wifi_version = [0u16; 4];
    let mut bt_version = String::new();

    if let Some(ref bytes) = wifi {
        wifi_version = scan_wifi_version(bytes).with_context(|| {
            format!(
                "no 'Version: a.b.c.d' marker in {}",
                inputs.wifi_src.as_deref().unwrap_or(Path::new("?")).display()
            )
        })?;
        header.wifi_version = wifi_version.map(U16::new);
        tracing::info!(
            version = format_args!(
                "{}.{}.{}.{}",
                wifi_version[0], wifi_version[1], wifi_version[2], wifi_version[3]
            ),
            bytes = bytes.len(),
            "WiFi firmware"
        );
    }

    let bt = match inputs.bt_src.as_deref() {
        Some(c_src) => {
            let (version, hcd_path) = parse_bt_patch_source(c_src)?;
            let bytes = std::fs::read(&hcd_path)
                .with_context(|| format!("reading BT patch {}", hcd_path.display()))?;
            header.set_bt_version(&version)?;
            tracing::info!(version, bytes = bytes.len(), "BT patch");
            bt_version = version;
            Some(bytes)
        }
        None => None,
    };

    // Lay the sections out in order, each aligned up from the previous end.
    let mut offset = FWDB_DATA_START;
    let mut place = |size: usize| -> u32 {
        let here = offset;
        offset = fwdb::align_up(offset + size as u64, inputs.alignment);
        here as u32
    };
    if let Some(ref bytes) = wifi {
        header.wifi_offset = U32::new(place(bytes.len()));
        header.wifi_size = U32::new(bytes.len() as u32);
    }
    if let Some(ref bytes) = clm {
        header.clm_offset = U32::new(place(bytes.len()));
        header.clm_size = U32::new(bytes.len() as u32);
    }
    if let Some(ref bytes) = bt {
        header.bt_offset = U32::new(place(bytes.len()));
        header.bt_size = U32::new(bytes.len() as u32);
    }
    let total_size = offset;

    // Assemble the payload (everything past the header block) in one buffer
    // so the CRC can be stamped before anything hits disk.
    let mut payload = Vec::with_capacity((total_size - FWDB_DATA_START) as usize);
    for (section_offset, bytes) in [
        (header.wifi_offset.get(), &wifi),
        (header.clm_offset.get(), &clm),
        (header.bt_offset.get(), &bt),
    ] {
        if let Some(bytes) = bytes {
            let start = section_offset as u64 - FWDB_DATA_START;
            payload.resize(start as usize, 0);
            payload.extend_from_slice(bytes);
        }
    }
    payload.resize((total_size - FWDB_DATA_START) as usize, 0);

    let crc = fwdb::payload_crc(&payload);
    header.crc = U32::new(crc);

    let mut image = Vec::with_capacity(total_size as usize);
    image.extend_from_slice(header.as_bytes());
    image.resize(FWDB_DATA_START as usize, 0);
    image.extend_from_slice(&payload);

    std::fs::write(&inputs.out_file, &image)
        .with_context(|| format!("writing {}", inputs.out_file.display()))?;

    verify(&inputs.out_file).context("read-back verification failed")?;

    tracing::info!(
        out = %inputs.out_file.display(),
        bytes = total_size,
        crc = format_args!("{crc:#010x}"),
        "data block written"
    );
    Ok(PackReport {
        out_file: inputs.out_file.clone(),
        total_size,
        crc,
        wifi_version,
        bt_version,
    })
}

/// Re-read a packed file and check the header and payload CRC.
pub fn verify(path: &Path) -> Result<FwDataBlockHeader> {
    let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let header = fwdb::decode(&image)?;

    if image.len() < FWDB_DATA_START as usize {
        bail!(
            "file shorter than the {FWDB_DATA_START}-byte header block: {} bytes",
            image.len()
        );
    }
    let computed = fwdb::payload_crc(&image[FWDB_DATA_START as usize..]);
    let stored = header.crc.get();
    if stored != computed {
        return Err(FwdbError::CrcMismatch { stored, computed }.into());
    }
    Ok(header)
}

fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(p) => {
            let bytes = std::fs::read(p).with_context(|| p.display().to_string())?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}

/// Find the `Version: a.b.c.d` marker embedded in a WiFi firmware binary
/// and parse the four dotted components.
fn scan_wifi_version(bytes: &[u8]) -> Option<[u16; 4]> {
    const MARKER: &[u8] = b"Version: ";
    let at = bytes
        .windows(MARKER.len())
        .position(|window| window == MARKER)?;
    let tail = &bytes[at + MARKER.len()..];
    let end = tail
        .iter()
        .position(|b| !b.is_ascii_digit() && *b != b'.')
        .unwrap_or(tail.len());
    let text = std::str::from_utf8(&tail[..end]).ok()?;

    let mut version = [0u16; 4];
    let mut parts = text.split('.');
    for slot in &mut version {
        *slot = parts.next()?.parse().ok()?;
    }
    Some(version)
}

/// Pull the patch version out of the generated C source and derive the
/// sibling `<version>.hcd` path that holds the binary patch.
fn parse_bt_patch_source(c_src: &Path) -> Result<(String, PathBuf)> {
    let text = std::fs::read_to_string(c_src)
        .with_context(|| format!("reading {}", c_src.display()))?;

    let line = text
        .lines()
        .find(|line| line.contains("brcm_patch_version"))
        .with_context(|| format!("no brcm_patch_version in {}", c_src.display()))?;

    let first = line.find('"');
    let last = line.rfind('"');
    let version = match (first, last) {
        (Some(l), Some(r)) if r > l + 1 => &line[l + 1..r],
        _ => bail!("brcm_patch_version line has no quoted value: {line}"),
    };

    let hcd_path = c_src.with_file_name(format!("{version}.hcd"));
    Ok((version.to_string(), hcd_path))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("otakit-pack-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write the usual three inputs into `dir` and return the PackInputs.
    fn full_inputs(dir: &Path, wifi: &[u8], clm: &[u8], patch: &[u8]) -> PackInputs {
        let wifi_src = dir.join("wifi.bin");
        let clm_src = dir.join("wifi.clm_blob");
        let bt_c = dir.join("w_bt_firmware_controller.c");
        std::fs::write(&wifi_src, wifi).unwrap();
        std::fs::write(&clm_src, clm).unwrap();
        std::fs::write(
            &bt_c,
            "const char brcm_patch_version[] = \"CYW4343A2_001.003.016.0053.000\";\n",
        )
        .unwrap();
        std::fs::write(dir.join("CYW4343A2_001.003.016.0053.000.hcd"), patch).unwrap();

        let mut inputs = PackInputs::new(dir.join("fw_data_block.bin"));
        inputs.wifi_src = Some(wifi_src);
        inputs.clm_src = Some(clm_src);
        inputs.bt_src = Some(bt_c);
        inputs
    }

    #[test]
    fn packs_all_three_sections_with_aligned_offsets() {
        let dir = temp_dir("full");
        // 5-byte WiFi section forces padding before the CLM blob.
        let wifi = b"\x00Version: 7.45.98.120\x00xyz";
        let inputs = full_inputs(&dir, wifi, b"clm-data", b"\x01\x02\x03");

        let report = pack(&inputs).unwrap();
        assert_eq!(report.wifi_version, [7, 45, 98, 120]);
        assert_eq!(report.bt_version, "CYW4343A2_001.003.016.0053.000");

        let header = verify(&inputs.out_file).unwrap();
        assert_eq!(header.wifi_offset.get(), 256);
        assert_eq!(header.wifi_size.get(), wifi.len() as u32);
        // WiFi ends at 256+25=281; next boundary is 284.
        assert_eq!(header.clm_offset.get(), 284);
        assert_eq!(header.clm_size.get(), 8);
        // CLM ends at 292, already aligned.
        assert_eq!(header.bt_offset.get(), 292);
        assert_eq!(header.bt_size.get(), 3);
        assert_eq!(header.bt_version_str(), "CYW4343A2_001.003.016.0053.000");

        let image = std::fs::read(&inputs.out_file).unwrap();
        assert_eq!(image.len() as u64, report.total_size);
        assert_eq!(&image[256..256 + wifi.len()], wifi);
        assert_eq!(&image[284..292], b"clm-data");
        assert_eq!(&image[292..295], b"\x01\x02\x03");
        // Padding between sections is zero.
        assert_eq!(&image[281..284], &[0, 0, 0]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn aligned_sections_get_no_extra_padding() {
        let dir = temp_dir("aligned");
        let wifi = b"Version: 1.2.3.4\x00\x00\x00\x00"; // 20 bytes, multiple of 4
        let inputs = full_inputs(&dir, wifi, b"12345678", b"ab");

        pack(&inputs).unwrap();
        let header = verify(&inputs.out_file).unwrap();
        assert_eq!(header.clm_offset.get(), 276);
        assert_eq!(header.bt_offset.get(), 284);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clm_only_block_leaves_other_sections_zero() {
        let dir = temp_dir("clm-only");
        let clm_src = dir.join("only.clm_blob");
        std::fs::write(&clm_src, b"calibration").unwrap();
        let mut inputs = PackInputs::new(dir.join("out.bin"));
        inputs.clm_src = Some(clm_src);

        pack(&inputs).unwrap();
        let header = verify(&inputs.out_file).unwrap();
        assert_eq!(header.wifi_size.get(), 0);
        assert_eq!(header.wifi_offset.get(), 0);
        assert_eq!(header.clm_offset.get(), 256);
        assert_eq!(header.clm_size.get(), 11);
        assert_eq!(header.bt_size.get(), 0);
        assert_eq!(header.bt_version_str(), "");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn no_inputs_is_an_error() {
        let inputs = PackInputs::new(std::env::temp_dir().join("otakit-pack-nothing.bin"));
        assert!(pack(&inputs).is_err());
    }

    #[test]
    fn corrupted_payload_fails_verification() {
        let dir = temp_dir("corrupt");
        let inputs = full_inputs(&dir, b"Version: 1.0.0.0 rest", b"clm", b"bt");
        pack(&inputs).unwrap();

        let mut image = std::fs::read(&inputs.out_file).unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xff;
        std::fs::write(&inputs.out_file, &image).unwrap();

        let err = verify(&inputs.out_file).unwrap_err();
        assert!(err.downcast_ref::<FwdbError>().is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wifi_version_scan_handles_surrounding_noise() {
        assert_eq!(
            scan_wifi_version(b"\x01\x02Version: 7.45.98.120 (r678...)\x00"),
            Some([7, 45, 98, 120])
        );
        assert_eq!(scan_wifi_version(b"no marker here"), None);
        assert_eq!(scan_wifi_version(b"Version: 1.2"), None);
    }

    #[test]
    fn bt_patch_source_names_the_sibling_hcd() {
        let dir = temp_dir("btparse");
        let c_src = dir.join("patch.c");
        std::fs::write(
            &c_src,
            "/* generated */\nstatic const char brcm_patch_version[] = \"V9.1\";\n",
        )
        .unwrap();
        let (version, hcd) = parse_bt_patch_source(&c_src).unwrap();
        assert_eq!(version, "V9.1");
        assert_eq!(hcd, dir.join("V9.1.hcd"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bt_patch_source_without_version_is_an_error() {
        let dir = temp_dir("btmissing");
        let c_src = dir.join("patch.c");
        std::fs::write(&c_src, "int x = 1;\n").unwrap();
        assert!(parse_bt_patch_source(&c_src).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
