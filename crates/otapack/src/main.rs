//! otapack — builds a firmware data block from WiFi, CLM, and BT inputs.

use std::path::PathBuf;

use anyhow::{Context, Result};

use otakit_core::fwdb::DEFAULT_ALIGNMENT;
use otakit_services::packer::{self, PackInputs};

const DEFAULT_OUT_FILE: &str = "fw_data_block.bin";

fn print_usage() {
    println!("Usage: otapack [options]");
    println!();
    println!("Options:");
    println!("  -wifi_src <file>   WiFi firmware binary");
    println!("  -clm_src <file>    CLM blob");
    println!("  -bt_src <file>     BT patch C source (the .hcd must sit next to it)");
    println!("  -out_file <file>   output filename (default: {DEFAULT_OUT_FILE})");
    println!("  -a <align>         section alignment in bytes (default: {DEFAULT_ALIGNMENT})");
    println!("  -l                 verbose logging");
}

/// Consume the value following a flag, advancing the cursor past it.
fn take<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut inputs = PackInputs::new(DEFAULT_OUT_FILE);
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-wifi_src" => inputs.wifi_src = Some(PathBuf::from(take(&args, &mut i)?)),
            "-clm_src" => inputs.clm_src = Some(PathBuf::from(take(&args, &mut i)?)),
            "-bt_src" => inputs.bt_src = Some(PathBuf::from(take(&args, &mut i)?)),
            "-out_file" => inputs.out_file = PathBuf::from(take(&args, &mut i)?),
            "-a" => {
                inputs.alignment = take(&args, &mut i)?
                    .parse()
                    .context("-a must be a number of bytes")?
            }
            "-l" => verbose = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown option: {other}");
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let report = packer::pack(&inputs)?;

    println!("Wrote {}", report.out_file.display());
    println!("  size : {} bytes", report.total_size);
    println!("  crc  : {:#010x}", report.crc);
    if report.wifi_version != [0; 4] {
        let [a, b, c, d] = report.wifi_version;
        println!("  wifi : {a}.{b}.{c}.{d}");
    }
    if !report.bt_version.is_empty() {
        println!("  bt   : {}", report.bt_version);
    }
    Ok(())
}
