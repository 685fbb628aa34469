#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::path::PathBuf;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use sbl_loader::protocol::DEFAULT_BAUD;
use sbl_loader::{hexstr, segment_len, AccessWidth, Image, MemoryImage, Options, Programmer, Value};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Read memory and print or save it
    Read {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        /// Number of bytes to read
        #[structopt(default_value = "1")]
        size: usize,

        /// Access width in bits (8, 16, 32)
        #[structopt(long, default_value = "8")]
        width: AccessWidth,

        /// Write data to a file instead of the console
        #[structopt(long)]
        output: Option<PathBuf>,
    },

    /// Write hex data to memory
    Write {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        /// Data as hex (eg. "de ad be ef")
        data: Value,

        /// Access width in bits (8, 16, 32)
        #[structopt(long, default_value = "8")]
        width: AccessWidth,
    },

    /// Fill memory with a repeating hex pattern
    Fill {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        /// Number of bytes to fill
        size: usize,

        /// Pattern as hex (eg. "aa 55")
        #[structopt(default_value = "00")]
        pattern: Value,

        /// Access width in bits (8, 16, 32)
        #[structopt(long, default_value = "8")]
        width: AccessWidth,
    },

    /// Load a binary image, verify it, and optionally execute it
    Load {
        /// Binary file to load
        file: PathBuf,

        /// Load address
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        /// Skip read back verification
        #[structopt(long)]
        no_verify: bool,

        /// Execute the image from its load address once loaded
        #[structopt(long)]
        exec: bool,

        /// Bytes to read back from the executed image
        #[structopt(long, default_value = "32")]
        rxsize: u8,
    },

    /// Execute code at an address
    Exec {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        /// Data to pass to the called code
        #[structopt(long)]
        data: Option<Value>,

        /// Bytes to read back from the called code
        #[structopt(long, default_value = "0")]
        rxsize: u8,

        /// Do not wait for the command ack
        #[structopt(long)]
        no_ack: bool,

        /// Do not wait for the status word
        #[structopt(long)]
        no_status: bool,
    },
}

/// Parse decimal or 0x prefixed hex integers
fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    }
}

fn progress(len: u64, action: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {bytes}/{total_bytes}")
            .progress_chars("=> "),
    );
    pb.set_message(action);
    pb
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if o.baud != DEFAULT_BAUD {
        debug!("Using non-default baud rate {}", o.baud);
    }

    let loop_size = o.options.loop_size;

    info!("Connecting to serial port");

    let mut p = Programmer::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    info!("Connecting to bootloader");

    p.init().context("Error connecting to bootloader")?;

    info!("Bootloader connected!");

    match o.operation {
        Operation::Read { address, size, width, output } => {
            let data = p.read(address, size, width, loop_size)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &data)?;
                    info!("Wrote {} to {}", bytefmt::format(data.len() as u64), path.display());
                }
                None => {
                    for (i, chunk) in data.chunks(16).enumerate() {
                        println!("{:08x}: {}", address as usize + i * 16, hexstr(chunk));
                    }
                }
            }
        }
        Operation::Write { address, data, width } => {
            let data = data.to_bytes()?;
            p.write(address, &data, width, loop_size)?;
            info!("Wrote {} bytes at 0x{:08x}", data.len(), address);
        }
        Operation::Fill { address, size, pattern, width } => {
            p.fill(address, &pattern, size, width, loop_size)?;
            info!("Filled {} bytes at 0x{:08x}", size, address);
        }
        Operation::Load { file, address, no_verify, exec, rxsize } => {
            let bin = std::fs::read(&file).with_context(|| format!("Error reading {}", file.display()))?;
            let image = Image::from_binary(address, &bin)?;

            info!("Loading {} at 0x{:08x}", bytefmt::format(bin.len() as u64), address);

            let width = AccessWidth::Bits8;
            let segments = image.segments();

            let pb = progress(image.len() as u64, "Loading");
            for s in &segments {
                p.load_segment(&image, s, 0, width, loop_size)?;
                pb.inc(segment_len(s) as u64);
            }
            pb.finish();

            if !no_verify {
                let pb = progress(image.len() as u64, "Verifying");
                for s in &segments {
                    p.verify_segment(&image, s, 0, width, loop_size)?;
                    pb.inc(segment_len(s) as u64);
                }
                pb.finish();
            }

            if exec {
                if let Some(start) = image.start_address() {
                    let entry = start.entry();
                    info!("Executing from 0x{:08x}", entry);

                    // Loaded code does not return to the bootloader
                    let resp = p.exec(entry, None, rxsize, false, false)?;
                    println!("{}", hexstr(&resp));
                }
            }
        }
        Operation::Exec { address, data, rxsize, no_ack, no_status } => {
            let data = data.map(|d| d.to_bytes()).transpose()?;
            let resp = p.exec(address, data.as_deref(), rxsize, !no_ack, !no_status)?;

            if !resp.is_empty() {
                println!("{}", hexstr(&resp));
            }
        }
    }

    Ok(())
}
