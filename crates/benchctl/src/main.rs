//! benchctl
//!
//! Command-line tool for the benchusb controller boards: lists attached
//! devices, drives the power relay, reads and writes processor EEPROM,
//! talks to secondary-bus I2C devices, and watches firmware notifications.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use benchusb::{DeviceHandle, DeviceRegistry, ProbeRange, UsbHostBus};
use protocol::BoardKind;

#[derive(Parser, Debug)]
#[command(name = "benchctl")]
#[command(author, version, about = "Control tool for benchusb controller boards")]
#[command(long_about = "
Talks to the bench controller boards over USB: PIC power controllers and
AVR I2C bridge boards are both handled through the same command set.

EXAMPLES:
    # List every attached board
    benchctl list

    # Switch the outlet relay of the power controller with serial 5
    benchctl --serial 5 power on

    # Read one EEPROM byte
    benchctl read-eeprom 0x10

    # Read two bytes from the I2C device at 0x50
    benchctl read-i2c 0x50 0x00 2

    # Watch firmware notifications until Ctrl+C
    benchctl monitor

CONFIGURATION:
    The tool looks for configuration in the following order:
    1. Path specified with --config
    2. ~/.config/benchusb/config.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Only address the board with this serial number
    #[arg(short, long, global = true, value_parser = parse_byte, value_name = "SERIAL")]
    serial: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached boards with their identification data
    #[command(visible_alias = "ls")]
    List,

    /// Switch the outlet relay of a power controller
    Power {
        /// Desired relay state
        state: SwitchState,
    },

    /// Read one EEPROM byte
    ReadEeprom {
        /// EEPROM address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_byte)]
        addr: u8,
    },

    /// Write one EEPROM byte
    WriteEeprom {
        /// EEPROM address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_byte)]
        addr: u8,
        /// Value to store
        #[arg(value_parser = parse_byte)]
        value: u8,
    },

    /// Read bytes from a device on the secondary I2C bus
    ReadI2c {
        /// Seven-bit I2C address
        #[arg(value_parser = parse_byte)]
        device: u8,
        /// Register offset to start at
        #[arg(value_parser = parse_byte)]
        offset: u8,
        /// Number of bytes to read
        #[arg(value_parser = parse_byte, default_value = "1")]
        len: u8,
    },

    /// Write bytes to a device on the secondary I2C bus
    WriteI2c {
        /// Seven-bit I2C address
        #[arg(value_parser = parse_byte)]
        device: u8,
        /// Register offset to start at
        #[arg(value_parser = parse_byte)]
        offset: u8,
        /// Bytes to write
        #[arg(value_parser = parse_byte, num_args = 1.., required = true)]
        data: Vec<u8>,
    },

    /// Ask a board to reboot its firmware
    Reset,

    /// Print firmware notifications until Ctrl+C
    Monitor,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SwitchState {
    On,
    Off,
}

/// Accept plain decimal or 0x-prefixed hex byte values.
fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|_| format!("invalid hex byte: {s}"))
    } else {
        s.parse().map_err(|_| format!("invalid byte value: {s}"))
    }
}

fn setup_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config before anything else touches the bus.
    if args.save_config {
        let config = config::CliConfig::default();
        let path = config::CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("benchctl v{}", env!("CARGO_PKG_VERSION"));

    let bus = UsbHostBus::new().context("Failed to initialize USB host access")?;
    let probe = ProbeRange {
        low: config.i2c.probe_low,
        high: config.i2c.probe_high,
    };
    let mut registry = DeviceRegistry::with_probe_range(Box::new(bus), probe);
    registry.scan().context("Bus scan failed")?;

    match args.command {
        Command::List => list_devices(&mut registry),
        Command::Power { state } => {
            let on = matches!(state, SwitchState::On);
            let device = open_device(&mut registry, Some(BoardKind::Power), args.serial)?;
            device.set_power(on)?;
            println!("Power {}", if on { "on" } else { "off" });
            Ok(())
        }
        Command::ReadEeprom { addr } => {
            let device = open_device(&mut registry, None, args.serial)?;
            let value = device.read_eeprom(addr)?;
            println!("0x{addr:02x} = 0x{value:02x}");
            Ok(())
        }
        Command::WriteEeprom { addr, value } => {
            let device = open_device(&mut registry, None, args.serial)?;
            device.write_eeprom(addr, value)?;
            println!("0x{addr:02x} <- 0x{value:02x}");
            Ok(())
        }
        Command::ReadI2c {
            device,
            offset,
            len,
        } => {
            let handle = open_device(&mut registry, Some(BoardKind::I2c), args.serial)?;
            let data = handle.i2c_read(device, offset, len)?;
            println!("0x{device:02x}[0x{offset:02x}..] = {data:02x?}");
            Ok(())
        }
        Command::WriteI2c {
            device,
            offset,
            data,
        } => {
            let handle = open_device(&mut registry, Some(BoardKind::I2c), args.serial)?;
            let echoed = handle.i2c_write(device, offset, &data)?;
            println!("0x{device:02x}[0x{offset:02x}..] <- {data:02x?} (echo 0x{echoed:02x})");
            Ok(())
        }
        Command::Reset => {
            let device = open_device(&mut registry, None, args.serial)?;
            device.reset_board()?;
            println!("Reset requested");
            Ok(())
        }
        Command::Monitor => monitor(&mut registry, args.serial),
    }
}

/// Pick a device through the registry filters, turning "nothing matched"
/// into a user-facing error.
fn open_device<'a>(
    registry: &'a mut DeviceRegistry,
    kind: Option<BoardKind>,
    serial: Option<u8>,
) -> Result<&'a mut DeviceHandle> {
    match registry.open(kind, serial)? {
        Some(handle) => Ok(handle),
        None => match (kind, serial) {
            (Some(kind), Some(serial)) => {
                bail!("No {kind} board with serial {serial} attached")
            }
            (Some(kind), None) => bail!("No {kind} board attached"),
            (None, Some(serial)) => bail!("No board with serial {serial} attached"),
            (None, None) => bail!("No boards attached"),
        },
    }
}

/// Query every attached board and print its identification data.
fn list_devices(registry: &mut DeviceRegistry) -> Result<()> {
    registry.query_all();

    if registry.is_empty() {
        println!("No boards found.");
        return Ok(());
    }

    println!("Found {} board(s):\n", registry.len());
    for handle in registry.list() {
        println!(
            "  {}  [{}]  {}",
            handle.path(),
            handle.driver().name(),
            handle.signature()
        );

        let Some(profile) = handle.profile() else {
            println!("      identification query failed\n");
            continue;
        };

        println!(
            "      Serial: {}  Firmware: {}  Board: {}",
            profile.serial, profile.firmware, profile.board
        );
        println!(
            "      Processor: {} @ {} MHz  EEPROM: {}",
            profile.processor,
            profile.speed_mhz,
            if profile.has_eeprom { "yes" } else { "no" }
        );
        if let Some(power) = &profile.power {
            println!(
                "      Power: {} A across {} outlet(s)",
                power.current_amps, power.outlets
            );
        }
        for device in &profile.i2c_devices {
            println!("      I2C 0x{:02x}: {}", device.address, device.label());
        }
        println!();
    }

    Ok(())
}

/// Print notifications from one board until Ctrl+C.
fn monitor(registry: &mut DeviceRegistry, serial: Option<u8>) -> Result<()> {
    let path = {
        let device = open_device(registry, None, serial)?;
        device.path().to_string()
    };

    let printer_path = path.clone();
    registry.register_callback(
        &path,
        Box::new(move |tag, payload| {
            println!("[{printer_path}] tag 0x{tag:02x} payload {payload:02x?}");
        }),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    println!("Monitoring {path}; press Ctrl+C to stop");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    registry.unregister_callback(&path);
    println!("\nStopped");
    Ok(())
}
