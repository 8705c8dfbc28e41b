use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::{path::PathBuf, time::Duration};

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read frames from the serial port and serve Modbus TCP and SNMP
    Run,
    /// Feed a captured byte stream from a file instead of the serial port, then keep serving
    Replay {
        /// File containing raw serial bytes
        file: PathBuf,
    },
    /// Decode hex encoded frames and print the resulting store as JSON
    Decode {
        /// Frames as hex, e.g. "80 05 0A 02 00 01 03 02 05 07 00"
        #[arg(required = true)]
        frames: Vec<String>,
    },
    /// Decode hex encoded frames and print a register block
    Registers {
        /// First register address
        start: u16,
        /// Number of registers (at most 125)
        quantity: u16,
        /// Frames as hex, applied before reading
        frames: Vec<String>,
    },
}

const fn about_text() -> &'static str {
    "multi-arm battery rig telemetry gateway"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Serial baud rate
    #[arg(short, long, default_value_t = 9600)]
    pub baud: u32,

    /// Timeout for serial reads (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub timeout: Duration,

    /// YAML configuration for the listeners; built-in defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommands,
}

/// Parses "80 05 0A", "80050A" or "80:05:0a" into bytes.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    if !digits.is_ascii() {
        return Err(format!("non hex characters in '{text}'"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{text}'"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("invalid hex byte '{}' in '{text}'", &digits[i..i + 2]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = CliArgs::parse_from(["armbms-gateway", "run"]);
        assert_eq!(args.baud, 9600);
        assert_eq!(args.timeout, Duration::from_millis(100));
        assert_eq!(args.config, None);
        assert_eq!(args.command, CliCommands::Run);
    }

    #[test]
    fn registers_subcommand() {
        let args = CliArgs::parse_from(["armbms-gateway", "registers", "0", "4", "81 7E 00 00 07 00"]);
        assert_eq!(
            args.command,
            CliCommands::Registers {
                start: 0,
                quantity: 4,
                frames: vec!["81 7E 00 00 07 00".into()]
            }
        );
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("80 05 0a").unwrap(), vec![0x80, 0x05, 0x0A]);
        assert_eq!(parse_hex("80:7E").unwrap(), vec![0x80, 0x7E]);
        assert_eq!(parse_hex("0x807E").unwrap(), vec![0x80, 0x7E]);
        assert!(parse_hex("80 0").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
