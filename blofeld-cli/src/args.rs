//! Command-line parsing.

use blofeld_types::{DEVICE_BANKS, PROGRAMS_PER_BANK};

pub const USAGE: &str = "\
usage: blofeld [options] <command>

commands:
  ports                 list MIDI ports
  identify              ask the device who it is
  dump single <slot>    fetch one sound, e.g. A001 or C128
  dump bank <bank>      fetch one bank, A-H
  dump all              fetch banks A-H

options:
  -v, --verbose         debug logging
  --json                print results as JSON
  --input <pattern>     input port name to match
  --output <pattern>    output port name to match
  --timeout <seconds>   give up waiting for the device (default 5)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpTarget {
    Single { bank: u8, program: u8 },
    Bank(u8),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ports,
    Identify,
    Dump(DumpTarget),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub command: Command,
    pub verbose: bool,
    pub json: bool,
    pub input: Option<String>,
    pub output: Option<String>,
    pub timeout_secs: u64,
}

/// Bank letter A-H (or a, or 1-8).
pub fn parse_bank(s: &str) -> Option<u8> {
    let bank = match s.as_bytes() {
        [c @ b'A'..=b'Z'] => c - b'A',
        [c @ b'a'..=b'z'] => c - b'a',
        _ => s.parse::<u8>().ok()?.checked_sub(1)?,
    };
    ((bank as usize) < DEVICE_BANKS).then_some(bank)
}

/// Slot in display form: bank letter plus 1-based program, e.g. "B017".
pub fn parse_slot(s: &str) -> Option<(u8, u8)> {
    let letter = s.get(..1)?;
    let bank = parse_bank(letter)?;
    let program: usize = s.get(1..)?.parse().ok()?;
    if (1..=PROGRAMS_PER_BANK).contains(&program) {
        Some((bank, (program - 1) as u8))
    } else {
        None
    }
}

pub fn parse(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        command: Command::Help,
        verbose: false,
        json: false,
        input: None,
        output: None,
        timeout_secs: 5,
    };
    let mut words: Vec<&str> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => options.verbose = true,
            "--json" => options.json = true,
            "-h" | "--help" => return Ok(options),
            "--input" => options.input = Some(value(&mut iter, "--input")?),
            "--output" => options.output = Some(value(&mut iter, "--output")?),
            "--timeout" => {
                let raw = value(&mut iter, "--timeout")?;
                options.timeout_secs = raw
                    .parse()
                    .map_err(|_| format!("--timeout expects seconds, got '{}'", raw))?;
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option '{}'", flag)),
            word => words.push(word),
        }
    }

    options.command = match words.as_slice() {
        [] | ["help"] => Command::Help,
        ["ports"] => Command::Ports,
        ["identify"] => Command::Identify,
        ["dump", "all"] => Command::Dump(DumpTarget::All),
        ["dump", "bank", bank] => Command::Dump(DumpTarget::Bank(
            parse_bank(bank).ok_or_else(|| format!("no device bank '{}'", bank))?,
        )),
        ["dump", "single", slot] => {
            let (bank, program) =
                parse_slot(slot).ok_or_else(|| format!("no device slot '{}'", slot))?;
            Command::Dump(DumpTarget::Single { bank, program })
        }
        _ => return Err(format!("unknown command '{}'", words.join(" "))),
    };
    Ok(options)
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("{} needs a value", flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn bank_forms() {
        assert_eq!(parse_bank("A"), Some(0));
        assert_eq!(parse_bank("h"), Some(7));
        assert_eq!(parse_bank("3"), Some(2));
        assert_eq!(parse_bank("I"), None);
        assert_eq!(parse_bank("0"), None);
        assert_eq!(parse_bank("AB"), None);
    }

    #[test]
    fn slot_forms() {
        assert_eq!(parse_slot("A001"), Some((0, 0)));
        assert_eq!(parse_slot("c128"), Some((2, 127)));
        assert_eq!(parse_slot("B17"), Some((1, 16)));
        assert_eq!(parse_slot("A000"), None);
        assert_eq!(parse_slot("A129"), None);
        assert_eq!(parse_slot("Z001"), None);
        assert_eq!(parse_slot(""), None);
    }

    #[test]
    fn commands_and_flags() {
        let options = parse(&args("-v --json dump bank B --input usb")).unwrap();
        assert_eq!(options.command, Command::Dump(DumpTarget::Bank(1)));
        assert!(options.verbose);
        assert!(options.json);
        assert_eq!(options.input.as_deref(), Some("usb"));

        assert_eq!(parse(&args("ports")).unwrap().command, Command::Ports);
        assert_eq!(parse(&args("")).unwrap().command, Command::Help);
        assert_eq!(
            parse(&args("dump single D064")).unwrap().command,
            Command::Dump(DumpTarget::Single { bank: 3, program: 63 })
        );
        assert_eq!(parse(&args("--timeout 30 identify")).unwrap().timeout_secs, 30);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&args("dump bank X")).is_err());
        assert!(parse(&args("dump")).is_err());
        assert!(parse(&args("--frobnicate ports")).is_err());
        assert!(parse(&args("ports --input")).is_err());
        assert!(parse(&args("--timeout soon identify")).is_err());
    }
}
