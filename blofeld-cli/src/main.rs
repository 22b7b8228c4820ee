mod args;

use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use args::{Command, DumpTarget, Options};
use blofeld_core::config::{Config, MidiSettings};
use blofeld_core::dump::{DumpProgress, DumpReport};
use blofeld_core::librarian::{Librarian, LibrarianEvent};
use blofeld_core::midi::midir_backend;
use blofeld_types::{bank_letter, SoundRecord};

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

fn init_logging(verbose: bool) {
    use simplelog::{LevelFilter, WriteLogger};

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("blofeld-librarian")
        .join("blofeld.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path).or_else(|_| File::create("/tmp/blofeld.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("blofeld: logging disabled, cannot create log file: {}", e);
            return;
        }
    };

    if WriteLogger::init(log_level, simplelog::Config::default(), log_file).is_err() {
        eprintln!("blofeld: logger already initialized");
        return;
    }

    log::info!("blofeld starting (log level: {:?})", log_level);
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let options = match args::parse(&argv) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("blofeld: {}\n\n{}", e, args::USAGE);
            return ExitCode::from(2);
        }
    };
    init_logging(options.verbose);

    let config = Config::load();
    let mut settings = config.midi();
    if let Some(input) = &options.input {
        settings.input_port = input.clone();
    }
    if let Some(output) = &options.output {
        settings.output_port = output.clone();
    }

    let result = match options.command {
        Command::Help => {
            println!("{}", args::USAGE);
            Ok(())
        }
        Command::Ports => list_ports(&settings, &options),
        Command::Identify => identify(&config, &settings, &options),
        Command::Dump(target) => dump(&config, &settings, &options, target),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("blofeld: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_ports(settings: &MidiSettings, options: &Options) -> CliResult {
    let listing = midir_backend::list_ports(&settings.client_name)?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    println!("inputs:");
    for port in &listing.inputs {
        println!("  {:>2}  {}", port.index, port.name);
    }
    println!("outputs:");
    for port in &listing.outputs {
        println!("  {:>2}  {}", port.index, port.name);
    }
    Ok(())
}

fn identify(config: &Config, settings: &MidiSettings, options: &Options) -> CliResult {
    let mut librarian = Librarian::from_config(config);
    librarian.connect(settings)?;
    librarian.identify()?;

    let deadline = Instant::now() + Duration::from_secs(options.timeout_secs);
    while Instant::now() < deadline {
        for event in librarian.wait(Duration::from_millis(20)) {
            match event {
                LibrarianEvent::DeviceIdentified(info) => {
                    librarian.disconnect();
                    if options.json {
                        println!("{}", serde_json::to_string_pretty(&info)?);
                    } else {
                        println!("{}", info);
                    }
                    return Ok(());
                }
                LibrarianEvent::TransportFault(e) => return Err(e.into()),
                _ => {}
            }
        }
    }
    librarian.disconnect();
    Err("no answer to device inquiry".into())
}

fn dump(config: &Config, settings: &MidiSettings, options: &Options, target: DumpTarget) -> CliResult {
    let mut librarian = Librarian::from_config(config);
    librarian.connect(settings)?;

    let now = Instant::now();
    match target {
        DumpTarget::Single { bank, program } => librarian.request_single(bank, program, now)?,
        DumpTarget::Bank(bank) => librarian.request_bank(bank, now)?,
        DumpTarget::All => librarian.request_all(now)?,
    }

    let mut stderr = std::io::stderr();
    'run: loop {
        for event in librarian.wait(Duration::from_millis(20)) {
            match event {
                LibrarianEvent::Dump(DumpReport::Progress(progress)) => {
                    let _ = write!(stderr, "\r{}", progress_line(&progress));
                    let _ = stderr.flush();
                }
                LibrarianEvent::Dump(DumpReport::Finished {
                    received, elapsed, ..
                }) => {
                    let _ = writeln!(
                        stderr,
                        "\nreceived {} sounds in {:.1}s",
                        received,
                        elapsed.as_secs_f32()
                    );
                    break 'run;
                }
                LibrarianEvent::Dump(DumpReport::Failed { error, .. }) => {
                    let _ = writeln!(stderr);
                    librarian.disconnect();
                    return Err(error.into());
                }
                LibrarianEvent::TransportFault(e) => {
                    librarian.disconnect();
                    return Err(e.into());
                }
                LibrarianEvent::Topology(topology) => log::info!("{:?}", topology),
                _ => {}
            }
        }
    }
    librarian.disconnect();

    let records = librarian.library().records();
    print_records(&records, options.json)
}

fn progress_line(progress: &DumpProgress) -> String {
    let eta = match progress.remaining {
        Some(remaining) => format!("{}s left", remaining.as_secs()),
        None => "estimating".to_string(),
    };
    format!(
        "{}{:03}  {:>4}/{:<4} {:>3.0}%  {}   ",
        bank_letter(progress.bank),
        progress.program as u16 + 1,
        progress.completed,
        progress.total,
        progress.fraction() * 100.0,
        eta
    )
}

fn print_records(records: &[SoundRecord], json: bool) -> CliResult {
    if json {
        let summaries: Vec<_> = records.iter().map(|r| r.summary()).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    for record in records {
        println!(
            "{}{:03}  {:<16}  {}",
            bank_letter(record.bank()),
            record.program() as u16 + 1,
            record.name(),
            record.category()
        );
    }
    Ok(())
}
