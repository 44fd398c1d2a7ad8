mod cli;
mod driver;
mod errors;
mod fan;
mod host;
mod params;
mod platform;
mod profile;
mod samples;
mod thermal;
mod tui;

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use cli::{Cli, Commands, CtlCommand, ModeArg, RunArgs};
use driver::Acerhdf;
use errors::DriverError;
use fan::FanSnapshot;
use host::{ControlCommand, LocalHost, Poller};
use params::{RuntimeParams, SharedParams, PARAMS_FILE};
use platform::{create_ec, create_firmware_info};
use profile::{check_hardware, format_table};

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(verbosity: u8, log_file: Option<&Path>) {
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let log_level = level_from_verbosity(verbosity);

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        log_config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(log_level, log_config, file)),
            Err(error) => eprintln!("cannot open log file {}: {}", path.display(), error),
        }
    }
    let _ = CombinedLogger::init(loggers);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref());

    match cli.command {
        Commands::Run(args) => cmd_run(&args, &cli.run_dir),
        Commands::List => cmd_list(),
        Commands::Status => cmd_status(),
        Commands::Monitor { interval } => tui::run(interval),
        Commands::Ctl { command } => cmd_ctl(command, &cli.run_dir),
    }
}

fn cmd_run(args: &RunArgs, run_dir: &Path) -> Result<()> {
    let params = SharedParams::new(args.params());
    let info = create_firmware_info();
    let mut host = LocalHost::new();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("cannot install signal handler")?;

    let params_path = run_dir.join(PARAMS_FILE);
    std::fs::create_dir_all(run_dir)
        .with_context(|| format!("cannot create run directory {}", run_dir.display()))?;
    params::clear_runtime_params(&params_path)
        .with_context(|| format!("cannot remove stale {}", params_path.display()))?;

    let driver = match Acerhdf::probe(create_ec(), &*info, params.clone(), &mut host) {
        Ok(driver) => driver,
        Err(DriverError::Cancelled) => {
            for line in format_table() {
                println!("{}", line);
            }
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    params::spawn_watcher(params, params_path);

    let mut poller = Poller::new(driver, &mut host, args.critical_action, run_dir)?;
    let ctrl = poller.driver().control_config();
    info!(
        "fan control started, mode {:?}, fanreg {:#04x}, tempreg {:#04x}",
        poller.driver().mode(),
        ctrl.fanreg,
        ctrl.tempreg
    );

    poller.run(&running);

    let driver = poller.driver();
    info!(
        "fan control stopping, mode {:?}, fan state {}, average {}",
        driver.mode(),
        driver.fanstate(),
        driver.samples().average()
    );
    poller.into_driver().remove(&mut host);
    Ok(())
}

fn cmd_list() -> Result<()> {
    for line in format_table() {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let info = create_firmware_info();
    let params = params::Params {
        kernelmode: false,
        ..params::Params::default()
    };
    let found = check_hardware(&*info, &params)?;
    let ctrl = found.config;

    println!(
        "{:<10} {} / {} / {}",
        "Identity", found.identity.vendor, found.identity.product, found.identity.version
    );
    println!(
        "{:<10} {} / {} / {}",
        "Profile", found.profile.vendor, found.profile.product, found.profile.version
    );
    println!("{}", "-".repeat(51));
    println!("{:<12} {:#04x}", "fanreg", ctrl.fanreg);
    println!("{:<12} {:#04x}", "tempreg", ctrl.tempreg);
    println!("{:<12} {:#04x}", "cmd_off", ctrl.cmd.cmd_off);
    println!("{:<12} {:#04x}", "cmd_auto", ctrl.cmd.cmd_auto);
    println!("{:<12} {:#04x} / {:#04x}", "mreg/moff", ctrl.mcmd.mreg, ctrl.mcmd.moff);
    println!("{:<12} {}", "mcmd_enable", ctrl.mcmd_enable);
    println!("{}", "-".repeat(51));

    let mut ec = create_ec();
    let temperature = ec.read(ctrl.tempreg)?;
    let fan_state = ec.read(ctrl.fanreg)?;
    let snapshot = FanSnapshot {
        temperature,
        fan_state,
        smoothed: None,
    };
    println!("{}", snapshot);
    Ok(())
}

fn cmd_ctl(command: CtlCommand, run_dir: &Path) -> Result<()> {
    match command {
        CtlCommand::Mode { mode } => {
            let command = match mode {
                ModeArg::Enabled => ControlCommand::Enable,
                ModeArg::Disabled => ControlCommand::Disable,
            };
            host::send_command(run_dir, command)?;
            println!("Sent '{}' to {}", command, run_dir.display());
        }
        CtlCommand::Suspend => {
            host::send_command(run_dir, ControlCommand::Suspend)?;
            println!("Sent 'suspend' to {}", run_dir.display());
        }
        CtlCommand::Set {
            interval,
            fanon,
            fanoff,
            verbose_level,
            debug,
        } => {
            let update = RuntimeParams {
                interval,
                fanon,
                fanoff,
                verbose: verbose_level,
                debug,
                list_supported: None,
            };
            if update == RuntimeParams::default() {
                warn!("nothing to set");
                return Ok(());
            }
            std::fs::create_dir_all(run_dir)?;
            let merged = params::write_runtime_params(&run_dir.join(PARAMS_FILE), &update)?;
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
    }
    Ok(())
}
