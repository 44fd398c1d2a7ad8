use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::params::{parse_force_string, Params};

pub const DEFAULT_RUN_DIR: &str = "/run/acerhdf";

#[derive(Parser)]
#[command(name = "acerhdf")]
#[command(about = "Embedded-controller fan control for the Acer Predator PH517-51")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also write the log to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Directory holding the runtime params and control files
    #[arg(long, default_value = DEFAULT_RUN_DIR, global = true)]
    pub run_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Take control of the fan until interrupted
    Run(RunArgs),

    /// List supported manufacturer/model/BIOS combinations
    List,

    /// Show identity, EC layout and live readings
    Status,

    /// Live read-only dashboard of temperature and fan state
    Monitor {
        /// Refresh interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },

    /// Change a running daemon
    Ctl {
        #[command(subcommand)]
        command: CtlCommand,
    },
}

#[derive(Subcommand)]
pub enum CtlCommand {
    /// Give the fan to the driver (enabled) or the BIOS (disabled)
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },

    /// Return the fan to the BIOS ahead of a system sleep
    Suspend,

    /// Change runtime parameters
    Set {
        #[arg(long)]
        interval: Option<u32>,
        #[arg(long)]
        fanon: Option<u32>,
        #[arg(long)]
        fanoff: Option<u32>,
        #[arg(long)]
        verbose_level: Option<u32>,
        #[arg(long)]
        debug: Option<bool>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Enabled,
    Disabled,
}

/// What the host does when the critical trip is crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CriticalAction {
    /// Request an orderly poweroff
    Shutdown,
    /// Only log the event
    Log,
}

#[derive(Args)]
pub struct RunArgs {
    /// Kernel mode fan control on (1) / off (0)
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=1))]
    pub kernelmode: u8,

    /// Polling interval of temperature check, in seconds
    #[arg(long, default_value = "1")]
    pub interval: u32,

    /// Turn the fan on above this temperature
    #[arg(long, default_value = "30")]
    pub fanon: u32,

    /// Turn the fan off below this temperature
    #[arg(long, default_value = "53000")]
    pub fanoff: u32,

    /// Verbose diagnostic output level
    #[arg(long, default_value = "0")]
    pub verbose_level: u32,

    /// Log every fan speed change and the averaged temperature
    #[arg(long)]
    pub debug: bool,

    /// List supported models and BIOS versions, then exit
    #[arg(long)]
    pub list_supported: bool,

    /// Pretend system has this known supported BIOS version
    #[arg(long, default_value = "", value_parser = parse_force_string)]
    pub force_bios: String,

    /// Pretend system is this known supported model
    #[arg(long, default_value = "", value_parser = parse_force_string)]
    pub force_product: String,

    /// Action on reaching the critical temperature
    #[arg(long, value_enum, default_value = "shutdown")]
    pub critical_action: CriticalAction,
}

impl RunArgs {
    pub fn params(&self) -> Params {
        Params {
            kernelmode: self.kernelmode != 0,
            interval: self.interval,
            fanon: self.fanon,
            fanoff: self.fanoff,
            verbose: self.verbose_level,
            debug: self.debug,
            list_supported: self.list_supported,
            force_bios: self.force_bios.clone(),
            force_product: self.force_product.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_match_params_defaults() {
        let cli = Cli::try_parse_from(["acerhdf", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.params(), Params::default());
        assert_eq!(args.critical_action, CriticalAction::Shutdown);
        assert_eq!(cli.run_dir, PathBuf::from(DEFAULT_RUN_DIR));
    }

    #[test]
    fn overlong_force_string_is_rejected() {
        let result = Cli::try_parse_from(["acerhdf", "run", "--force-bios", "V1.06-this-is-too-long"]);
        assert!(result.is_err());
    }

    #[test]
    fn kernelmode_accepts_only_zero_or_one() {
        let cli = Cli::try_parse_from(["acerhdf", "run", "--kernelmode", "0"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(!args.params().kernelmode);
        assert!(Cli::try_parse_from(["acerhdf", "run", "--kernelmode", "2"]).is_err());
    }

    #[test]
    fn ctl_set_parses_partial_update() {
        let cli = Cli::try_parse_from(["acerhdf", "ctl", "set", "--fanon", "60"]).unwrap();
        match cli.command {
            Commands::Ctl {
                command: CtlCommand::Set { fanon, interval, .. },
            } => {
                assert_eq!(fanon, Some(60));
                assert_eq!(interval, None);
            }
            _ => panic!("expected ctl set"),
        }
    }
}
