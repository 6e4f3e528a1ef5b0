//! Command-line surface: a thin `clap::Parser` struct with accessor
//! methods, nothing else.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value_t = String::from("/etc/procwarden/config.yaml"))]
    config: String,

    #[arg(long)]
    print_debug_info: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }

    pub fn print_debug_info(&self) -> bool {
        self.print_debug_info
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}
