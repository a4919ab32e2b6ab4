use std::ffi::OsString;
use std::path::PathBuf;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about = "Go Version Manager (shim-based) - Install, use, and manage Go versions", long_about = None)]
pub struct CLI {
    /// Increase log output on stderr (-v info, -vv debug). `GOVM_LOG` overrides it
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    #[command(subcommand)]
    pub(crate) command: GovmCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum GovmCommand {
    /// Install a specific Go version
    #[command(alias = "i")]
    Install {
        /// The Go version to install (e.g. 1.21.0, 1.22.0)
        version: String,
    },
    /// Switch to a specific Go version (installs if needed)
    Use {
        version: String,
        /// Write a `.go-version` in the current directory instead of the global default
        #[clap(short, long)]
        local: bool,
    },
    /// Set or show the global Go version
    Global {
        /// The version to set as global default (omit to show the current one)
        version: Option<String>,
    },
    /// Set the Go version for the current directory (writes `.go-version`)
    Local {
        version: String,
    },
    /// Show the Go version resolved for the current directory and where it comes from
    Version,
    /// List installed Go versions
    #[command(alias = "ls")]
    Versions,
    /// List Go versions available for download
    #[command(alias = "ls-remote")]
    ListRemote {
        /// Include release candidates and betas
        #[clap(short, long)]
        all: bool,
        /// Maximum number of versions to show
        #[clap(short, long, default_value = "20")]
        limit: usize,
    },
    /// Uninstall a specific Go version
    #[command(alias = "rm")]
    Uninstall {
        version: String,
        /// Remove it even if it is the global default (the default is cleared)
        #[clap(short, long)]
        force: bool,
    },
    /// Show the path of the binary a command would run
    Which {
        #[clap(default_value = "go")]
        command: String,
    },
    /// Run a toolchain command with the resolved Go version
    Exec {
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    },
    /// Regenerate the `go` and `gofmt` shims
    Rehash,
    /// Remove installed versions no marker file refers to
    Prune {
        /// Always keep this many of the newest versions (default from config.toml, else 3)
        #[clap(short, long)]
        keep: Option<usize>,
        /// Only remove versions installed at least this many days ago
        #[clap(long)]
        older_than_days: Option<u64>,
        /// Directory scanned for `.go-version` files, in addition to config.toml
        #[clap(long = "search-root")]
        search_roots: Vec<PathBuf>,
        /// Print what would be removed without removing it
        #[clap(long)]
        dry_run: bool,
    },
}
