use std::ffi::OsString;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use crate::installer::is_executable;
use crate::resolver::{Resolution, Resolver, VersionSource};
use crate::store::VersionStore;
use crate::version::Version;

/// Exit status when no version is configured, or the configuration is malformed.
pub const EXIT_NO_VERSION: i32 = 3;
/// Exit status when the configured version is not installed.
pub const EXIT_NOT_INSTALLED: i32 = 4;
/// Exit status for any other dispatcher failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{reason}. Run 'govm global <version>' or 'govm local <version>', or set GOVM_VERSION")]
    Unresolved { reason: String },

    #[error("Go {version} ({origin}) is not installed. Run 'govm install {version}'")]
    NotInstalled { version: Version, origin: VersionSource },

    #[error("command '{command}' not found in Go {version}")]
    MissingCommand { command: String, version: Version },

    #[error("failed to execute {}: {source}", .program.display())]
    Exec {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DispatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::Unresolved { .. } => EXIT_NO_VERSION,
            DispatchError::NotInstalled { .. } => EXIT_NOT_INSTALLED,
            DispatchError::MissingCommand { .. } | DispatchError::Exec { .. } => EXIT_FAILURE,
        }
    }
}

/// The real binary an invocation resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Root of the selected toolchain, exported as `GOROOT`.
    pub goroot: PathBuf,
    pub version: Version,
    pub source: VersionSource,
}

impl Invocation {
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).env("GOROOT", &self.goroot);
        command
    }

    /// Replaces the current process with the real binary.
    ///
    /// Only returns on failure. The child inherits stdio, signals and the
    /// process id, so its exit status is the caller's.
    pub fn exec(self) -> DispatchError {
        let source = self.command().exec();
        DispatchError::Exec { program: self.program, source }
    }

    /// Runs the binary as a child and waits, returning the status to exit with.
    ///
    /// A child killed by a signal maps to `128 + signal`, as shells report it.
    pub fn run(self) -> Result<i32, DispatchError> {
        let status = self
            .command()
            .status()
            .map_err(|source| DispatchError::Exec { program: self.program.clone(), source })?;
        Ok(status
            .code()
            .or_else(|| status.signal().map(|s| 128 + s))
            .unwrap_or(EXIT_FAILURE))
    }
}

/// Maps a toolchain command to the binary of the version that applies.
///
/// Nothing is cached: each call resolves again from the given directory.
pub struct Dispatcher<'a> {
    store: &'a VersionStore,
    resolver: Resolver<'a>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a VersionStore, resolver: Resolver<'a>) -> Self {
        Self { store, resolver }
    }

    pub fn plan(&self, command: &str, args: Vec<OsString>, cwd: &Path) -> Result<Invocation, DispatchError> {
        let (version, source) = match self.resolver.resolve(cwd) {
            Resolution::Resolved { version, source } => (version, source),
            Resolution::Unresolved(reason) => return Err(DispatchError::Unresolved { reason }),
        };
        if !self.store.is_installed(&version) {
            return Err(DispatchError::NotInstalled { version, origin: source });
        }

        // Only plain names from the toolchain's bin directory, never paths.
        let plain = !command.is_empty() && !command.contains('/') && command != "." && command != "..";
        let program = self.store.binary_path(&version, command);
        if !plain || !is_executable(&program) {
            return Err(DispatchError::MissingCommand { command: command.to_string(), version });
        }

        debug!(%version, %source, program = %program.display(), "dispatching");
        Ok(Invocation {
            program,
            args,
            goroot: self.store.path_of(&version),
            version,
            source,
        })
    }

    /// Resolves and execs `command`; returns only if that fails.
    pub fn dispatch(&self, command: &str, args: Vec<OsString>, cwd: &Path) -> DispatchError {
        match self.plan(command, args, cwd) {
            Ok(invocation) => invocation.exec(),
            Err(err) => err,
        }
    }
}
