use std::cell::RefCell;
use std::ffi::OsString;
use std::path::PathBuf;
use anyhow::{bail, Context, Result};
use colored::*;
use govm::{
    create_all_shims, ensure_shims, is_valid_version, sort_versions, write_version_file, Dispatcher,
    GoDevSource, GovmConfig, InstallOptions, InstallOutcome, Installer, PrunePolicy, ReleaseSource,
    Resolution, Resolver, Version, VersionStore, GO_BINARIES, LOCAL_VERSION_FILE,
};
use crate::cli::{GovmCommand, CLI};

/// Everything a command needs: the store and its configuration.
pub struct App {
    store: VersionStore,
    config: GovmConfig,
}

impl App {
    fn load() -> Result<Self> {
        let store = VersionStore::from_env()?;
        let config = GovmConfig::load(store.config_file())?;
        Ok(Self { store, config })
    }

    fn installer(&self) -> Result<Installer<'_, GoDevSource>> {
        let source = GoDevSource::new(&self.config.install)?;
        Ok(Installer::new(&self.store, source, InstallOptions::from(&self.config.install)))
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::from_env(&self.store)
    }

    fn require_installed(&self, version: &Version) -> Result<()> {
        if !self.store.is_installed(version) {
            bail!("Go {} is not installed. Run 'govm install {}' first.", version, version);
        }
        Ok(())
    }
}

pub fn execute(cli: CLI) -> Result<()> {
    let ctx = App::load()?;
    match cli.command {
        GovmCommand::Install { version } => {
            execute_install(&ctx, &version)
        }
        GovmCommand::Use { version, local } => {
            execute_use(&ctx, &version, local)
        }
        GovmCommand::Global { version } => {
            execute_global(&ctx, version)
        }
        GovmCommand::Local { version } => {
            execute_local(&ctx, &version)
        }
        GovmCommand::Version => {
            execute_version(&ctx)
        }
        GovmCommand::Versions => {
            execute_versions(&ctx)
        }
        GovmCommand::ListRemote { all, limit } => {
            execute_list_remote(&ctx, all, limit)
        }
        GovmCommand::Uninstall { version, force } => {
            execute_uninstall(&ctx, &version, force)
        }
        GovmCommand::Which { command } => {
            execute_which(&ctx, &command)
        }
        GovmCommand::Exec { command, args } => {
            execute_exec(&ctx, &command, args)
        }
        GovmCommand::Rehash => {
            execute_rehash(&ctx)
        }
        GovmCommand::Prune { keep, older_than_days, search_roots, dry_run } => {
            execute_prune(&ctx, keep, older_than_days, search_roots, dry_run)
        }
    }
}

fn parse_version(version: &str) -> Result<Version> {
    if !is_valid_version(version) {
        bail!("Invalid Go version: '{}' (expected e.g. 1.22.0)", version);
    }
    Ok(Version::parse(version)?)
}

/// Installs `version` and makes sure the shims exist.
///
/// The first version ever installed also becomes the global default.
fn install(ctx: &App, version: &Version) -> Result<()> {
    let installer = ctx.installer()?;
    if !ctx.store.is_installed(version) {
        println!("{} Installing Go {}...", "↓".blue(), version.to_string().cyan());
    }
    let outcome = installer
        .install(version)
        .with_context(|| format!("Could not install Go {}", version))?;
    match outcome {
        InstallOutcome::Installed => {
            println!("{} Go {} installed successfully!", "✓".green(), version.to_string().cyan());
        }
        InstallOutcome::AlreadyInstalled => {
            println!("{} Go {} is already installed", "✓".green(), version.to_string().cyan());
        }
    }

    let govm_exe = std::env::current_exe().context("Could not locate the govm executable")?;
    ensure_shims(&ctx.store.shims_dir(), &govm_exe)?;

    if matches!(ctx.store.global_version(), Ok(None)) {
        ctx.store.set_global_version(version)?;
        println!("{} Set global Go version to {}", "✓".green(), version.to_string().cyan());
    }
    Ok(())
}

pub fn execute_install(ctx: &App, version: &str) -> Result<()> {
    let version = parse_version(version)?;
    install(ctx, &version)
}

pub fn execute_use(ctx: &App, version: &str, local: bool) -> Result<()> {
    let version = parse_version(version)?;
    install(ctx, &version)?;
    if local {
        let marker = std::env::current_dir()?.join(LOCAL_VERSION_FILE);
        write_version_file(&marker, &version)?;
        println!(
            "{} Now using Go {} {}",
            "✓".green(),
            version.to_string().cyan(),
            format!("(local: {})", marker.display()).dimmed()
        );
    } else {
        ctx.store.set_global_version(&version)?;
        println!("{} Now using Go {} {}", "✓".green(), version.to_string().cyan(), "(global)".dimmed());
    }
    Ok(())
}

pub fn execute_global(ctx: &App, version: Option<String>) -> Result<()> {
    match version {
        Some(version) => {
            let version = parse_version(&version)?;
            ctx.require_installed(&version)?;
            ctx.store.set_global_version(&version)?;
            println!("{} Set global Go version to {}", "✓".green(), version.to_string().cyan());
        }
        None => match ctx.store.global_version()? {
            Some(version) => println!("{}", version),
            None => println!("{} No global version set", "→".blue()),
        },
    }
    Ok(())
}

pub fn execute_local(ctx: &App, version: &str) -> Result<()> {
    let version = parse_version(version)?;
    ctx.require_installed(&version)?;
    let marker = std::env::current_dir()?.join(LOCAL_VERSION_FILE);
    write_version_file(&marker, &version)?;
    println!(
        "{} Set local Go version to {} ({})",
        "✓".green(),
        version.to_string().cyan(),
        marker.display().to_string().dimmed()
    );
    Ok(())
}

pub fn execute_version(ctx: &App) -> Result<()> {
    let cwd = std::env::current_dir()?;
    match ctx.resolver().resolve(&cwd) {
        Resolution::Resolved { version, source } => {
            println!(
                "{} {} {}",
                "→".green(),
                version.to_string().green().bold(),
                format!("({})", source).dimmed()
            );
            if !ctx.store.is_installed(&version) {
                println!(
                    "  {} This version is not installed. Run: govm install {}",
                    "⚠".yellow(),
                    version
                );
            }
        }
        Resolution::Unresolved(reason) => {
            println!("{} {}", "→".blue(), reason);
            println!("  Set a global version: {}", "govm global <version>".yellow());
            println!("  Or create a local .go-version file: {}", "govm local <version>".yellow());
        }
    }
    Ok(())
}

pub fn execute_versions(ctx: &App) -> Result<()> {
    let versions = ctx.store.list();
    if versions.is_empty() {
        println!("{} No Go versions installed", "→".blue());
        println!("  Run {} to see available versions", "govm list-remote".yellow());
        return Ok(());
    }
    let cwd = std::env::current_dir()?;
    let current = ctx.resolver().resolve(&cwd).version().cloned();
    let global = ctx.store.global_version().ok().flatten();

    println!("{}", "Installed Go versions:".bold());
    println!();
    for version in versions {
        let is_current = current.as_ref() == Some(&version);
        let is_global = global.as_ref() == Some(&version);
        let mut labels = Vec::new();
        if is_current {
            labels.push("current");
        }
        if is_global {
            labels.push("global");
        }
        let label = if labels.is_empty() {
            String::new()
        } else {
            format!(" ({})", labels.join(", ")).dimmed().to_string()
        };
        if is_current {
            println!("  {} {}{}", "→".green(), version.to_string().green().bold(), label);
        } else {
            println!("    {}{}", version, label);
        }
    }
    Ok(())
}

pub fn execute_list_remote(ctx: &App, all: bool, limit: usize) -> Result<()> {
    let installer = ctx.installer()?;
    let releases = installer.source().catalog().context("Could not fetch the Go release catalog")?;
    let installed = ctx.store.list();

    // The catalog's `stable` flag only marks the current releases.
    let mut versions: Vec<Version> = releases
        .iter()
        .filter_map(|r| r.parsed_version())
        .filter(|v| all || !v.is_prerelease())
        .collect();
    sort_versions(&mut versions);
    versions.dedup();

    println!("{}", "Available Go versions:".bold());
    println!();
    for version in versions.into_iter().take(limit) {
        let line = if installed.contains(&version) {
            format!("  {} {}", "✓".green(), version.to_string().dimmed())
        } else {
            format!("    {}", version)
        };
        let label = if version.is_prerelease() { " (unstable)".yellow().to_string() } else { String::new() };
        println!("{}{}", line, label);
    }
    if !all {
        println!();
        println!("  Use {} to include release candidates and betas", "govm list-remote --all".dimmed());
    }
    Ok(())
}

pub fn execute_uninstall(ctx: &App, version: &str, force: bool) -> Result<()> {
    let version = parse_version(version)?;
    ctx.installer()?
        .remove(&version, force)
        .with_context(|| format!("Could not uninstall Go {}", version))?;
    println!("{} Go {} has been uninstalled", "✓".green(), version.to_string().cyan());
    Ok(())
}

pub fn execute_which(ctx: &App, command: &str) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let dispatcher = Dispatcher::new(&ctx.store, ctx.resolver());
    let invocation = dispatcher.plan(command, Vec::new(), &cwd)?;
    println!("{}", invocation.program.display());
    Ok(())
}

/// Replaces this process with the resolved binary. Only returns if that fails,
/// in which case the process exits with the dispatcher's status code.
pub fn execute_exec(ctx: &App, command: &str, args: Vec<OsString>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let dispatcher = Dispatcher::new(&ctx.store, ctx.resolver());
    let err = dispatcher.dispatch(command, args, &cwd);
    eprintln!("{} {}", "govm:".red(), err);
    std::process::exit(err.exit_code());
}

pub fn execute_rehash(ctx: &App) -> Result<()> {
    let govm_exe = std::env::current_exe().context("Could not locate the govm executable")?;
    create_all_shims(&ctx.store.shims_dir(), &govm_exe)?;
    for binary in GO_BINARIES {
        println!("  {} {}", "✓".green(), binary);
    }
    println!("{} Shims regenerated in {}", "✓".green(), ctx.store.shims_dir().display().to_string().cyan());
    Ok(())
}

pub fn execute_prune(
    ctx: &App,
    keep: Option<usize>,
    older_than_days: Option<u64>,
    search_roots: Vec<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let policy = PrunePolicy::with_age_in_days(keep.unwrap_or(ctx.config.prune.keep), older_than_days)?;
    let mut roots = search_roots;
    roots.extend(ctx.config.prune.search_roots.iter().cloned());

    let installer = ctx.installer()?;
    let mut removed = if dry_run {
        let planned = RefCell::new(Vec::new());
        installer.prune(&roots, |candidate| {
            if policy.should_remove(candidate) {
                planned.borrow_mut().push(candidate.version.clone());
            }
            false
        })?;
        planned.into_inner()
    } else {
        installer.prune(&roots, |candidate| policy.should_remove(candidate))?
    };

    if removed.is_empty() {
        println!("{} Nothing to prune.", "→".blue());
        return Ok(());
    }
    sort_versions(&mut removed);
    for version in removed {
        if dry_run {
            println!("  - {} {}", version.to_string().red(), "(dry run)".dimmed());
        } else {
            println!("{} Removed Go {}", "✓".green(), version);
        }
    }
    Ok(())
}
