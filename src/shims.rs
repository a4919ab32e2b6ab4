use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::info;
use crate::error::{GovmError, IoResultExt, Result};
use crate::store::GO_BINARIES;

/// Creates a "shim" forwarding every invocation of `binary` to `govm exec`.
///
/// The shim is a small `sh` script at `<shims_dir>/<binary>`, marked
/// executable. It replaces itself with `govm`, so the exit status and
/// signals of the real command reach the caller unchanged.
///
/// # Errors
///
/// Returns an error if `govm_path` is not valid UTF-8, or if the script
/// cannot be written or made executable.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use govm::create_shim;
///
/// create_shim("go", Path::new("/usr/local/bin/govm"), Path::new("/home/me/.govm/shims")).unwrap();
/// ```
pub fn create_shim(binary: &str, govm_path: &Path, shims_dir: &Path) -> Result<()> {
    fs::create_dir_all(shims_dir).at(shims_dir)?;
    let shim_path = shims_dir.join(binary);
    let content = shim_script(binary, govm_path)?;

    // Written aside and renamed so a shell never runs a half-written shim.
    let tmp = shims_dir.join(format!(".{}.tmp-{}", binary, std::process::id()));
    fs::write(&tmp, content).at(&tmp)?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755)).at(&tmp)?;
    fs::rename(&tmp, &shim_path).at(&shim_path)
}

fn shim_script(binary: &str, govm_path: &Path) -> Result<String> {
    let govm = govm_path.to_str().ok_or_else(|| {
        GovmError::config(govm_path.display().to_string(), "the govm executable path is not valid UTF-8")
    })?;
    Ok(format!(
        "#!/bin/sh\n\
         # Shim created by govm. Do not edit; regenerate with 'govm rehash'.\n\
         exec {govm} exec \"{binary}\" -- \"$@\"\n",
        govm = sh_quote(govm),
        binary = binary
    ))
}

/// Single-quotes `value` for `sh`; an embedded `'` becomes `'\''`.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Creates the shims that are missing or point at another `govm` binary.
///
/// Returns the names of the shims that were (re)written.
pub fn ensure_shims(shims_dir: &Path, govm_path: &Path) -> Result<Vec<&'static str>> {
    let mut written = Vec::new();
    for binary in GO_BINARIES {
        let expected = shim_script(binary, govm_path)?;
        let current = fs::read_to_string(shims_dir.join(binary)).ok();
        if current.as_deref() != Some(expected.as_str()) {
            create_shim(binary, govm_path, shims_dir)?;
            written.push(*binary);
        }
    }
    if !written.is_empty() {
        info!(shims = ?written, dir = %shims_dir.display(), "wrote shims");
    }
    Ok(written)
}

/// Rewrites every shim unconditionally.
pub fn create_all_shims(shims_dir: &Path, govm_path: &Path) -> Result<()> {
    for binary in GO_BINARIES {
        create_shim(binary, govm_path, shims_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_create_shim_content_and_mode() {
        let dir = tempdir().unwrap();
        let govm = PathBuf::from("/usr/local/bin/govm");
        create_shim("go", &govm, dir.path()).unwrap();

        let shim = dir.path().join("go");
        let content = fs::read_to_string(&shim).unwrap();
        assert!(content.starts_with("#!/bin/sh\n"));
        assert!(content.contains("exec '/usr/local/bin/govm' exec \"go\" -- \"$@\""));
        assert!(fs::metadata(&shim).unwrap().permissions().mode() & 0o111 != 0);
    }

    #[test]
    fn test_ensure_shims_creates_missing_only() {
        let dir = tempdir().unwrap();
        let govm = PathBuf::from("/usr/local/bin/govm");

        assert_eq!(ensure_shims(dir.path(), &govm).unwrap(), vec!["go", "gofmt"]);
        assert!(ensure_shims(dir.path(), &govm).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_shims_replaces_outdated() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("go"), "#!/bin/sh\nexec /wrong/path/govm exec go \"$@\"\n").unwrap();

        let written = ensure_shims(dir.path(), Path::new("/opt/govm")).unwrap();
        assert!(written.contains(&"go"));
        let content = fs::read_to_string(dir.path().join("go")).unwrap();
        assert!(!content.contains("/wrong/path/govm"));
        assert!(content.contains("/opt/govm"));
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("/opt/govm"), "'/opt/govm'");
        assert_eq!(sh_quote("/it's/govm"), r"'/it'\''s/govm'");
    }

    #[test]
    fn test_shim_survives_shell_metacharacters_in_path() {
        let dir = tempdir().unwrap();
        let odd = dir.path().join("a \"b\" $HOME `id` it's");
        fs::create_dir_all(&odd).unwrap();
        // Stands in for govm: prints the arguments it receives.
        let govm = odd.join("govm");
        fs::write(&govm, "#!/bin/sh\nprintf '%s|' \"$@\"\n").unwrap();
        fs::set_permissions(&govm, fs::Permissions::from_mode(0o755)).unwrap();

        let shims = dir.path().join("shims");
        create_shim("go", &govm, &shims).unwrap();
        let output = std::process::Command::new(shims.join("go"))
            .args(["build", "$x y"])
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "exec|go|--|build|$x y|");
    }

    #[test]
    fn test_non_utf8_govm_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let dir = tempdir().unwrap();
        let govm = Path::new(OsStr::from_bytes(b"/opt/gov\xffm"));
        let err = create_shim("go", govm, dir.path()).unwrap_err();
        assert!(matches!(err, GovmError::Configuration { .. }));
        assert!(!dir.path().join("go").exists());
    }

    #[test]
    fn test_create_all_shims() {
        let dir = tempdir().unwrap();
        let shims = dir.path().join("shims");
        create_all_shims(&shims, Path::new("/usr/local/bin/govm")).unwrap();
        assert!(shims.join("go").exists());
        assert!(shims.join("gofmt").exists());
    }
}
