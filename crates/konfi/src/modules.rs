//! Module loading.
//!
//! `load(name)` resolves a module name to a `.konfi` file, parses and
//! evaluates it, and caches the result in the global state. The filesystem
//! and the process environment are consumed through the [`Sources`] trait so
//! embedders and tests can substitute providers.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::errors::{chain_error, Error};
use crate::eval::{eval_module, Ctx, LoadedModule};
use crate::parser::parse_module;

pub const KONFI_FILE_EXTENSION: &str = ".konfi";
pub const KONFI_PATH_ENV: &str = "KONFIPATH";

/// The loader's view of the outside world: file contents, file probing, and
/// environment variables.
pub trait Sources {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn is_file(&self, path: &Path) -> bool;
    fn env(&self, name: &str) -> Option<String>;
}

/// The OS-backed default provider.
pub struct OsSources;

impl Sources for OsSources {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Loads the module `name` and caches it in `ctx`'s global state.
///
/// A module name resolves to a file by appending the `.konfi` extension when
/// absent and probing the directory of the currently-evaluating file first,
/// then each entry of the colon-separated `KONFIPATH`. Absolute paths are
/// taken literally. A file already on the load stack is an import cycle.
/// Failed loads leave the cache unchanged and the load stack restored.
pub fn load_module(name: &str, ctx: &Ctx) -> Result<Rc<LoadedModule>, Error> {
    let sources = ctx.sources();
    let cwd = ctx.cwd();
    let Some(filename) = resolve_module_file(name, &cwd, sources.as_ref()) else {
        return Err(Error::msg(format!(
            "module '{name}' not found in '{}' or {KONFI_PATH_ENV}",
            cwd.display()
        )));
    };
    let key = filename.to_string_lossy().into_owned();
    if let Some(module) = ctx.lookup_module(&key) {
        return Ok(module);
    }
    if ctx.is_active_file(&filename) {
        return Err(Error::msg(format!(
            "load cycle detected while loading '{key}'"
        )));
    }
    let input = match sources.read(&filename) {
        Ok(input) => input,
        Err(err) => {
            return Err(Error::msg(format!(
                "error reading module file '{key}': {err}"
            )))
        }
    };
    let base = ctx.add_file(&key, &input);
    let module = parse_module(&input, &key, base)
        .map_err(|e| chain_error(e, format!("failed to parse module '{key}'")))?;
    ctx.push_file(filename);
    let result = eval_module(&module, ctx);
    ctx.pop_file();
    let loaded =
        result.map_err(|e| chain_error(e, format!("failed to evaluate module '{key}'")))?;
    ctx.store_module(&key, Rc::clone(&loaded));
    Ok(loaded)
}

fn resolve_module_file(name: &str, cwd: &Path, sources: &dyn Sources) -> Option<PathBuf> {
    let filename = if name.ends_with(KONFI_FILE_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{KONFI_FILE_EXTENSION}")
    };
    let path = Path::new(&filename);
    if path.is_absolute() {
        return sources.is_file(path).then(|| path.to_path_buf());
    }
    // The current file's directory is searched first, then KONFIPATH.
    let mut dirs = vec![cwd.to_path_buf()];
    if let Some(kpath) = sources.env(KONFI_PATH_ENV) {
        dirs.extend(
            kpath
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
        );
    }
    dirs.into_iter()
        .map(|dir| dir.join(&filename))
        .find(|candidate| sources.is_file(candidate))
}
