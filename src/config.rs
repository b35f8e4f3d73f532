//! C8: the flat-text config/definitions/db file format shared by the server
//! config, the variable definitions file, and the persistent-values file
//! (spec.md §4.8), grounded on `original_source/src/hub/config.c` and
//! `src/hub/var.c`'s definition/db readers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};

use crate::consts;
use crate::logger::Severity;

/// One `key = value` line, with its 1-indexed line number for error messages.
struct Line {
    key: String,
    value: String,
    line_no: usize,
}

/// Parse the shared flat-text grammar: `#` starts a line comment, blank
/// lines are ignored, everything else is `key = value` with insignificant
/// whitespace stripped around `key`/`value`. A line longer than
/// `MAX_CONFIG_LINE_LEN` bytes is fatal with its line number.
fn parse_lines(path: &Path) -> anyhow::Result<Vec<Line>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading '{}'", path.display()))?;

    let mut lines = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line_no = idx + 1;
        if raw.len() > consts::MAX_CONFIG_LINE_LEN {
            bail!("line {} in '{}' exceeds the maximum allowable length", line_no, path.display());
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            anyhow!("parse error on line {} in '{}': expected 'key = value'", line_no, path.display())
        })?;
        lines.push(Line {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
            line_no,
        });
    }

    Ok(lines)
}

/// Server configuration, with every field defaulted per spec.md §6.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
    pub password: String,
    pub var_defs: PathBuf,
    pub var_db: PathBuf,
    pub log_file: Option<String>,
    pub log_level: Severity,
    pub log_replicate_stdout: bool,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_address: consts::DEFAULT_BIND_ADDRESS.to_string(),
            bind_port: consts::DEFAULT_BIND_PORT,
            password: String::new(),
            var_defs: PathBuf::from(consts::DEFAULT_VAR_DEFS),
            var_db: PathBuf::from(consts::DEFAULT_VAR_DB),
            log_file: None,
            log_level: Severity::Normal,
            log_replicate_stdout: true,
        }
    }
}

impl ServerConfig {
    /// Locate and load a config file. If `explicit_path` is `None`, fall
    /// back to `$HOME/.swhubrc`, then `/etc/seawolf_hub.conf`. If neither
    /// exists, run with defaults (a warning is logged by the caller once
    /// the logger is up, since we don't have one yet at this point).
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<(ServerConfig, Option<PathBuf>)> {
        let chosen = match explicit_path {
            Some(p) => Some(p.to_path_buf()),
            None => discover_config_path(),
        };

        let mut config = ServerConfig::default();
        let Some(path) = chosen else {
            return Ok((config, None));
        };

        for line in parse_lines(&path)? {
            config.apply(&line)?;
        }

        Ok((config, Some(path)))
    }

    fn apply(&mut self, line: &Line) -> anyhow::Result<()> {
        match line.key.as_str() {
            "bind_address" => self.bind_address = line.value.clone(),
            "bind_port" => {
                self.bind_port = line.value.parse().with_context(|| {
                    format!("line {}: bind_port must be a u16", line.line_no)
                })?
            }
            "password" => self.password = line.value.clone(),
            "var_defs" => self.var_defs = PathBuf::from(&line.value),
            "var_db" => self.var_db = PathBuf::from(&line.value),
            "log_file" => self.log_file = if line.value.is_empty() { None } else { Some(line.value.clone()) },
            "log_level" => {
                self.log_level = Severity::from_name(&line.value).with_context(|| {
                    format!("line {}: invalid log_level '{}'", line.line_no, line.value)
                })?
            }
            "log_replicate_stdout" => self.log_replicate_stdout = parse_bool(&line.value, line.line_no)?,
            // Unknown keys are tolerated (logged as a warning by the caller),
            // matching Hub_Config_processConfig's behavior.
            _ => {}
        }
        Ok(())
    }
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let candidate = PathBuf::from(home).join(".swhubrc");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    let etc = PathBuf::from("/etc/seawolf_hub.conf");
    if etc.exists() {
        return Some(etc);
    }
    None
}

fn parse_bool(value: &str, line_no: usize) -> anyhow::Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => bail!("line {}: expected 0 or 1, got '{}'", line_no, other),
    }
}

/// A single variable's static definition (spec.md §3, §4.8).
#[derive(Debug, Clone)]
pub struct VarDef {
    pub name: String,
    pub default: f64,
    pub persistent: bool,
    pub readonly: bool,
}

/// Load `name = default, persistent, readonly` lines. Any parse error,
/// range violation, or duplicate name is fatal.
pub fn load_var_defs(path: &Path) -> anyhow::Result<Vec<VarDef>> {
    let lines = parse_lines(path)
        .with_context(|| format!("loading variable definitions from '{}'", path.display()))?;

    let mut defs = Vec::with_capacity(lines.len());
    let mut seen = HashMap::new();
    for line in lines {
        if let Some(&first_line) = seen.get(&line.key) {
            bail!(
                "duplicate variable definition for '{}' on line {} (first defined on line {})",
                line.key, line.line_no, first_line
            );
        }
        seen.insert(line.key.clone(), line.line_no);

        let fields: Vec<&str> = line.value.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            bail!(
                "line {}: expected 'default, persistent, readonly' for variable '{}'",
                line.line_no, line.key
            );
        }

        let default: f64 = fields[0].parse().with_context(|| {
            format!("line {}: default value for '{}' is not a number", line.line_no, line.key)
        })?;
        let persistent = parse_bool(fields[1], line.line_no)
            .with_context(|| format!("'persistent' field for variable '{}'", line.key))?;
        let readonly = parse_bool(fields[2], line.line_no)
            .with_context(|| format!("'readonly' field for variable '{}'", line.key))?;

        defs.push(VarDef { name: line.key, default, persistent, readonly });
    }

    Ok(defs)
}

/// Load the persistent-values file. Every key must name an existing
/// variable (fatal if not); a key naming a variable that isn't flagged
/// persistent is tolerated with a caller-supplied warning callback.
pub fn load_persistent_values(
    path: &Path,
    defs: &[VarDef],
    mut warn: impl FnMut(&str),
) -> anyhow::Result<HashMap<String, f64>> {
    if !path.exists() {
        fs::write(path, "").with_context(|| format!("creating '{}'", path.display()))?;
        return Ok(HashMap::new());
    }

    let lines = parse_lines(path)
        .with_context(|| format!("loading persistent values from '{}'", path.display()))?;
    let by_name: HashMap<&str, &VarDef> = defs.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut values = HashMap::with_capacity(lines.len());
    for line in lines {
        let def = by_name.get(line.key.as_str()).ok_or_else(|| {
            anyhow!(
                "variable '{}' found in database but not present in variable definitions",
                line.key
            )
        })?;
        if !def.persistent {
            warn(&format!("loading value for non-persistent variable '{}' from database", line.key));
        }

        let value: f64 = line.value.parse().with_context(|| {
            format!("line {}: format error in variable database for '{}'", line.line_no, line.key)
        })?;
        values.insert(line.key, value);
    }

    Ok(values)
}
