//! Migration scripts stored as SQL files.
//!
//! Files follow the `NNNNNN_description.(up|down).sql` convention, for example
//! `000023_convert_structures_position_to_geometry.up.sql`. A pair of files sharing a stem forms
//! one [ScriptMigration]; the `.down.sql` half is optional.

use crate::core::{sha256_hex, Direction, Migration};
use crate::error::Error;
use postgres::Transaction;
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory, relative to a project root, that holds migration scripts.
pub const MIGRATIONS_DIR: &str = "database/migrations";

/// The parsed parts of a script file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptName {
    pub version: u32,
    pub name: String,
    pub direction: Direction,
}

impl ScriptName {
    /// Parse a file name such as `000023_convert_structures_position_to_geometry.up.sql`.
    pub fn parse(file_name: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| {
            Error::Script(format!(
                "Invalid migration file name '{}': {}. Expected NNNNNN_name.up.sql or NNNNNN_name.down.sql",
                file_name, reason
            ))
        };

        let (stem, direction) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
            (stem, Direction::Up)
        } else if let Some(stem) = file_name.strip_suffix(".down.sql") {
            (stem, Direction::Down)
        } else {
            return Err(invalid("missing .up.sql/.down.sql suffix"));
        };

        let (digits, name) = stem
            .split_once('_')
            .ok_or_else(|| invalid("missing '_' between version and name"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("version prefix must be digits"));
        }
        let version: u32 = digits
            .parse()
            .map_err(|_| invalid("version prefix is out of range"))?;
        if version == 0 {
            return Err(invalid("version must be greater than 0"));
        }
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }

        Ok(Self {
            version,
            name: name.to_string(),
            direction,
        })
    }

    /// The shared part of the up/down file names, e.g. `000023_convert_structures_position_to_geometry`.
    pub fn stem(&self) -> String {
        format!("{:06}_{}", self.version, self.name)
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}.sql", self.stem(), self.direction)
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A single SQL script and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlScript {
    pub name: ScriptName,
    /// `None` for scripts embedded in the binary.
    pub path: Option<PathBuf>,
    pub sql: String,
}

impl SqlScript {
    /// Build a script from a file name and its contents (typically `include_str!`).
    pub fn new(file_name: &str, sql: impl Into<String>) -> Result<Self, Error> {
        let name = ScriptName::parse(file_name)?;
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(Error::Script(format!(
                "Migration script '{}' is empty",
                file_name
            )));
        }
        Ok(Self {
            name,
            path: None,
            sql,
        })
    }

    /// Read a script from disk. The direction and version come from the file name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| {
                Error::Script(format!(
                    "Migration script path '{}' has no usable file name",
                    path.display()
                ))
            })?;
        let sql = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut script = Self::new(file_name, sql)?;
        script.path = Some(path.to_path_buf());
        Ok(script)
    }

    pub fn direction(&self) -> Direction {
        self.name.direction
    }

    /// SHA-256 of the SQL text.
    pub fn checksum(&self) -> String {
        sha256_hex(self.sql.as_bytes())
    }

    /// Where the script came from, for messages.
    pub fn origin(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => format!("<embedded {}>", self.name),
        }
    }
}

/// SHA-256 hex of an SQL text, as recorded for script-backed migrations.
pub fn sql_checksum(sql: &str) -> String {
    sha256_hex(sql.as_bytes())
}

/// Candidate migration directories: `database/migrations` under the current directory and
/// under each of its ancestors, nearest first.
pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        while let Some(current) = dir {
            roots.push(current.join(MIGRATIONS_DIR));
            dir = current.parent();
        }
    } else {
        roots.push(PathBuf::from(MIGRATIONS_DIR));
    }
    roots
}

/// Find `file_name` in the first root that contains it.
pub fn locate(file_name: &str, roots: &[PathBuf]) -> Result<PathBuf, Error> {
    roots
        .iter()
        .map(|root| root.join(file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            Error::Script(format!(
                "Could not find migration file: {} (tried paths: {:?})",
                file_name,
                roots
                    .iter()
                    .map(|root| root.join(file_name))
                    .collect::<Vec<_>>()
            ))
        })
}

/// List the script files in `dir`, sorted by version then direction (up before down).
pub fn list_scripts(dir: impl AsRef<Path>) -> Result<Vec<ScriptName>, Error> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        if let Some(file_name) = entry.file_name().to_str() {
            // Non-migration files (READMEs, seeds) are ignored rather than rejected
            if let Ok(name) = ScriptName::parse(file_name) {
                names.push(name);
            }
        }
    }
    names.sort_by(|a, b| {
        (a.version, &a.name, a.direction == Direction::Down).cmp(&(
            b.version,
            &b.name,
            b.direction == Direction::Down,
        ))
    });
    Ok(names)
}

/// A migration backed by an up script and an optional down script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptMigration {
    up: Option<SqlScript>,
    down: Option<SqlScript>,
}

impl ScriptMigration {
    /// Pair an up script with an optional down script. Both must carry the same version and name.
    pub fn from_scripts(up: SqlScript, down: Option<SqlScript>) -> Result<Self, Error> {
        if up.direction() != Direction::Up {
            return Err(Error::Script(format!(
                "Expected an up script, got '{}'",
                up.name
            )));
        }
        if let Some(down) = &down {
            if down.direction() != Direction::Down {
                return Err(Error::Script(format!(
                    "Expected a down script, got '{}'",
                    down.name
                )));
            }
            if down.name.version != up.name.version || down.name.name != up.name.name {
                return Err(Error::Script(format!(
                    "Migration scripts do not belong together: '{}' and '{}'",
                    up.name, down.name
                )));
            }
        }
        Ok(Self { up: Some(up), down })
    }

    /// Wrap a lone script; only its own direction can be applied.
    pub fn single(script: SqlScript) -> Self {
        match script.direction() {
            Direction::Up => Self {
                up: Some(script),
                down: None,
            },
            Direction::Down => Self {
                up: None,
                down: Some(script),
            },
        }
    }

    /// Load `<stem>.up.sql` and, when present, `<stem>.down.sql` from `dir`.
    pub fn load(dir: impl AsRef<Path>, stem: &str) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let up = SqlScript::from_path(dir.join(format!("{}.up.sql", stem)))?;
        let down_path = dir.join(format!("{}.down.sql", stem));
        let down = if down_path.is_file() {
            Some(SqlScript::from_path(down_path)?)
        } else {
            None
        };
        Self::from_scripts(up, down)
    }

    pub fn script(&self, direction: Direction) -> Option<&SqlScript> {
        match direction {
            Direction::Up => self.up.as_ref(),
            Direction::Down => self.down.as_ref(),
        }
    }

    fn any_script(&self) -> &SqlScript {
        match (&self.up, &self.down) {
            (Some(script), _) | (None, Some(script)) => script,
            // Every constructor stores at least one script
            (None, None) => unreachable!("ScriptMigration without scripts"),
        }
    }

    fn run(&self, tx: &mut Transaction, direction: Direction) -> Result<(), Error> {
        match self.script(direction) {
            Some(script) => {
                tx.batch_execute(&script.sql)?;
                Ok(())
            }
            None if direction == Direction::Down => Err(Error::Irreversible {
                version: self.version(),
                name: self.name(),
            }),
            None => Err(Error::Script(format!(
                "Migration {} ('{}') has no up script",
                self.version(),
                self.name()
            ))),
        }
    }
}

impl Migration for ScriptMigration {
    fn version(&self) -> u32 {
        self.any_script().name.version
    }

    fn name(&self) -> String {
        self.any_script().name.name.clone()
    }

    fn postgres_up(&self, tx: &mut Transaction) -> Result<(), Error> {
        self.run(tx, Direction::Up)
    }

    fn postgres_down(&self, tx: &mut Transaction) -> Result<(), Error> {
        self.run(tx, Direction::Down)
    }

    fn checksum(&self, direction: Direction) -> String {
        match self.script(direction) {
            Some(script) => script.checksum(),
            None => sha256_hex(b""),
        }
    }
}
