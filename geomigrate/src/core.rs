use crate::error::Error;
use chrono::Utc;
use postgres::Transaction;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which half of a migration is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The forward change.
    Up,
    /// The rollback.
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(Error::Script(format!(
                "Unknown migration direction '{}', expected 'up' or 'down'",
                other
            ))),
        }
    }
}

/// Represents a failure during a migration.
#[derive(Debug, PartialEq)]
pub struct MigrationFailure<'migration> {
    pub(crate) migration: &'migration dyn Migration,
    pub(crate) error: Error,
}

impl<'migration> MigrationFailure<'migration> {
    /// Get the migration that failed.
    pub fn migration(&self) -> &dyn Migration {
        self.migration
    }

    /// Get the error that caused the migration to fail.
    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_error(self) -> Error {
        self.error
    }
}

/// A report of what happened when a single migration was applied in one direction.
#[derive(Debug, PartialEq)]
pub struct MigrationReport<'migration> {
    pub direction: Direction,
    /// Set when the migration ran (or was stamped as satisfied) and its transaction committed.
    pub applied: Option<AppliedMigration>,
    /// True when the precondition reported the target state as already present.
    pub skipped: bool,
    pub failing_migration: Option<MigrationFailure<'migration>>,
}

impl<'migration> MigrationReport<'migration> {
    pub fn is_success(&self) -> bool {
        self.failing_migration.is_none()
    }

    /// Turn a failed report into the error that caused it.
    pub fn into_result(self) -> Result<AppliedMigration, Error> {
        match (self.failing_migration, self.applied) {
            (Some(failure), _) => Err(failure.into_error()),
            (None, Some(applied)) => Ok(applied),
            (None, None) => Err(Error::Generic(format!(
                "Migration {} produced neither a result nor a failure",
                self.direction
            ))),
        }
    }
}

/// Represents the result of a migration precondition check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Precondition {
    /// The migration's target state is already present and the script should not run.
    AlreadySatisfied,
    /// The migration needs to be applied.
    NeedsApply,
}

/// Represents a migration that has been applied to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    /// The version number of the migration.
    pub version: u32,
    /// The name of the migration.
    pub name: String,
    pub direction: Direction,
    /// The timestamp when the transaction committed.
    pub applied_at: chrono::DateTime<Utc>,
    /// The checksum of what was applied, see [Migration::checksum].
    pub checksum: String,
    pub duration: Duration,
}

/// A trait that must be implemented to define a migration.
/// The `version` value must be greater than 0.
/// The `name` method is optional, and only aids in debugging / observability.
pub trait Migration {
    /// Returns the version number of this migration, e.g. `23` for `000023_*.up.sql`.
    fn version(&self) -> u32;

    /// Returns the name of this migration.
    ///
    /// The default implementation returns "Migration {version}".
    fn name(&self) -> String {
        format!("Migration {}", self.version())
    }

    /// Execute the migration's "up" logic inside the supplied transaction.
    fn postgres_up(&self, tx: &mut Transaction) -> Result<(), Error>;

    /// Rollback this migration. The default implementation reports the migration as irreversible.
    fn postgres_down(&self, _tx: &mut Transaction) -> Result<(), Error> {
        Err(Error::Irreversible {
            version: self.version(),
            name: self.name(),
        })
    }

    /// Optional precondition check, run inside the migration's transaction before
    /// `postgres_up` / `postgres_down`.
    ///
    /// If this returns `Precondition::AlreadySatisfied`, the transaction is committed without
    /// running the script and the report is marked as skipped.
    ///
    /// # Example
    /// ```ignore
    /// fn postgres_precondition(&self, tx: &mut Transaction, direction: Direction) -> Result<Precondition, Error> {
    ///     let type_name = SchemaVerifier::new(tx).column_type_name("structures", "position")?;
    ///     let target = match direction {
    ///         Direction::Up => "geometry",
    ///         Direction::Down => "point",
    ///     };
    ///     if type_name.as_deref() == Some(target) {
    ///         Ok(Precondition::AlreadySatisfied)
    ///     } else {
    ///         Ok(Precondition::NeedsApply)
    ///     }
    /// }
    /// ```
    fn postgres_precondition(
        &self,
        _tx: &mut Transaction,
        _direction: Direction,
    ) -> Result<Precondition, Error> {
        Ok(Precondition::NeedsApply)
    }

    /// Checksum recorded in [AppliedMigration]. Defaults to a hash of version, name and direction;
    /// script-backed migrations hash the SQL they run instead.
    fn checksum(&self, direction: Direction) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.name().as_bytes());
        hasher.update(b"|");
        hasher.update(direction.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl PartialEq for dyn Migration + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.version() == other.version() && self.name() == other.name()
    }
}

impl fmt::Debug for dyn Migration + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version())
            .field("name", &self.name())
            .finish()
    }
}

pub(crate) type StartHook = Box<dyn Fn(u32, &str) + Send + Sync>;
pub(crate) type CompleteHook = Box<dyn Fn(u32, &str, Duration) + Send + Sync>;
pub(crate) type ErrorHook = Box<dyn Fn(u32, &str, &Error) + Send + Sync>;

/// Observability callbacks shared by applicators.
#[derive(Default)]
pub(crate) struct Hooks {
    pub on_migration_start: Option<StartHook>,
    pub on_migration_complete: Option<CompleteHook>,
    pub on_migration_skipped: Option<StartHook>,
    pub on_migration_error: Option<ErrorHook>,
}

// Manual Debug impl since closures don't implement Debug
impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field(
                "on_migration_complete",
                &self.on_migration_complete.is_some(),
            )
            .field("on_migration_skipped", &self.on_migration_skipped.is_some())
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn started(&self, version: u32, name: &str) {
        if let Some(ref callback) = self.on_migration_start {
            callback(version, name);
        }
    }

    pub fn completed(&self, version: u32, name: &str, duration: Duration) {
        if let Some(ref callback) = self.on_migration_complete {
            callback(version, name, duration);
        }
    }

    pub fn skipped(&self, version: u32, name: &str) {
        if let Some(ref callback) = self.on_migration_skipped {
            callback(version, name);
        }
    }

    pub fn failed(&self, version: u32, name: &str, error: &Error) {
        if let Some(ref callback) = self.on_migration_error {
            callback(version, name, error);
        }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
