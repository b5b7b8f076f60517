use std::path::PathBuf;

/// Error type for the geomigrate crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[error("Failed to read migration script '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Script(String),
    #[error("{0}")]
    Verification(String),
    #[error("Migration {version} ('{name}') does not support downgrade")]
    Irreversible { version: u32, name: String },
    #[error("{0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

// Manual PartialEq implementation because postgres::Error and io::Error don't implement PartialEq
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Postgres(a), Self::Postgres(b)) => a.to_string() == b.to_string(),
            (
                Self::Io {
                    path: a,
                    source: sa,
                },
                Self::Io {
                    path: b,
                    source: sb,
                },
            ) => a == b && sa.kind() == sb.kind(),
            (Self::Script(a), Self::Script(b)) => a == b,
            (Self::Verification(a), Self::Verification(b)) => a == b,
            (
                Self::Irreversible {
                    version: va,
                    name: na,
                },
                Self::Irreversible {
                    version: vb,
                    name: nb,
                },
            ) => va == vb && na == nb,
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_compare_by_path_and_kind() {
        let a = Error::Io {
            path: PathBuf::from("a.up.sql"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let b = Error::Io {
            path: PathBuf::from("a.up.sql"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let c = Error::Io {
            path: PathBuf::from("b.up.sql"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn irreversible_message_names_the_migration() {
        let err = Error::Irreversible {
            version: 23,
            name: "convert_structures_position_to_geometry".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 23 ('convert_structures_position_to_geometry') does not support downgrade"
        );
    }

    #[test]
    fn strings_become_generic_errors() {
        let err: Error = "boom".to_string().into();
        assert_eq!(err, Error::Generic("boom".to_string()));
    }
}
