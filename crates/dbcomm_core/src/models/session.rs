//! Caller-owned session state.

/// Database selection and cached listings for one caller.
///
/// `collections` always describes `current_database`; it is recomputed on
/// every selection and may go stale relative to the live store in between.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Selected database, unset until explicitly chosen
    pub current_database: Option<String>,
    /// Database names from the last refresh
    pub databases: Vec<String>,
    /// Collection names of the selected database
    pub collections: Vec<String>,
}

impl SessionState {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is in the cached database list.
    pub fn has_database(&self, name: &str) -> bool {
        self.databases.iter().any(|db| db == name)
    }

    /// Whether `name` is in the cached collection list.
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.iter().any(|coll| coll == name)
    }

    /// The selected database name, if any.
    pub fn database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_checks() {
        let state = SessionState {
            current_database: Some("lab".to_string()),
            databases: vec!["admin".to_string(), "lab".to_string()],
            collections: vec!["samples".to_string()],
        };
        assert!(state.has_database("lab"));
        assert!(!state.has_database("prod"));
        assert!(state.has_collection("samples"));
        assert!(!state.has_collection("runs"));
        assert_eq!(state.database(), Some("lab"));
    }
}
