//! Placeholder remote-id helpers.
//!
//! Every object or relationship created locally gets a placeholder remote
//! id before the server assigns a real one. The prefix makes placeholders
//! recognizable so commit logic can detect unresolved ids.

use uuid::Uuid;

/// Prefix of every locally assigned placeholder remote id.
pub const LOCAL_ID_PREFIX: &str = "LocalInstance-";

/// Allocates a new globally unique placeholder remote id.
#[must_use]
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

/// True if `remote_id` is a locally assigned placeholder.
#[must_use]
pub fn is_local_id(remote_id: &str) -> bool {
    remote_id.starts_with(LOCAL_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_local_id_is_recognized_as_local() {
        let id = new_local_id();
        assert!(is_local_id(&id));
    }

    #[test]
    fn new_local_ids_are_unique() {
        assert_ne!(new_local_id(), new_local_id());
    }

    #[test]
    fn server_ids_are_not_local() {
        assert!(!is_local_id("SRV-1"));
        assert!(!is_local_id(""));
    }
}
