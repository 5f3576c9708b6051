//! Session id generation — `YYYYMMDDThhmmss_NNNN_xxxxxxxx`, sortable by
//! creation order within one process.
//!
//! `NNNN` is a per-process atomic counter so two sessions created in the
//! same second still sort correctly; the trailing 8 hex chars come from a
//! UUID v4 to keep ids distinct across processes without coordination.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a new session id.
pub fn generate_session_id() -> String {
    let now = Utc::now();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed) % 10_000;
    let short_hash = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{}_{:04}_{}", now.format("%Y%m%dT%H%M%S"), seq, short_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
    }

    #[test]
    fn id_has_expected_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 16); // YYYYMMDDThhmmss
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(generate_session_id());
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
