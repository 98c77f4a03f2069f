use chrono::Utc;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Attempts to insert an order before giving up on number collisions.
pub const MAX_ATTEMPTS: u32 = 3;

const SUFFIX_LEN: usize = 6;

/// Produces a human-readable order number: `PREFIX-<epoch-ms>-<6 uppercase
/// alphanumerics>`. Collisions are vanishingly rare at realistic rates; the
/// unique constraint on the order-number column is the backstop, and callers
/// retry up to [`MAX_ATTEMPTS`] when it fires.
pub fn generate(prefix: &str) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().timestamp_millis(),
        suffix.to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_has_prefix_timestamp_and_suffix() {
        let number = generate("SO");
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "SO");
        assert!(parts[1].parse::<i64>().unwrap() > 0);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn number_fits_the_column() {
        for prefix in ["SO", "PO"] {
            assert!(generate(prefix).len() <= 50);
        }
    }

    #[test]
    fn consecutive_numbers_differ() {
        let a = generate("PO");
        let b = generate("PO");
        assert_ne!(a, b);
    }
}
