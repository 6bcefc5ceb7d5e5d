//! 🕰️ Generations: one physical index per ingestion cycle, named by the clock.
//!
//! A generation of alias `products` created at 2024-01-02 03:04:05 UTC is
//! called `products_20240102030405`. Fixed-width, zero-padded, UTC: so for
//! one alias, sorting names as strings sorts them by creation time. That is
//! the whole trick. It lets the switcher find "everything older than me"
//! with a string sort instead of a metadata query.
//!
//! ⚠️ Two generations of the same alias created inside the same second get
//! the same name. The second create fails at the backend. Known limitation,
//! not defended against. Don't run two reindexes of one alias in parallel. 🦆

use chrono::{DateTime, Utc};

/// 🕐 Second precision, no separators. Lexicographic == chronological.
const GENERATION_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// 📛 One physical index created for one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Generation {
    /// 🏗️ Derive the generation of `alias` for the instant `created_at`.
    pub fn new(alias: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            name: generation_name(alias, created_at),
            created_at,
        }
    }
}

/// 🔤 `<alias>_<YYYYmmddHHMMSS>` in UTC.
pub fn generation_name(alias: &str, created_at: DateTime<Utc>) -> String {
    format!("{}_{}", alias, created_at.format(GENERATION_TIMESTAMP_FORMAT))
}

/// 🔍 Does `name` look like `<alias>_<digits>`?
///
/// The alias is matched literally, so an alias full of regex-looking
/// characters can't accidentally adopt someone else's indices.
pub fn is_generation_of(alias: &str, name: &str) -> bool {
    name.strip_prefix(alias)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
}

/// 📚 Pick the generations of `alias` out of a catalog listing, skipping
/// `current`, oldest first.
pub fn old_generations<I>(alias: &str, current: &str, catalog: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut old: Vec<String> = catalog
        .into_iter()
        .filter(|name| name != current && is_generation_of(alias, name))
        .collect();
    old.sort();
    // -- 🧹 catalogs should not repeat themselves, but we don't plan deletions on trust
    old.dedup();
    old
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("💀 the calendar disagrees with this test")
    }

    #[test]
    fn the_one_where_the_clock_becomes_a_name() {
        let generation = Generation::new("products", at(2024, 1, 2, 3, 4, 5));
        assert_eq!(generation.name, "products_20240102030405");
        assert_eq!(generation.created_at, at(2024, 1, 2, 3, 4, 5));
    }

    #[test]
    fn the_one_where_alphabetical_order_is_also_time_order() {
        // 🧪 a spread of instants, including ones where naive formatting would
        // flip the order (single-digit months, hours, year rollover)
        let start = at(2023, 12, 31, 23, 59, 58);
        let instants: Vec<DateTime<Utc>> = [0i64, 1, 2, 61, 3_600, 86_400 * 40, 86_400 * 400]
            .iter()
            .map(|secs| start + Duration::seconds(*secs))
            .collect();

        let names: Vec<String> = instants
            .iter()
            .map(|t| generation_name("products", *t))
            .collect();

        for pair in names.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }

        let mut shuffled = names.clone();
        shuffled.reverse();
        shuffled.sort();
        assert_eq!(shuffled, names);
    }

    #[test]
    fn the_one_where_only_real_generations_are_recognised() {
        assert!(is_generation_of("products", "products_20240102030405"));
        assert!(is_generation_of("products", "products_1"));
        assert!(!is_generation_of("products", "products"));
        assert!(!is_generation_of("products", "products_"));
        assert!(!is_generation_of("products", "products_2024-01-02"));
        assert!(!is_generation_of("products", "products_v2_20240102030405"));
        assert!(!is_generation_of("products", "other_20240102030405"));
        assert!(!is_generation_of("prod", "products_20240102030405"));
    }

    #[test]
    fn the_one_where_the_alias_is_not_a_regex() {
        assert!(is_generation_of("a.b", "a.b_20240102030405"));
        assert!(!is_generation_of("a.b", "axb_20240102030405"));
    }

    #[test]
    fn the_one_where_the_catalog_is_sorted_and_we_are_left_out() {
        let catalog = vec![
            "products_20240301000000".to_string(),
            ".kibana".to_string(),
            "products_20240101000000".to_string(),
            "products_20240401000000".to_string(),
            "products_backup".to_string(),
            "orders_20240101000000".to_string(),
            "products_20240201000000".to_string(),
        ];
        let old = old_generations("products", "products_20240401000000", catalog);
        assert_eq!(
            old,
            vec![
                "products_20240101000000".to_string(),
                "products_20240201000000".to_string(),
                "products_20240301000000".to_string(),
            ]
        );
    }
}
