//! 🗑️ Retention: deciding which old generations live, which get unplugged,
//! and which get a quiet funeral.
//!
//! 🎬 *[three old indices sit in a waiting room. one alias walks in.]*
//! *["Only the youngest of you may stay," it says. "The rest... remove_index."]*
//!
//! This is a pure function over an ascending (oldest-first) list of old
//! generation names. No I/O. No clock. No feelings. It decides whether data is
//! silently deleted, so the arithmetic here is load-bearing down to the
//! off-by-one:
//!
//! | retention | action per old generation `i` (0-based, oldest first) |
//! |-----------|--------------------------------------------------------|
//! | negative  | `Remove` (unbind alias, keep the index) for every one  |
//! | `r >= 0`  | `Remove` if `i >= n - r`, otherwise `RemoveIndex`      |
//!
//! So `0` deletes every old generation and any negative number deletes none.
//! Yes, that asymmetry is intentional. No, `0` does not mean infinity. 🦆

use serde::{Deserialize, Serialize};

/// 🎭 One entry of an alias-update request.
///
/// Serializes exactly like an Elasticsearch `_aliases` action:
/// `{"add":{"alias":..,"index":..}}`, `{"remove":{..}}`, `{"remove_index":{"index":..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasAction {
    /// 🔗 Point the alias at this index.
    Add { alias: String, index: String },
    /// ✂️ Unbind the alias from this index. The index itself stays.
    Remove { alias: String, index: String },
    /// 💀 Delete the whole index. There is no undo.
    RemoveIndex { index: String },
}

impl AliasAction {
    /// 📛 The index this action touches, whatever its flavor.
    pub fn index(&self) -> &str {
        match self {
            AliasAction::Add { index, .. }
            | AliasAction::Remove { index, .. }
            | AliasAction::RemoveIndex { index } => index,
        }
    }
}

/// 🔢 How many *old* generations survive a switch as unaliased backups.
///
/// Deserializes from a signed integer: negative means [`Retention::KeepAll`],
/// anything else is [`Retention::Latest`]. The freshly switched generation
/// never counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "i64")]
pub enum Retention {
    /// ♾️ Delete nothing, ever. Just unbind the alias from old generations.
    #[default]
    KeepAll,
    /// 📦 Keep the newest `n` old generations, delete everything older.
    Latest(usize),
}

impl From<i64> for Retention {
    fn from(raw: i64) -> Self {
        if raw < 0 {
            Retention::KeepAll
        } else {
            Retention::Latest(raw as usize)
        }
    }
}

/// 🧮 Build the retention part of an alias update.
///
/// `old_generations` must already be sorted oldest first. The returned actions
/// follow the same order. The `Add` for the new generation is not included;
/// the switcher prepends it.
pub fn plan(alias: &str, old_generations: &[String], retention: Retention) -> Vec<AliasAction> {
    let total = old_generations.len();
    // -- 🎯 first index that survives; everything before it is deleted
    let first_kept = match retention {
        Retention::KeepAll => 0,
        Retention::Latest(keep) => total.saturating_sub(keep),
    };

    old_generations
        .iter()
        .enumerate()
        .map(|(position, index)| {
            if position >= first_kept {
                AliasAction::Remove {
                    alias: alias.to_string(),
                    index: index.clone(),
                }
            } else {
                AliasAction::RemoveIndex {
                    index: index.clone(),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_old_generations() -> Vec<String> {
        vec!["g1".to_string(), "g2".to_string(), "g3".to_string()]
    }

    fn unbind(index: &str) -> AliasAction {
        AliasAction::Remove {
            alias: "products".to_string(),
            index: index.to_string(),
        }
    }

    fn delete(index: &str) -> AliasAction {
        AliasAction::RemoveIndex {
            index: index.to_string(),
        }
    }

    #[test]
    fn the_one_where_negative_retention_spares_everyone() {
        let actions = plan("products", &three_old_generations(), Retention::from(-1));
        assert_eq!(actions, vec![unbind("g1"), unbind("g2"), unbind("g3")]);
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, AliasAction::RemoveIndex { .. })),
            "negative retention must never delete an index"
        );
    }

    #[test]
    fn the_one_where_any_negative_number_means_keep_all() {
        assert_eq!(Retention::from(-42), Retention::KeepAll);
        assert_eq!(Retention::from(i64::MIN), Retention::KeepAll);
    }

    #[test]
    fn the_one_where_zero_retention_deletes_every_old_generation() {
        let actions = plan("products", &three_old_generations(), Retention::from(0));
        assert_eq!(actions, vec![delete("g1"), delete("g2"), delete("g3")]);
    }

    #[test]
    fn the_one_where_retention_one_keeps_the_newest_one_unbound() {
        // 🎯 i >= n - r  →  i >= 3 - 1  →  only index 2 survives
        let actions = plan("products", &three_old_generations(), Retention::from(1));
        assert_eq!(actions, vec![delete("g1"), delete("g2"), unbind("g3")]);
    }

    #[test]
    fn the_one_where_retention_two_keeps_the_newest_two_unbound() {
        let actions = plan("products", &three_old_generations(), Retention::from(2));
        assert_eq!(actions, vec![delete("g1"), unbind("g2"), unbind("g3")]);
    }

    #[test]
    fn the_one_where_retention_bigger_than_history_deletes_nothing() {
        let actions = plan("products", &three_old_generations(), Retention::from(10));
        assert_eq!(actions, vec![unbind("g1"), unbind("g2"), unbind("g3")]);
    }

    #[test]
    fn the_one_where_retention_equal_to_history_deletes_nothing() {
        let actions = plan("products", &three_old_generations(), Retention::from(3));
        assert_eq!(actions, vec![unbind("g1"), unbind("g2"), unbind("g3")]);
    }

    #[test]
    fn the_one_where_there_is_no_history_at_all() {
        assert!(plan("products", &[], Retention::from(0)).is_empty());
        assert!(plan("products", &[], Retention::KeepAll).is_empty());
    }

    #[test]
    fn the_one_where_actions_speak_fluent_elasticsearch() {
        let actions = vec![
            AliasAction::Add {
                alias: "products".to_string(),
                index: "products_20240102030405".to_string(),
            },
            unbind("g2"),
            delete("g1"),
        ];
        let rendered = serde_json::to_value(&actions).expect("💀 actions refused to serialize");
        assert_eq!(
            rendered,
            json!([
                {"add": {"alias": "products", "index": "products_20240102030405"}},
                {"remove": {"alias": "products", "index": "g2"}},
                {"remove_index": {"index": "g1"}},
            ])
        );
    }

    #[test]
    fn the_one_where_retention_comes_from_a_plain_integer_in_config() {
        let keep_two: Retention = serde_json::from_value(json!(2)).expect("💀 2 is a number");
        let keep_all: Retention = serde_json::from_value(json!(-1)).expect("💀 -1 is a number");
        assert_eq!(keep_two, Retention::Latest(2));
        assert_eq!(keep_all, Retention::KeepAll);
    }
}
