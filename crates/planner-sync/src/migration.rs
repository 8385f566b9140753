//! Upgrades a freshly loaded snapshot to the current shape.
//!
//! Loads arrive as a [`LoadedSnapshot`] tagged with the profile schema
//! version they were stored under. [`migrate`] upgrades older versions one
//! step at a time, then applies the load-time fixups every snapshot gets:
//!
//! 1. Daily reset of quest completion when the local calendar day changed.
//! 2. Default rewards when the shop is empty.
//! 3. Default settings when none were stored.
//!
//! Migration is pure and idempotent: feeding the result back in (with the
//! returned watermark) changes nothing.

use crate::model::{
    DailyQuests, Flashcard, Reflection, Settings, ShopItem, Snapshot, Task, WeeklySchedule,
    default_shop_items,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Profile schema version written by this crate.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Icon given to legacy rewards, which never had one.
const LEGACY_REWARD_ICON: &str = "gift";

/// Reward stored on version 1 profiles under `custom_rewards`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyReward {
    pub id: String,
    pub title: String,
    pub cost: u32,
    #[serde(default)]
    pub icon: Option<String>,
}

impl From<LegacyReward> for ShopItem {
    fn from(reward: LegacyReward) -> Self {
        ShopItem {
            id: reward.id,
            title: reward.title,
            cost: reward.cost.max(1),
            icon: reward.icon.unwrap_or_else(|| LEGACY_REWARD_ICON.to_string()),
            description: None,
            is_default: false,
        }
    }
}

/// The parts of a snapshot every schema version shares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotData {
    pub name: String,
    pub reflection_went_well: String,
    pub reflection_improve: String,
    pub intention: String,
    pub points: u32,
    pub tasks: Vec<Task>,
    pub daily_quests: DailyQuests,
    pub flashcards: Vec<Flashcard>,
    pub reflections: Vec<Reflection>,
    pub schedule: WeeklySchedule,
}

impl SnapshotData {
    fn into_snapshot(self, shop_items: Vec<ShopItem>, settings: Settings) -> Snapshot {
        Snapshot {
            name: self.name,
            reflection_went_well: self.reflection_went_well,
            reflection_improve: self.reflection_improve,
            intention: self.intention,
            points: self.points,
            tasks: self.tasks,
            daily_quests: self.daily_quests,
            flashcards: self.flashcards,
            reflections: self.reflections,
            schedule: self.schedule,
            shop_items,
            settings,
        }
    }
}

/// Current-version payload of a [`LoadedSnapshot`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotV2 {
    pub data: SnapshotData,
    pub shop_items: Vec<ShopItem>,
    /// Missing on rows written before settings lived on the profile.
    pub settings: Option<Settings>,
}

/// A snapshot as assembled from storage, before migration.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedSnapshot {
    /// Profiles that kept user rewards in `custom_rewards` and had no shop
    /// or settings of their own.
    V1 {
        data: SnapshotData,
        custom_rewards: Vec<LegacyReward>,
    },
    V2(SnapshotV2),
}

impl LoadedSnapshot {
    pub fn version(&self) -> u32 {
        match self {
            Self::V1 { .. } => 1,
            Self::V2(_) => 2,
        }
    }

    /// Empty snapshot used when a load fails: defaults plus the display name.
    pub fn fallback(name: impl Into<String>) -> Self {
        Self::V2(SnapshotV2 {
            data: SnapshotData {
                name: name.into(),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

impl From<Snapshot> for LoadedSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        Self::V2(SnapshotV2 {
            data: SnapshotData {
                name: snapshot.name,
                reflection_went_well: snapshot.reflection_went_well,
                reflection_improve: snapshot.reflection_improve,
                intention: snapshot.intention,
                points: snapshot.points,
                tasks: snapshot.tasks,
                daily_quests: snapshot.daily_quests,
                flashcards: snapshot.flashcards,
                reflections: snapshot.reflections,
                schedule: snapshot.schedule,
            },
            shop_items: snapshot.shop_items,
            settings: Some(snapshot.settings),
        })
    }
}

/// Result of a migration: the live snapshot plus the new daily-reset watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub snapshot: Snapshot,
    /// Calendar day to persist as "last seen".
    pub watermark: NaiveDate,
}

/// Version 1 → 2: built-in rewards first, then the user's legacy rewards.
fn upgrade_v1(data: SnapshotData, custom_rewards: Vec<LegacyReward>) -> SnapshotV2 {
    debug!(
        "Upgrading v1 profile ({} legacy reward(s))",
        custom_rewards.len()
    );
    let mut shop_items = default_shop_items();
    for reward in custom_rewards {
        if shop_items.iter().all(|item| item.id != reward.id) {
            shop_items.push(reward.into());
        }
    }
    SnapshotV2 {
        data,
        shop_items,
        settings: None,
    }
}

/// Bring `loaded` up to date for `today` (the user's local calendar day).
///
/// `last_seen` is the watermark persisted by the previous session.
pub fn migrate(
    loaded: LoadedSnapshot,
    last_seen: Option<NaiveDate>,
    today: NaiveDate,
) -> Migrated {
    let SnapshotV2 {
        mut data,
        mut shop_items,
        settings,
    } = match loaded {
        LoadedSnapshot::V1 {
            data,
            custom_rewards,
        } => upgrade_v1(data, custom_rewards),
        LoadedSnapshot::V2(current) => current,
    };

    if last_seen != Some(today) {
        debug!("New day ({:?} -> {}), resetting daily quests", last_seen, today);
        data.daily_quests.reset_completion();
    }

    if shop_items.is_empty() {
        shop_items = default_shop_items();
    }

    let settings = settings.unwrap_or_default();

    Migrated {
        snapshot: data.into_snapshot(shop_items, settings),
        watermark: today,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Quest;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn completed_quests() -> DailyQuests {
        let quest = |title: &str| Quest {
            title: title.to_string(),
            completed: true,
        };
        DailyQuests {
            work: quest("Finish draft"),
            health: quest("Run"),
            relationship: quest("Call mom"),
        }
    }

    fn legacy() -> LoadedSnapshot {
        LoadedSnapshot::V1 {
            data: SnapshotData {
                name: "Ada".into(),
                points: 7,
                daily_quests: completed_quests(),
                ..Default::default()
            },
            custom_rewards: vec![LegacyReward {
                id: "custom-1".into(),
                title: "Concert ticket".into(),
                cost: 40,
                icon: None,
            }],
        }
    }

    #[test]
    fn test_daily_reset_on_new_day() {
        let loaded = LoadedSnapshot::V2(SnapshotV2 {
            data: SnapshotData {
                daily_quests: completed_quests(),
                ..Default::default()
            },
            shop_items: default_shop_items(),
            settings: None,
        });

        let migrated = migrate(loaded, Some(day(9)), day(10));

        let quests = &migrated.snapshot.daily_quests;
        assert!(!quests.work.completed);
        assert!(!quests.health.completed);
        assert!(!quests.relationship.completed);
        assert_eq!(quests.work.title, "Finish draft");
        assert_eq!(migrated.watermark, day(10));
    }

    #[test]
    fn test_same_day_leaves_quests_alone() {
        let loaded = LoadedSnapshot::V2(SnapshotV2 {
            data: SnapshotData {
                daily_quests: completed_quests(),
                ..Default::default()
            },
            shop_items: default_shop_items(),
            settings: None,
        });

        let migrated = migrate(loaded, Some(day(10)), day(10));

        assert!(migrated.snapshot.daily_quests.all_completed());
        assert_eq!(migrated.watermark, day(10));
    }

    #[test]
    fn test_first_run_without_watermark_resets() {
        let migrated = migrate(legacy(), None, day(10));
        assert!(!migrated.snapshot.daily_quests.work.completed);
    }

    #[test]
    fn test_v1_upgrade_keeps_legacy_rewards_after_defaults() {
        let migrated = migrate(legacy(), Some(day(10)), day(10));

        let items = &migrated.snapshot.shop_items;
        let defaults = default_shop_items();
        assert_eq!(items.len(), defaults.len() + 1);
        assert_eq!(&items[..defaults.len()], defaults.as_slice());

        let custom = items.last().unwrap();
        assert_eq!(custom.id, "custom-1");
        assert_eq!(custom.icon, LEGACY_REWARD_ICON);
        assert!(!custom.is_default);

        assert_eq!(migrated.snapshot.settings, Settings::default());
        assert_eq!(migrated.snapshot.points, 7);
    }

    #[test]
    fn test_empty_shop_is_backfilled() {
        let migrated = migrate(LoadedSnapshot::fallback("Ada"), None, day(10));
        assert_eq!(migrated.snapshot.shop_items, default_shop_items());
        assert_eq!(migrated.snapshot.name, "Ada");
    }

    #[test]
    fn test_existing_settings_survive() {
        let settings = Settings {
            language: "es".into(),
            sound_enabled: false,
            ..Default::default()
        };
        let loaded = LoadedSnapshot::V2(SnapshotV2 {
            data: SnapshotData::default(),
            shop_items: Vec::new(),
            settings: Some(settings.clone()),
        });

        let migrated = migrate(loaded, None, day(10));
        assert_eq!(migrated.snapshot.settings, settings);
    }

    #[test]
    fn test_migration_is_idempotent() {
        for raw in [legacy(), LoadedSnapshot::fallback("Bo")] {
            let once = migrate(raw.clone(), Some(day(9)), day(10));
            let twice = migrate(
                LoadedSnapshot::from(once.snapshot.clone()),
                Some(once.watermark),
                day(10),
            );
            assert_eq!(once, twice);

            // Pure: same inputs, same output.
            assert_eq!(migrate(raw, Some(day(9)), day(10)), once);
        }
    }
}
