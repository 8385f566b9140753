//! Row shapes for each remote table and their mapping to the model.
//!
//! Remote columns may be missing or `null` on rows written by older
//! clients, so nearly everything decodes as `Option` and is defaulted when
//! the snapshot is assembled.

use crate::migration::{CURRENT_SCHEMA_VERSION, LegacyReward, LoadedSnapshot, SnapshotData, SnapshotV2};
use crate::model::{
    DailyQuests, Flashcard, MAX_INTERVAL_DAYS, Quadrant, Quest, Reflection, Settings, ShopItem, Snapshot, Subtask,
    Task, WeeklySchedule, default_effort,
};
use crate::remote::{RemoteError, Result, Table};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn encode<T: Serialize>(table: Table, row: &T) -> Result<Value> {
    serde_json::to_value(row).map_err(|e| RemoteError::Decode(format!("{}: {}", table, e)))
}

pub fn decode<T: DeserializeOwned>(table: Table, row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| RemoteError::Decode(format!("{}: {}", table, e)))
}

pub fn decode_all<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(|row| decode(table, row)).collect()
}

/// Schema version assumed for profiles that never recorded one.
fn legacy_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reflection_went_well: Option<String>,
    #[serde(default)]
    pub reflection_improve: Option<String>,
    #[serde(default)]
    pub intention: Option<String>,
    #[serde(default)]
    pub points: Option<u32>,
    #[serde(default)]
    pub schedule: Option<WeeklySchedule>,
    #[serde(default)]
    pub shop_items: Option<Vec<ShopItem>>,
    /// Only present on version 1 profiles; never written.
    #[serde(default, skip_serializing)]
    pub custom_rewards: Option<Vec<LegacyReward>>,
    #[serde(default)]
    pub settings: Option<Settings>,
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
}

impl ProfileRow {
    /// Profile created on first login.
    pub fn new(user_id: &str, name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: Some(name.to_string()),
            settings: Some(Settings::default()),
            schema_version: CURRENT_SCHEMA_VERSION,
            ..Default::default()
        }
    }

    pub fn from_snapshot(user_id: &str, snapshot: &Snapshot) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: Some(snapshot.name.clone()),
            reflection_went_well: Some(snapshot.reflection_went_well.clone()),
            reflection_improve: Some(snapshot.reflection_improve.clone()),
            intention: Some(snapshot.intention.clone()),
            points: Some(snapshot.points),
            schedule: Some(snapshot.schedule.clone()),
            shop_items: Some(snapshot.shop_items.clone()),
            custom_rewards: None,
            settings: Some(snapshot.settings.clone()),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyQuestsRow {
    pub user_id: String,
    #[serde(default)]
    pub work: Option<Quest>,
    #[serde(default)]
    pub health: Option<Quest>,
    #[serde(default)]
    pub relationship: Option<Quest>,
}

impl DailyQuestsRow {
    pub fn from_quests(user_id: &str, quests: &DailyQuests) -> Self {
        Self {
            user_id: user_id.to_string(),
            work: Some(quests.work.clone()),
            health: Some(quests.health.clone()),
            relationship: Some(quests.relationship.clone()),
        }
    }

    pub fn into_quests(self) -> DailyQuests {
        DailyQuests {
            work: self.work.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            relationship: self.relationship.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub quadrant: Option<Quadrant>,
    #[serde(default)]
    pub priority: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub effort: Option<u32>,
    #[serde(default)]
    pub subtasks: Option<Vec<Subtask>>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskRow {
    pub fn from_task(user_id: &str, task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            user_id: user_id.to_string(),
            title: Some(task.title.clone()),
            completed: Some(task.completed),
            quadrant: Some(task.quadrant),
            priority: Some(task.priority),
            created_at: Some(task.created_at),
            tags: Some(task.tags.clone()),
            purpose: task.purpose.clone(),
            effort: Some(task.effort),
            subtasks: Some(task.subtasks.clone()),
            deadline: task.deadline,
        }
    }

    pub fn into_task(self) -> Task {
        Task {
            id: self.id,
            title: self.title.unwrap_or_default(),
            completed: self.completed.unwrap_or_default(),
            quadrant: self.quadrant.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
            purpose: self.purpose,
            effort: self.effort.unwrap_or_else(default_effort).max(1),
            subtasks: self.subtasks.unwrap_or_default(),
            deadline: self.deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardRow {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub next_review: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval: Option<u32>,
}

impl FlashcardRow {
    pub fn from_card(user_id: &str, card: &Flashcard) -> Self {
        Self {
            id: card.id.clone(),
            user_id: user_id.to_string(),
            question: Some(card.question.clone()),
            answer: Some(card.answer.clone()),
            next_review: Some(card.next_review),
            interval: Some(card.interval_days),
        }
    }

    pub fn into_card(self) -> Flashcard {
        Flashcard {
            id: self.id,
            question: self.question.unwrap_or_default(),
            answer: self.answer.unwrap_or_default(),
            next_review: self.next_review.unwrap_or_default(),
            interval_days: self.interval.unwrap_or(1).clamp(1, MAX_INTERVAL_DAYS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRow {
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub content: Option<Value>,
}

impl ReflectionRow {
    pub fn from_reflection(user_id: &str, reflection: &Reflection) -> Self {
        Self {
            user_id: user_id.to_string(),
            date: reflection.date,
            content: Some(reflection.content.clone()),
        }
    }

    pub fn into_reflection(self) -> Reflection {
        Reflection {
            date: self.date,
            content: self.content.unwrap_or(Value::Null),
        }
    }
}

/// Everything fetched for one user during a load.
#[derive(Debug, Clone, Default)]
pub struct RemoteRows {
    pub profile: ProfileRow,
    pub quests: Option<DailyQuestsRow>,
    pub tasks: Vec<TaskRow>,
    pub flashcards: Vec<FlashcardRow>,
    pub reflections: Vec<ReflectionRow>,
}

impl RemoteRows {
    /// Build the pre-migration snapshot, defaulting every missing field.
    ///
    /// `fallback_name` is used when the profile has no name of its own.
    pub fn assemble(self, fallback_name: &str) -> LoadedSnapshot {
        let RemoteRows {
            profile,
            quests,
            tasks,
            flashcards,
            reflections,
        } = self;

        let mut reflections: Vec<Reflection> = reflections
            .into_iter()
            .map(ReflectionRow::into_reflection)
            .collect();
        reflections.sort_by_key(|r| r.date);

        let name = profile
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string());

        let data = SnapshotData {
            name,
            reflection_went_well: profile.reflection_went_well.unwrap_or_default(),
            reflection_improve: profile.reflection_improve.unwrap_or_default(),
            intention: profile.intention.unwrap_or_default(),
            points: profile.points.unwrap_or_default(),
            tasks: tasks.into_iter().map(TaskRow::into_task).collect(),
            daily_quests: quests.map(DailyQuestsRow::into_quests).unwrap_or_default(),
            flashcards: flashcards.into_iter().map(FlashcardRow::into_card).collect(),
            reflections,
            schedule: profile.schedule.unwrap_or_default(),
        };

        let shop_items = profile.shop_items.unwrap_or_default();
        if profile.schema_version < CURRENT_SCHEMA_VERSION && shop_items.is_empty() {
            LoadedSnapshot::V1 {
                data,
                custom_rewards: profile.custom_rewards.unwrap_or_default(),
            }
        } else {
            LoadedSnapshot::V2(SnapshotV2 {
                data,
                shop_items,
                settings: profile.settings,
            })
        }
    }
}
