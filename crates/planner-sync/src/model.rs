//! Data model for a user's planner state.
//!
//! Everything here serializes as camelCase JSON so a [`Snapshot`] can be
//! exported verbatim and read back by the web client.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The complete application state for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub name: String,
    pub reflection_went_well: String,
    pub reflection_improve: String,
    pub intention: String,
    /// Reward points. Never negative.
    pub points: u32,
    pub tasks: Vec<Task>,
    pub daily_quests: DailyQuests,
    pub flashcards: Vec<Flashcard>,
    /// Journal entries, oldest first, at most one per day.
    pub reflections: Vec<Reflection>,
    pub schedule: WeeklySchedule,
    pub shop_items: Vec<ShopItem>,
    pub settings: Settings,
}

impl Snapshot {
    /// Empty snapshot carrying only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn flashcard(&self, id: &str) -> Option<&Flashcard> {
        self.flashcards.iter().find(|c| c.id == id)
    }

    /// Cards whose next review is due at `now`.
    pub fn due_flashcards(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Flashcard> {
        self.flashcards.iter().filter(move |c| c.next_review <= now)
    }
}

/// Eisenhower matrix classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quadrant {
    /// Urgent and important.
    #[default]
    DoFirst,
    /// Important, not urgent.
    Schedule,
    /// Urgent, not important.
    Delegate,
    /// Neither.
    Eliminate,
}

impl FromStr for Quadrant {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dofirst" | "do-first" | "do" => Ok(Self::DoFirst),
            "schedule" => Ok(Self::Schedule),
            "delegate" => Ok(Self::Delegate),
            "eliminate" => Ok(Self::Eliminate),
            _ => Err(ParseError::Quadrant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub quadrant: Quadrant,
    pub priority: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Points awarded on completion.
    #[serde(default = "default_effort")]
    pub effort: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Subtask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

pub(crate) fn default_effort() -> u32 {
    1
}

impl Task {
    /// Effort as used for point accounting (at least 1).
    pub fn weight(&self) -> u32 {
        self.effort.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

/// Fields for creating a task; the store assigns id and creation time.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub quadrant: Quadrant,
    pub priority: bool,
    pub tags: Vec<String>,
    pub purpose: Option<String>,
    pub effort: Option<u32>,
    pub subtasks: Vec<Subtask>,
    pub deadline: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, quadrant: Quadrant) -> Self {
        Self {
            title: title.into(),
            quadrant,
            ..Default::default()
        }
    }

    pub(crate) fn into_task(self, id: String, now: DateTime<Utc>) -> Task {
        Task {
            id,
            title: self.title,
            completed: false,
            quadrant: self.quadrant,
            priority: self.priority,
            created_at: now,
            tags: self.tags,
            purpose: self.purpose,
            effort: self.effort.unwrap_or_else(default_effort).max(1),
            subtasks: self.subtasks,
            deadline: self.deadline,
        }
    }
}

// ============================================================================
// Daily quests
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quest {
    pub title: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestKind {
    Work,
    Health,
    Relationship,
}

impl FromStr for QuestKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "work" => Ok(Self::Work),
            "health" => Ok(Self::Health),
            "relationship" => Ok(Self::Relationship),
            _ => Err(ParseError::QuestKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyQuests {
    pub work: Quest,
    pub health: Quest,
    pub relationship: Quest,
}

impl DailyQuests {
    pub fn get(&self, kind: QuestKind) -> &Quest {
        match kind {
            QuestKind::Work => &self.work,
            QuestKind::Health => &self.health,
            QuestKind::Relationship => &self.relationship,
        }
    }

    pub fn get_mut(&mut self, kind: QuestKind) -> &mut Quest {
        match kind {
            QuestKind::Work => &mut self.work,
            QuestKind::Health => &mut self.health,
            QuestKind::Relationship => &mut self.relationship,
        }
    }

    pub fn all_completed(&self) -> bool {
        self.work.completed && self.health.completed && self.relationship.completed
    }

    pub(crate) fn reset_completion(&mut self) {
        self.work.completed = false;
        self.health.completed = false;
        self.relationship.completed = false;
    }
}

// ============================================================================
// Flashcards
// ============================================================================

/// Longest review interval, about a century.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub next_review: DateTime<Utc>,
    /// Days until the next review, between 1 and [`MAX_INTERVAL_DAYS`].
    #[serde(rename = "interval")]
    pub interval_days: u32,
}

/// How a review went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Easy,
    Hard,
}

impl FromStr for Rating {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "hard" => Ok(Self::Hard),
            _ => Err(ParseError::Rating(s.to_string())),
        }
    }
}

impl Flashcard {
    pub fn new(id: String, question: String, answer: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            question,
            answer,
            next_review: now,
            interval_days: 1,
        }
    }

    /// Apply the spaced-repetition rule: easy doubles the interval, hard keeps
    /// it, and the card becomes due again `interval` days from `now`.
    pub fn review(&mut self, rating: Rating, now: DateTime<Utc>) {
        let multiplier = match rating {
            Rating::Easy => 2,
            Rating::Hard => 1,
        };
        self.interval_days = self
            .interval_days
            .saturating_mul(multiplier)
            .clamp(1, MAX_INTERVAL_DAYS);
        self.next_review = now
            .checked_add_signed(Duration::days(i64::from(self.interval_days)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

// ============================================================================
// Reflections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub date: NaiveDate,
    /// Opaque client payload.
    pub content: serde_json::Value,
}

// ============================================================================
// Weekly schedule
// ============================================================================

/// A schedule slot: day of week, hour, and optionally the half hour.
///
/// Renders as `Mon-9` or `Mon-9-30` and is stored under that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub day: Weekday,
    pub hour: u8,
    pub half_hour: bool,
}

impl SlotKey {
    pub fn new(day: Weekday, hour: u8) -> Self {
        Self {
            day,
            hour,
            half_hour: false,
        }
    }

    pub fn half(day: Weekday, hour: u8) -> Self {
        Self {
            day,
            hour,
            half_hour: true,
        }
    }

    fn sort_key(&self) -> (u32, u8, bool) {
        (self.day.num_days_from_monday(), self.hour, self.half_hour)
    }
}

impl Ord for SlotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for SlotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for SlotKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.day, self.hour)?;
        if self.half_hour {
            write!(f, "-30")?;
        }
        Ok(())
    }
}

impl FromStr for SlotKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::SlotKey(s.to_string());
        let mut parts = s.split('-');
        let day: Weekday = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let hour: u8 = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        if hour > 23 {
            return Err(invalid());
        }
        let half_hour = match parts.next() {
            None => false,
            Some("30") => true,
            Some(_) => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            day,
            hour,
            half_hour,
        })
    }
}

impl Serialize for SlotKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub category: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

/// Which of the two weekly plans a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Ideal,
    Current,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklySchedule {
    pub ideal: BTreeMap<SlotKey, TimeBlock>,
    pub current: BTreeMap<SlotKey, TimeBlock>,
}

impl WeeklySchedule {
    pub fn slots(&self, kind: ScheduleKind) -> &BTreeMap<SlotKey, TimeBlock> {
        match kind {
            ScheduleKind::Ideal => &self.ideal,
            ScheduleKind::Current => &self.current,
        }
    }

    pub fn slots_mut(&mut self, kind: ScheduleKind) -> &mut BTreeMap<SlotKey, TimeBlock> {
        match kind {
            ScheduleKind::Ideal => &mut self.ideal,
            ScheduleKind::Current => &mut self.current,
        }
    }

    /// Slots in `kind` whose block is linked to `task_id`.
    pub fn slots_for_task(&self, kind: ScheduleKind, task_id: &str) -> Vec<SlotKey> {
        self.slots(kind)
            .iter()
            .filter(|(_, block)| block.task_id.as_deref() == Some(task_id))
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Drop every block in both plans that references `task_id`.
    pub(crate) fn unlink_task(&mut self, task_id: &str) -> usize {
        let before = self.ideal.len() + self.current.len();
        self.ideal
            .retain(|_, block| block.task_id.as_deref() != Some(task_id));
        self.current
            .retain(|_, block| block.task_id.as_deref() != Some(task_id));
        before - (self.ideal.len() + self.current.len())
    }
}

// ============================================================================
// Reward shop
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopItem {
    pub id: String,
    pub title: String,
    pub cost: u32,
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Built-in reward rather than one the user created.
    #[serde(default, rename = "isDefault")]
    pub is_default: bool,
}

/// Rewards every new shop starts with.
pub fn default_shop_items() -> Vec<ShopItem> {
    [
        ("default-coffee", "Fancy coffee", 5, "coffee", "Treat yourself to a good cup"),
        ("default-episode", "Watch an episode", 10, "tv", "One episode, guilt free"),
        ("default-game", "Gaming session", 15, "gamepad", "An hour of play"),
        ("default-dessert", "Favorite dessert", 20, "cake", "Something sweet"),
        ("default-afternoon", "Lazy afternoon", 50, "sofa", "No plans, no guilt"),
    ]
    .into_iter()
    .map(|(id, title, cost, icon, description)| ShopItem {
        id: id.to_string(),
        title: title.to_string(),
        cost,
        icon: icon.to_string(),
        description: Some(description.to_string()),
        is_default: true,
    })
    .collect()
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    System,
}

impl FromStr for Theme {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            _ => Err(ParseError::Theme(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: Theme,
    /// Language code, e.g. `en`.
    pub language: String,
    pub sound_enabled: bool,
    pub notifications_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<NaiveTime>,
    pub tier: Tier,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            language: "en".to_string(),
            sound_enabled: true,
            notifications_enabled: false,
            reminder_time: None,
            tier: Tier::Free,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid slot key: {0} (expected e.g. Mon-9 or Mon-9-30)")]
    SlotKey(String),

    #[error("Unknown quadrant: {0}")]
    Quadrant(String),

    #[error("Unknown quest: {0}")]
    QuestKind(String),

    #[error("Unknown rating: {0}")]
    Rating(String),

    #[error("Unknown theme: {0}")]
    Theme(String),
}
