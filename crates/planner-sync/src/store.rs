//! Local state store: the single live [`Snapshot`] for a session.
//!
//! All edits go through the methods here. Each effective edit publishes the
//! new snapshot on a `tokio::sync::watch` channel so the push scheduler can
//! observe it; edits that change nothing (unknown ids and the like) publish
//! nothing.

use crate::model::{
    Flashcard, NewTask, QuestKind, Rating, Reflection, ScheduleKind, Settings, ShopItem, SlotKey,
    Snapshot, Task, TimeBlock,
};

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown reward: {0}")]
    UnknownReward(String),

    #[error("Not enough points: reward costs {cost}, balance is {balance}")]
    InsufficientPoints { cost: u32, balance: u32 },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shallow patch over a [`Snapshot`]: every `Some` field replaces the current one.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPatch {
    pub name: Option<String>,
    pub reflection_went_well: Option<String>,
    pub reflection_improve: Option<String>,
    pub intention: Option<String>,
    pub points: Option<u32>,
    pub tasks: Option<Vec<Task>>,
    pub daily_quests: Option<crate::model::DailyQuests>,
    pub flashcards: Option<Vec<Flashcard>>,
    pub reflections: Option<Vec<Reflection>>,
    pub schedule: Option<crate::model::WeeklySchedule>,
    pub shop_items: Option<Vec<ShopItem>>,
    pub settings: Option<Settings>,
}

impl SnapshotPatch {
    /// Merge into `snapshot`. Returns whether any field was supplied.
    fn apply(self, snapshot: &mut Snapshot) -> bool {
        fn set<T>(slot: &mut T, value: Option<T>) -> bool {
            match value {
                Some(value) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }

        let touched = [
            set(&mut snapshot.name, self.name),
            set(&mut snapshot.reflection_went_well, self.reflection_went_well),
            set(&mut snapshot.reflection_improve, self.reflection_improve),
            set(&mut snapshot.intention, self.intention),
            set(&mut snapshot.points, self.points),
            set(&mut snapshot.tasks, self.tasks),
            set(&mut snapshot.daily_quests, self.daily_quests),
            set(&mut snapshot.flashcards, self.flashcards),
            set(&mut snapshot.reflections, self.reflections),
            set(&mut snapshot.schedule, self.schedule),
            set(&mut snapshot.shop_items, self.shop_items),
            set(&mut snapshot.settings, self.settings),
        ];
        touched.contains(&true)
    }
}

/// Replacement for the task collection: either a literal list or a function
/// of the current list, so callers never compute from a stale copy.
pub enum TasksUpdate {
    Replace(Vec<Task>),
    Apply(Box<dyn FnOnce(&[Task]) -> Vec<Task> + Send>),
}

impl TasksUpdate {
    pub fn with(f: impl FnOnce(&[Task]) -> Vec<Task> + Send + 'static) -> Self {
        Self::Apply(Box::new(f))
    }
}

impl From<Vec<Task>> for TasksUpdate {
    fn from(tasks: Vec<Task>) -> Self {
        Self::Replace(tasks)
    }
}

/// Owner of the live snapshot.
pub struct Store {
    tx: watch::Sender<Snapshot>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Snapshot::default())
    }
}

impl Store {
    pub fn new(snapshot: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(snapshot);
        Self { tx }
    }

    /// Clone of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Borrow the current snapshot without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Receiver that sees every later edit. The current value counts as seen.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Swap in a whole new snapshot (after a load, or on logout).
    pub fn replace(&self, snapshot: Snapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Back to the empty default snapshot.
    pub fn reset(&self) {
        self.replace(Snapshot::default());
    }

    fn modify(&self, f: impl FnOnce(&mut Snapshot) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn update_state(&self, patch: SnapshotPatch) {
        self.modify(|s| patch.apply(s));
    }

    pub fn update_tasks(&self, update: impl Into<TasksUpdate>) {
        self.modify(|s| {
            s.tasks = match update.into() {
                TasksUpdate::Replace(tasks) => tasks,
                TasksUpdate::Apply(f) => f(&s.tasks),
            };
            true
        });
    }

    // ==================== Tasks ====================

    /// Create a task and return its id.
    pub fn add_task(&self, new_task: NewTask, now: DateTime<Utc>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let task = new_task.into_task(id.clone(), now);
        self.modify(|s| {
            s.tasks.push(task);
            true
        });
        id
    }

    /// Flip completion and move the point balance by the task's effort.
    ///
    /// Returns the new balance, or `None` for an unknown id.
    pub fn toggle_task(&self, id: &str) -> Option<u32> {
        let mut balance = None;
        self.modify(|s| {
            let Some(task) = s.tasks.iter_mut().find(|t| t.id == id) else {
                return false;
            };
            task.completed = !task.completed;
            let weight = task.weight();
            s.points = if task.completed {
                s.points.saturating_add(weight)
            } else {
                s.points.saturating_sub(weight)
            };
            balance = Some(s.points);
            true
        });
        balance
    }

    /// Remove a task along with every schedule block that points at it.
    pub fn delete_task(&self, id: &str) -> bool {
        self.modify(|s| {
            let before = s.tasks.len();
            s.tasks.retain(|t| t.id != id);
            if s.tasks.len() == before {
                return false;
            }
            let unlinked = s.schedule.unlink_task(id);
            if unlinked > 0 {
                debug!("Cleared {} schedule block(s) for deleted task {}", unlinked, id);
            }
            true
        })
    }

    pub fn toggle_subtask(&self, task_id: &str, index: usize) -> bool {
        self.modify(|s| {
            match s
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .and_then(|t| t.subtasks.get_mut(index))
            {
                Some(subtask) => {
                    subtask.completed = !subtask.completed;
                    true
                }
                None => false,
            }
        })
    }

    // ==================== Schedule ====================

    /// Put `block` into `slot`. A block linked to a task first clears any
    /// other slot in the same plan that links that task.
    pub fn assign_slot(&self, kind: ScheduleKind, slot: SlotKey, block: TimeBlock) {
        self.modify(|s| {
            let slots = s.schedule.slots_mut(kind);
            if let Some(task_id) = block.task_id.as_deref() {
                slots.retain(|key, existing| {
                    *key == slot || existing.task_id.as_deref() != Some(task_id)
                });
            }
            slots.insert(slot, block);
            true
        });
    }

    pub fn clear_slot(&self, kind: ScheduleKind, slot: SlotKey) -> bool {
        self.modify(|s| s.schedule.slots_mut(kind).remove(&slot).is_some())
    }

    // ==================== Daily quests ====================

    pub fn set_quest(&self, kind: QuestKind, title: impl Into<String>) {
        let title = title.into();
        self.modify(|s| {
            s.daily_quests.get_mut(kind).title = title;
            true
        });
    }

    pub fn toggle_quest(&self, kind: QuestKind) -> bool {
        let mut completed = false;
        self.modify(|s| {
            let quest = s.daily_quests.get_mut(kind);
            quest.completed = !quest.completed;
            completed = quest.completed;
            true
        });
        completed
    }

    // ==================== Flashcards ====================

    pub fn add_flashcard(
        &self,
        question: impl Into<String>,
        answer: impl Into<String>,
        now: DateTime<Utc>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let card = Flashcard::new(id.clone(), question.into(), answer.into(), now);
        self.modify(|s| {
            s.flashcards.push(card);
            true
        });
        id
    }

    /// Review a card. Returns the updated card, or `None` for an unknown id.
    pub fn review_flashcard(&self, id: &str, rating: Rating, now: DateTime<Utc>) -> Option<Flashcard> {
        let mut reviewed = None;
        self.modify(|s| {
            let Some(card) = s.flashcards.iter_mut().find(|c| c.id == id) else {
                return false;
            };
            card.review(rating, now);
            reviewed = Some(card.clone());
            true
        });
        reviewed
    }

    pub fn delete_flashcard(&self, id: &str) -> bool {
        self.modify(|s| {
            let before = s.flashcards.len();
            s.flashcards.retain(|c| c.id != id);
            s.flashcards.len() != before
        })
    }

    // ==================== Reflections ====================

    /// Write the reflection for `date`, replacing one already stored for it.
    pub fn save_reflection(&self, date: NaiveDate, content: serde_json::Value) {
        self.modify(|s| {
            match s.reflections.binary_search_by_key(&date, |r| r.date) {
                Ok(index) => s.reflections[index].content = content,
                Err(index) => s.reflections.insert(index, Reflection { date, content }),
            }
            true
        });
    }

    // ==================== Reward shop ====================

    pub fn add_shop_item(&self, item: ShopItem) {
        self.modify(|s| {
            s.shop_items.retain(|existing| existing.id != item.id);
            s.shop_items.push(item);
            true
        });
    }

    pub fn delete_shop_item(&self, id: &str) -> bool {
        self.modify(|s| {
            let before = s.shop_items.len();
            s.shop_items.retain(|i| i.id != id);
            s.shop_items.len() != before
        })
    }

    /// Spend points on a reward. Returns the remaining balance.
    pub fn redeem_reward(&self, id: &str) -> Result<u32> {
        let mut outcome = Err(StoreError::UnknownReward(id.to_string()));
        self.modify(|s| {
            let Some(item) = s.shop_items.iter().find(|i| i.id == id) else {
                return false;
            };
            if item.cost > s.points {
                outcome = Err(StoreError::InsufficientPoints {
                    cost: item.cost,
                    balance: s.points,
                });
                return false;
            }
            s.points -= item.cost;
            outcome = Ok(s.points);
            true
        });
        outcome
    }

    // ==================== Settings ====================

    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) -> Settings {
        let mut updated = Settings::default();
        self.modify(|s| {
            f(&mut s.settings);
            updated = s.settings.clone();
            true
        });
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Quadrant;
    use chrono::{Duration, TimeZone, Weekday};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
    }

    fn store_with_task(effort: u32) -> (Store, String) {
        let store = Store::default();
        let mut new_task = NewTask::new("Write report", Quadrant::DoFirst);
        new_task.effort = Some(effort);
        let id = store.add_task(new_task, now());
        (store, id)
    }

    fn block_for(task_id: &str) -> TimeBlock {
        TimeBlock {
            category: "work".into(),
            label: "Report".into(),
            task_id: Some(task_id.to_string()),
            duration_minutes: None,
        }
    }

    #[test]
    fn test_toggle_task_adds_and_removes_effort() {
        let (store, id) = store_with_task(3);
        store.update_state(SnapshotPatch {
            points: Some(10),
            ..Default::default()
        });

        assert_eq!(store.toggle_task(&id), Some(13));
        assert!(store.read(|s| s.task(&id).unwrap().completed));

        assert_eq!(store.toggle_task(&id), Some(10));
        assert!(!store.read(|s| s.task(&id).unwrap().completed));
    }

    #[test]
    fn test_balance_never_goes_negative() {
        let (store, id) = store_with_task(5);
        // Completed task with an empty balance: un-completing floors at zero.
        store.update_tasks(TasksUpdate::with(|tasks| {
            tasks
                .iter()
                .cloned()
                .map(|mut t| {
                    t.completed = true;
                    t
                })
                .collect()
        }));

        for _ in 0..7 {
            store.toggle_task(&id);
            assert!(store.read(|s| s.points) <= 5);
        }
        // Started completed with 0 points; after an odd number of toggles it is
        // incomplete again and the balance is back to the floor.
        assert_eq!(store.read(|s| s.points), 0);
    }

    #[test]
    fn test_toggle_unknown_task_is_silent_noop() {
        let store = Store::default();
        let mut rx = store.subscribe();

        assert_eq!(store.toggle_task("missing"), None);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().points, 0);
    }

    #[test]
    fn test_update_tasks_replace_and_apply() {
        let (store, id) = store_with_task(1);

        store.update_tasks(TasksUpdate::with(|tasks| {
            tasks.iter().filter(|t| t.title != "Write report").cloned().collect()
        }));
        assert!(store.read(|s| s.task(&id).is_none()));

        store.update_tasks(Vec::new());
        assert!(store.read(|s| s.tasks.is_empty()));
    }

    #[test]
    fn test_update_state_merges_shallowly() {
        let store = Store::default();
        store.update_state(SnapshotPatch {
            intention: Some("Ship it".into()),
            ..Default::default()
        });
        store.update_state(SnapshotPatch {
            name: Some("Ada".into()),
            ..Default::default()
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.intention, "Ship it");
        assert_eq!(snapshot.name, "Ada");
    }

    #[test]
    fn test_reassigning_task_clears_previous_ideal_slot() {
        let (store, id) = store_with_task(1);
        let x = SlotKey::new(Weekday::Mon, 9);
        let y = SlotKey::half(Weekday::Wed, 14);

        store.assign_slot(ScheduleKind::Ideal, x, block_for(&id));
        store.assign_slot(ScheduleKind::Ideal, y, block_for(&id));

        let snapshot = store.snapshot();
        assert!(!snapshot.schedule.ideal.contains_key(&x));
        assert_eq!(
            snapshot.schedule.slots_for_task(ScheduleKind::Ideal, &id),
            vec![y]
        );
    }

    #[test]
    fn test_delete_task_voids_schedule_slots() {
        let (store, id) = store_with_task(1);
        let slot = SlotKey::new(Weekday::Tue, 10);
        store.assign_slot(ScheduleKind::Ideal, slot, block_for(&id));
        store.assign_slot(ScheduleKind::Current, slot, block_for(&id));

        assert!(store.delete_task(&id));

        let snapshot = store.snapshot();
        assert!(snapshot.tasks.is_empty());
        assert!(snapshot.schedule.ideal.is_empty());
        assert!(snapshot.schedule.current.is_empty());
        assert!(!store.delete_task(&id));
    }

    #[test]
    fn test_redeem_reward_scenario() {
        let store = Store::default();
        store.add_shop_item(ShopItem {
            id: "r1".into(),
            title: "Coffee".into(),
            cost: 3,
            icon: "coffee".into(),
            description: None,
            is_default: false,
        });
        store.update_state(SnapshotPatch {
            points: Some(5),
            ..Default::default()
        });

        assert_eq!(store.redeem_reward("r1"), Ok(2));
        assert_eq!(
            store.redeem_reward("r1"),
            Err(StoreError::InsufficientPoints { cost: 3, balance: 2 })
        );
        assert_eq!(store.read(|s| s.points), 2);
        assert_eq!(
            store.redeem_reward("nope"),
            Err(StoreError::UnknownReward("nope".into()))
        );
    }

    #[test]
    fn test_review_flashcard_scenario() {
        let store = Store::default();
        let id = store.add_flashcard("Capital of France?", "Paris", now());
        store.update_state(SnapshotPatch {
            flashcards: Some(
                store
                    .snapshot()
                    .flashcards
                    .into_iter()
                    .map(|mut c| {
                        c.interval_days = 2;
                        c
                    })
                    .collect(),
            ),
            ..Default::default()
        });

        let card = store.review_flashcard(&id, Rating::Easy, now()).unwrap();
        assert_eq!(card.interval_days, 4);
        assert_eq!(card.next_review, now() + Duration::days(4));

        let card = store.review_flashcard(&id, Rating::Hard, now()).unwrap();
        assert!(card.interval_days >= 1);
        assert_eq!(
            card.next_review,
            now() + Duration::days(i64::from(card.interval_days))
        );

        assert!(store.review_flashcard("missing", Rating::Easy, now()).is_none());
    }

    #[test]
    fn test_save_reflection_keeps_one_per_day_in_order() {
        let store = Store::default();
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        store.save_reflection(d2, serde_json::json!({"mood": "ok"}));
        store.save_reflection(d1, serde_json::json!({"mood": "great"}));
        store.save_reflection(d2, serde_json::json!({"mood": "better"}));

        let reflections = store.read(|s| s.reflections.clone());
        assert_eq!(reflections.len(), 2);
        assert_eq!(reflections[0].date, d1);
        assert_eq!(reflections[1].content["mood"], "better");
    }

    #[test]
    fn test_edits_notify_subscribers() {
        let store = Store::default();
        let mut rx = store.subscribe();

        store.set_quest(QuestKind::Health, "Walk 30 minutes");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().daily_quests.health.title, "Walk 30 minutes");

        store.toggle_quest(QuestKind::Health);
        assert!(rx.has_changed().unwrap());
    }
}
