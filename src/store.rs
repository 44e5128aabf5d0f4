//! Alarm and settings persistence.
//!
//! The core only talks to [`AlarmStore`] and [`SettingsStore`]. [`FileStore`]
//! keeps everything in one toml file that is rewritten after every change,
//! [`MemoryStore`] is the same thing without the file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{NaiveDate, NaiveTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{Alarm, AlarmUpdate, Days, NewAlarm},
    config::{Settings, SettingsChange, SettingsUpdate},
    error::StoreError,
};

pub trait AlarmStore: Send + Sync {
    /// every alarm, ordered by time of day
    fn list(&self) -> Result<Vec<Alarm>, StoreError>;
    fn get(&self, id: u64) -> Result<Alarm, StoreError>;
    fn create(&self, alarm: NewAlarm) -> Result<Alarm, StoreError>;
    /// Clears the fired date when the edit changes the schedule or re-enables the alarm.
    fn update(&self, id: u64, update: AlarmUpdate) -> Result<Alarm, StoreError>;
    fn delete(&self, id: u64) -> Result<(), StoreError>;
    fn mark_fired(&self, id: u64, date: NaiveDate) -> Result<(), StoreError>;
}

pub trait SettingsStore: Send + Sync {
    fn settings(&self) -> Result<Settings, StoreError>;
    fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsChange, StoreError>;
}

pub trait GetId<T> {
    fn get_id(&self) -> &T;
}

/// Map that is serialized as a list of its values, in key order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "Vec<V>", into = "Vec<V>")]
pub struct Collection<K, V>
where
    K: Ord + Clone,
    V: GetId<K> + Clone,
{
    pub data: BTreeMap<K, V>,
}

impl<K, V> Default for Collection<K, V>
where
    K: Ord + Clone,
    V: GetId<K> + Clone,
{
    fn default() -> Self {
        Self {
            data: BTreeMap::new(),
        }
    }
}

impl<K, V> Collection<K, V>
where
    K: Ord + Clone,
    V: GetId<K> + Clone,
{
    pub fn insert(&mut self, item: V) -> Option<V> {
        let id = item.get_id().to_owned();
        self.data.insert(id, item)
    }
}

impl<K, V> From<Vec<V>> for Collection<K, V>
where
    K: Ord + Clone,
    V: GetId<K> + Clone,
{
    fn from(value: Vec<V>) -> Self {
        let mut obj = Self::default();
        value.into_iter().for_each(|v| {
            obj.insert(v);
        });
        obj
    }
}

impl<K, V> From<Collection<K, V>> for Vec<V>
where
    K: Ord + Clone,
    V: GetId<K> + Clone,
{
    fn from(val: Collection<K, V>) -> Self {
        Self::from_iter(val.data.into_values())
    }
}

/// on-disk shape of an alarm, the time is written as a native toml time
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
struct StoredAlarm {
    id: u64,
    #[serde(with = "toml_datetime_compat")]
    time: NaiveTime,
    days: Days,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_fired: Option<NaiveDate>,
}

impl GetId<u64> for StoredAlarm {
    fn get_id(&self) -> &u64 {
        &self.id
    }
}

impl From<StoredAlarm> for Alarm {
    fn from(alarm: StoredAlarm) -> Self {
        Self {
            id: alarm.id,
            time: alarm.time,
            days: alarm.days,
            enabled: alarm.enabled,
            last_fired: alarm.last_fired,
        }
    }
}

impl From<Alarm> for StoredAlarm {
    fn from(alarm: Alarm) -> Self {
        Self {
            id: alarm.id,
            time: alarm.time,
            days: alarm.days,
            enabled: alarm.enabled,
            last_fired: alarm.last_fired,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
struct State {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    alarms: Collection<u64, StoredAlarm>,
}

impl State {
    fn list(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self.alarms.data.values().cloned().map(Alarm::from).collect();
        alarms.sort_by_key(|alarm| (alarm.time, alarm.id));
        alarms
    }

    fn get(&self, id: u64) -> Result<Alarm, StoreError> {
        self.alarms
            .data
            .get(&id)
            .cloned()
            .map(Alarm::from)
            .ok_or(StoreError::NotFound(id))
    }

    fn create(&mut self, alarm: NewAlarm) -> Alarm {
        // ids start at 1 and are never reused, even after a delete
        self.next_id = self.next_id.max(self.alarms.data.keys().copied().max().unwrap_or(0)) + 1;
        let alarm = alarm.into_alarm(self.next_id);
        self.alarms.insert(alarm.clone().into());
        alarm
    }

    fn update(&mut self, id: u64, update: AlarmUpdate) -> Result<Alarm, StoreError> {
        let mut alarm = self.get(id)?;
        alarm += update;
        self.alarms.insert(alarm.clone().into());
        Ok(alarm)
    }

    fn delete(&mut self, id: u64) -> Result<(), StoreError> {
        self.alarms
            .data
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn mark_fired(&mut self, id: u64, date: NaiveDate) -> Result<(), StoreError> {
        let alarm = self
            .alarms
            .data
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        alarm.last_fired = Some(date);
        Ok(())
    }

    fn update_settings(&mut self, update: SettingsUpdate) -> Result<SettingsChange, StoreError> {
        Ok(self.settings.apply(update)?)
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            state: Mutex::new(State {
                settings,
                ..State::default()
            }),
        }
    }
}

impl AlarmStore for MemoryStore {
    fn list(&self) -> Result<Vec<Alarm>, StoreError> {
        Ok(self.state.lock().list())
    }

    fn get(&self, id: u64) -> Result<Alarm, StoreError> {
        self.state.lock().get(id)
    }

    fn create(&self, alarm: NewAlarm) -> Result<Alarm, StoreError> {
        Ok(self.state.lock().create(alarm))
    }

    fn update(&self, id: u64, update: AlarmUpdate) -> Result<Alarm, StoreError> {
        self.state.lock().update(id, update)
    }

    fn delete(&self, id: u64) -> Result<(), StoreError> {
        self.state.lock().delete(id)
    }

    fn mark_fired(&self, id: u64, date: NaiveDate) -> Result<(), StoreError> {
        self.state.lock().mark_fired(id, date)
    }
}

impl SettingsStore for MemoryStore {
    fn settings(&self) -> Result<Settings, StoreError> {
        Ok(self.state.lock().settings.clone())
    }

    fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsChange, StoreError> {
        self.state.lock().update_settings(update)
    }
}

/// Store backed by a single toml file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileStore {
    /// Opens the store at `path`, creating it with default settings if it doesn't exist.
    ///
    /// # Errors
    /// if the file exists but can't be read or parsed, or can't be created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            log::info!("creating new store at {}", path.display());
            let state = State::default();
            save(&path, &state)?;
            state
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// runs `change` on a copy of the state and only keeps it once it is on disk
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut State) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = change(&mut next)?;
        save(&self.path, &next)?;
        *state = next;
        Ok(out)
    }
}

fn save(path: &Path, state: &State) -> Result<(), StoreError> {
    let text = toml::to_string(state)?;
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, text).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)
}

impl AlarmStore for FileStore {
    fn list(&self) -> Result<Vec<Alarm>, StoreError> {
        Ok(self.state.lock().list())
    }

    fn get(&self, id: u64) -> Result<Alarm, StoreError> {
        self.state.lock().get(id)
    }

    fn create(&self, alarm: NewAlarm) -> Result<Alarm, StoreError> {
        self.mutate(|state| Ok(state.create(alarm)))
    }

    fn update(&self, id: u64, update: AlarmUpdate) -> Result<Alarm, StoreError> {
        self.mutate(|state| state.update(id, update))
    }

    fn delete(&self, id: u64) -> Result<(), StoreError> {
        self.mutate(|state| state.delete(id))
    }

    fn mark_fired(&self, id: u64, date: NaiveDate) -> Result<(), StoreError> {
        self.mutate(|state| state.mark_fired(id, date))
    }
}

impl SettingsStore for FileStore {
    fn settings(&self) -> Result<Settings, StoreError> {
        Ok(self.state.lock().settings.clone())
    }

    fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsChange, StoreError> {
        self.mutate(|state| state.update_settings(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Content;

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn new_alarm(hour: u32, minute: u32) -> NewAlarm {
        NewAlarm {
            time: at(hour, minute),
            days: Days::EVERY_DAY,
            enabled: true,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn list_is_ordered_by_time() {
        let store = MemoryStore::new();
        store.create(new_alarm(9, 0)).unwrap();
        store.create(new_alarm(6, 45)).unwrap();
        store.create(new_alarm(7, 30)).unwrap();
        let times: Vec<_> = store.list().unwrap().iter().map(|alarm| alarm.time).collect();
        assert_eq!(times, vec![at(6, 45), at(7, 30), at(9, 0)]);
    }

    #[test]
    fn ids_are_not_reused() {
        let store = MemoryStore::new();
        let first = store.create(new_alarm(7, 0)).unwrap();
        store.delete(first.id).unwrap();
        let second = store.create(new_alarm(7, 0)).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn missing_alarm_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.delete(42), Err(StoreError::NotFound(42))));
        assert!(matches!(
            store.mark_fired(42, today()),
            Err(StoreError::NotFound(42))
        ));
    }

    #[test]
    fn mark_fired_is_visible_to_next_list() {
        let store = MemoryStore::new();
        let alarm = store.create(new_alarm(7, 30)).unwrap();
        store.mark_fired(alarm.id, today()).unwrap();
        assert_eq!(store.list().unwrap()[0].last_fired, Some(today()));
    }

    #[test]
    fn reenabling_through_store_clears_fired_date() {
        let store = MemoryStore::new();
        let alarm = store.create(new_alarm(7, 30)).unwrap();
        store.mark_fired(alarm.id, today()).unwrap();

        let disabled = store
            .update(alarm.id, AlarmUpdate { enabled: Some(false), ..AlarmUpdate::default() })
            .unwrap();
        assert_eq!(disabled.last_fired, Some(today()));

        let enabled = store
            .update(alarm.id, AlarmUpdate { enabled: Some(true), ..AlarmUpdate::default() })
            .unwrap();
        assert_eq!(enabled.last_fired, None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        let id = {
            let store = FileStore::open(&path).unwrap();
            let alarm = store.create(new_alarm(7, 30)).unwrap();
            store.mark_fired(alarm.id, today()).unwrap();
            store
                .update_settings(SettingsUpdate {
                    volume_percent: Some(40),
                    content: Some(Content::File(PathBuf::from("/music/rain.mp3"))),
                    ..SettingsUpdate::default()
                })
                .unwrap();
            alarm.id
        };

        let store = FileStore::open(&path).unwrap();
        let alarm = store.get(id).unwrap();
        assert_eq!(alarm.time, at(7, 30));
        assert_eq!(alarm.days, Days::EVERY_DAY);
        assert_eq!(alarm.last_fired, Some(today()));
        let settings = store.settings().unwrap();
        assert_eq!(settings.volume(), 40);
        assert_eq!(settings.content, Content::File(PathBuf::from("/music/rain.mp3")));
        assert!(store.create(new_alarm(8, 0)).unwrap().id > id);
    }

    #[test]
    fn partial_settings_table_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "next_id = 0\n[settings]\nvolume_percent = 50\n").unwrap();
        let store = FileStore::open(&path).unwrap();
        let settings = store.settings().unwrap();
        assert_eq!(settings.volume(), 50);
        assert_eq!(settings.content, Settings::default().content);
        assert!(settings.locked.is_empty());
    }

    #[test]
    fn alarms_are_written_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        let store = FileStore::open(&path).unwrap();
        for hour in [9, 5, 7, 6, 8] {
            store.create(new_alarm(hour, 0)).unwrap();
        }
        let written = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = written
            .lines()
            .filter_map(|line| line.strip_prefix("id = "))
            .map(|id| id.parse().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        // rewriting unchanged state gives the same file
        store.mark_fired(3, today()).unwrap();
        let once = std::fs::read_to_string(&path).unwrap();
        store.mark_fired(3, today()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), once);
    }

    #[test]
    fn failed_update_leaves_file_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state.toml")).unwrap();
        let before = store.settings().unwrap();
        assert!(store
            .update_settings(SettingsUpdate {
                volume_percent: Some(200),
                ..SettingsUpdate::default()
            })
            .is_err());
        assert_eq!(store.settings().unwrap(), before);
    }
}
