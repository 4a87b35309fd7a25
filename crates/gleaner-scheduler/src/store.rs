//! Durable schedule store backed by one JSON file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{Schedule, SchedulerError};

/// The process-wide collection of schedules, loaded once at startup and
/// flushed after every mutation.
///
/// Owned by the scheduler loop and passed by handle; there is no ambient
/// global state.
pub struct ScheduleStore {
    path: PathBuf,
    schedules: Vec<Schedule>,
}

impl ScheduleStore {
    /// Load the store from `path`.
    ///
    /// A missing or corrupt file recovers to an empty store with a warning;
    /// loading never fails. Records left with `currently_running = true` are
    /// stale (no execution survives a restart) and are reset.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut schedules = read_schedules(&path);

        let stale = schedules
            .iter_mut()
            .filter(|s| s.currently_running)
            .map(|s| s.currently_running = false)
            .count();
        if stale > 0 {
            info!(count = stale, "reset stale running flags from a previous session");
        }

        info!(count = schedules.len(), path = %path.display(), "loaded schedule store");
        Self { path, schedules }
    }

    /// Re-read the store from disk, discarding in-memory state.
    pub fn reload(&mut self) {
        self.schedules = read_schedules(&self.path);
        for s in &mut self.schedules {
            s.currently_running = false;
        }
    }

    /// Flush all schedules to disk.
    ///
    /// Writes to a temp file beside the target and renames it into place, so
    /// a failed write leaves the previous file intact and a concurrent
    /// loader never sees a partial file.
    pub fn save(&self) -> Result<(), SchedulerError> {
        let json = serde_json::to_vec_pretty(&self.schedules)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Schedule> {
        self.schedules.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Schedule> {
        self.schedules.iter_mut().find(|s| s.id == id)
    }

    /// Add a schedule after validating it.
    pub fn insert(&mut self, schedule: Schedule) -> Result<(), SchedulerError> {
        if schedule.search_terms.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "schedule must have at least one search term".into(),
            ));
        }
        if schedule.limit_per_run == 0 {
            return Err(SchedulerError::InvalidConfig(
                "limit_per_run must be greater than zero".into(),
            ));
        }
        if schedule.estimated_duration_minutes == 0 {
            return Err(SchedulerError::InvalidConfig(
                "estimated duration must be at least one minute".into(),
            ));
        }
        if self.get(&schedule.id).is_some() {
            return Err(SchedulerError::ScheduleExists(schedule.id));
        }
        self.schedules.push(schedule);
        Ok(())
    }

    /// Remove a schedule by id.
    pub fn remove(&mut self, id: &str) -> Result<Schedule, SchedulerError> {
        let index = self
            .schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;
        Ok(self.schedules.remove(index))
    }

    /// Activate or deactivate a schedule.
    pub fn set_active(&mut self, id: &str, active: bool) -> Result<(), SchedulerError> {
        let schedule = self
            .get_mut(id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;
        schedule.is_active = active;
        Ok(())
    }

    /// Write the current schedules to a separate file.
    pub fn export(&self, path: &Path) -> Result<usize, SchedulerError> {
        let json = serde_json::to_vec_pretty(&self.schedules)?;
        fs::write(path, &json)?;
        Ok(self.schedules.len())
    }

    /// Import schedules from a file, assigning each a fresh id so imported
    /// records never collide with existing ones. Transient flags are
    /// cleared. Returns the number imported.
    pub fn import(&mut self, path: &Path) -> Result<usize, SchedulerError> {
        let bytes = fs::read(path)?;
        let incoming: Vec<Schedule> = serde_json::from_slice(&bytes)?;

        let mut imported = 0;
        for mut schedule in incoming {
            schedule.id = Uuid::new_v4().to_string();
            schedule.currently_running = false;
            schedule.auto_sequence = false;
            self.insert(schedule)?;
            imported += 1;
        }
        Ok(imported)
    }
}

fn read_schedules(path: &Path) -> Vec<Schedule> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read schedule store, starting empty");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(schedules) => schedules,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "schedule store corrupt, starting empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule(name: &str) -> Schedule {
        Schedule::one_time(name, vec!["cafes pune".into()], t(9, 0), 50, true)
    }

    fn store_in(dir: &TempDir) -> ScheduleStore {
        ScheduleStore::load(dir.path().join("schedules.json"))
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules.json");
        fs::write(&path, b"{not json").unwrap();
        let store = ScheduleStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let s = schedule("morning");
        let id = s.id.clone();
        store.insert(s).unwrap();
        store.save().unwrap();

        let reloaded = ScheduleStore::load(store.path());
        assert_eq!(reloaded.len(), 1);
        let got = reloaded.get(&id).unwrap();
        assert_eq!(got.name, "morning");
        assert_eq!(got.start_time, t(9, 0));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.insert(schedule("a")).unwrap();
        store.save().unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["schedules.json".to_string()]);
    }

    #[test]
    fn test_stale_running_flag_reset_on_load() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let mut s = schedule("interrupted");
        s.currently_running = true;
        let id = s.id.clone();
        store.insert(s).unwrap();
        store.save().unwrap();

        let reloaded = ScheduleStore::load(store.path());
        assert!(!reloaded.get(&id).unwrap().currently_running);
    }

    #[test]
    fn test_insert_rejects_empty_terms() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let mut s = schedule("bad");
        s.search_terms.clear();
        assert!(matches!(
            store.insert(s),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let s = schedule("first");
        let dup = s.clone();
        store.insert(s).unwrap();
        assert!(matches!(
            store.insert(dup),
            Err(SchedulerError::ScheduleExists(_))
        ));
    }

    #[test]
    fn test_remove_and_set_active() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let s = schedule("toggle");
        let id = s.id.clone();
        store.insert(s).unwrap();

        store.set_active(&id, false).unwrap();
        assert!(!store.get(&id).unwrap().is_active);

        store.remove(&id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.remove(&id),
            Err(SchedulerError::ScheduleNotFound(_))
        ));
    }

    #[test]
    fn test_import_assigns_fresh_ids_and_clears_flags() {
        let dir = TempDir::new().unwrap();
        let mut source = ScheduleStore::load(dir.path().join("source.json"));
        let mut s = schedule("exported");
        s.auto_sequence = true;
        s.currently_running = true;
        let original_id = s.id.clone();
        source.insert(s).unwrap();

        let export_path = dir.path().join("export.json");
        assert_eq!(source.export(&export_path).unwrap(), 1);

        let mut target = ScheduleStore::load(dir.path().join("target.json"));
        assert_eq!(target.import(&export_path).unwrap(), 1);

        let imported = &target.schedules()[0];
        assert_ne!(imported.id, original_id);
        assert_eq!(imported.name, "exported");
        assert!(!imported.auto_sequence);
        assert!(!imported.currently_running);
    }

    #[test]
    fn test_import_into_same_store_never_collides() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.insert(schedule("original")).unwrap();

        let export_path = dir.path().join("export.json");
        store.export(&export_path).unwrap();
        store.import(&export_path).unwrap();

        assert_eq!(store.len(), 2);
        assert_ne!(store.schedules()[0].id, store.schedules()[1].id);
    }

    #[test]
    fn test_reload_after_file_deleted_is_empty() {
        // Simulated corruption between ticks: the file vanishes, the next
        // load recovers to empty without failing.
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.insert(schedule("doomed")).unwrap();
        store.save().unwrap();

        fs::remove_file(store.path()).unwrap();
        store.reload();
        assert!(store.is_empty());
    }
}
