use crate::{
    filter::FilterState,
    game::GameId,
    modlist::parse_mod_list,
    report::{AnalysisResult, Severity},
    storage::StorageHandle,
};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};

pub const SESSION_KEY: &str = "loadcheck:session";
pub const RECENT_SEARCH_LIMIT: usize = 10;
const SESSION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedListMeta {
    pub name: String,
    #[serde(default)]
    pub game: GameId,
    #[serde(default)]
    pub mod_count: usize,
    #[serde(default)]
    pub saved_at: i64,
}

/// The working state of one session. The parsed mod list is always derived from the text.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub selected_game: GameId,
    pub game_version: String,
    pub masterlist_branch: String,
    mod_list_text: String,
    mod_list_parsed: Vec<String>,
    pub last_analysis: Option<AnalysisResult>,
    pub saved_lists: Vec<SavedListMeta>,
    pub filter_state: FilterState,
    pub recent_searches: Vec<String>,
    pub last_analysis_time: i64,
    pub last_save_time: i64,
}

impl SessionContext {
    pub fn new(game: GameId, masterlist_branch: &str) -> Self {
        Self {
            selected_game: game,
            game_version: String::new(),
            masterlist_branch: masterlist_branch.to_string(),
            mod_list_text: String::new(),
            mod_list_parsed: Vec::new(),
            last_analysis: None,
            saved_lists: Vec::new(),
            filter_state: FilterState::default(),
            recent_searches: Vec::new(),
            last_analysis_time: 0,
            last_save_time: 0,
        }
    }

    pub fn mod_list_text(&self) -> &str {
        &self.mod_list_text
    }

    pub fn mod_list_parsed(&self) -> &[String] {
        &self.mod_list_parsed
    }

    fn set_mod_list_text(&mut self, text: String) {
        self.mod_list_parsed = parse_mod_list(&text);
        self.mod_list_text = text;
    }

    fn persisted(&self) -> PersistedContext {
        PersistedContext {
            version: SESSION_SCHEMA_VERSION,
            selected_game: Some(self.selected_game),
            game_version: Some(self.game_version.clone()),
            masterlist_branch: Some(self.masterlist_branch.clone()),
            mod_list_text: Some(self.mod_list_text.clone()),
            last_analysis: self.last_analysis.clone(),
            last_analysis_time: Some(self.last_analysis_time),
            saved_lists: Some(self.saved_lists.clone()),
            last_save_time: Some(self.last_save_time),
            filter_state: Some(self.filter_state),
            recent_searches: Some(self.recent_searches.clone()),
        }
    }
}

/// The allow-listed, serializable subset of [`SessionContext`]. Anything not named here
/// never reaches the shared store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedContext {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    selected_game: Option<GameId>,
    #[serde(default)]
    game_version: Option<String>,
    #[serde(default)]
    masterlist_branch: Option<String>,
    #[serde(default)]
    mod_list_text: Option<String>,
    #[serde(default)]
    last_analysis: Option<AnalysisResult>,
    #[serde(default)]
    last_analysis_time: Option<i64>,
    #[serde(default)]
    saved_lists: Option<Vec<SavedListMeta>>,
    #[serde(default)]
    last_save_time: Option<i64>,
    #[serde(default)]
    filter_state: Option<FilterState>,
    #[serde(default)]
    recent_searches: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeScope {
    pub analysis: bool,
    pub saved_lists: bool,
    pub working_set: bool,
    pub searches: bool,
    pub filters: bool,
}

impl ChangeScope {
    pub fn any(&self) -> bool {
        self.analysis || self.saved_lists || self.working_set || self.searches || self.filters
    }

    fn merge(&mut self, other: ChangeScope) {
        self.analysis |= other.analysis;
        self.saved_lists |= other.saved_lists;
        self.working_set |= other.working_set;
        self.searches |= other.searches;
        self.filters |= other.filters;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    Changed {
        origin: ChangeOrigin,
        scope: ChangeScope,
    },
    PersistFailed(String),
}

/// Per-tab owner of the [`SessionContext`]. Mutators update memory, then write the
/// allow-listed subset to the shared store; changes from other tabs are merged by
/// [`SessionContextStore::poll_remote`].
pub struct SessionContextStore {
    context: SessionContext,
    storage: Option<StorageHandle>,
    listeners: Vec<Sender<ContextEvent>>,
    persist_failed: bool,
    restore_warning: Option<String>,
}

impl SessionContextStore {
    pub fn open(storage: Option<StorageHandle>, game: GameId, masterlist_branch: &str) -> Self {
        let mut store = Self {
            context: SessionContext::new(game, masterlist_branch),
            storage: None,
            listeners: Vec::new(),
            persist_failed: false,
            restore_warning: None,
        };

        let Some(handle) = storage else {
            return store;
        };
        match handle.read(SESSION_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedContext>(&raw) {
                Ok(persisted) => store.restore(persisted),
                Err(err) => {
                    store.restore_warning = Some(format!("Stored session unreadable: {err}"));
                }
            },
            Ok(None) => {}
            Err(err) => {
                store.restore_warning =
                    Some(format!("Session storage unavailable ({err}); keeping it in memory"));
                return store;
            }
        }
        store.storage = Some(handle);
        store
    }

    pub fn in_memory(game: GameId, masterlist_branch: &str) -> Self {
        Self::open(None, game, masterlist_branch)
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    pub fn take_restore_warning(&mut self) -> Option<String> {
        self.restore_warning.take()
    }

    pub fn subscribe(&mut self) -> Receiver<ContextEvent> {
        let (sender, receiver) = mpsc::channel();
        self.listeners.push(sender);
        receiver
    }

    pub fn set_game(&mut self, game: GameId) {
        self.mutate(ChangeScope::working_set(), |context| {
            context.selected_game = game;
        });
    }

    pub fn set_game_version(&mut self, version: &str) {
        let version = version.trim().to_string();
        self.mutate(ChangeScope::working_set(), |context| {
            context.game_version = version;
        });
    }

    pub fn set_masterlist_branch(&mut self, branch: &str) {
        let branch = branch.trim().to_string();
        self.mutate(ChangeScope::working_set(), |context| {
            context.masterlist_branch = branch;
        });
    }

    pub fn set_mod_list_text(&mut self, text: &str) {
        let text = text.to_string();
        self.mutate(ChangeScope::working_set(), |context| {
            context.set_mod_list_text(text);
        });
    }

    pub fn set_analysis(&mut self, result: AnalysisResult) {
        self.set_analysis_at(result, now_millis());
    }

    pub fn set_analysis_at(&mut self, result: AnalysisResult, now_ms: i64) {
        self.mutate(ChangeScope::analysis(), |context| {
            context.last_analysis = Some(result);
            context.last_analysis_time = next_stamp(context.last_analysis_time, now_ms);
        });
    }

    pub fn set_saved_lists(&mut self, lists: Vec<SavedListMeta>) {
        self.set_saved_lists_at(lists, now_millis());
    }

    pub fn set_saved_lists_at(&mut self, lists: Vec<SavedListMeta>, now_ms: i64) {
        self.mutate(ChangeScope::saved_lists(), |context| {
            context.saved_lists = lists;
            context.last_save_time = next_stamp(context.last_save_time, now_ms);
        });
    }

    /// Adds or replaces the entry with the same name, newest first.
    pub fn record_saved_list(&mut self, meta: SavedListMeta) {
        let mut lists = self.context.saved_lists.clone();
        lists.retain(|existing| existing.name != meta.name);
        lists.insert(0, meta);
        self.set_saved_lists(lists);
    }

    pub fn remove_saved_list(&mut self, name: &str) -> bool {
        let mut lists = self.context.saved_lists.clone();
        let before = lists.len();
        lists.retain(|existing| existing.name != name);
        if lists.len() == before {
            return false;
        }
        self.set_saved_lists(lists);
        true
    }

    pub fn set_filter_state(&mut self, filter: FilterState) {
        self.mutate(ChangeScope::filters(), |context| {
            context.filter_state = filter;
        });
    }

    pub fn toggle_severity(&mut self, severity: Severity) {
        self.mutate(ChangeScope::filters(), |context| {
            context.filter_state.toggle(severity);
        });
    }

    pub fn add_recent_search(&mut self, query: &str) {
        let query = query.trim().to_string();
        if query.is_empty() {
            return;
        }
        self.mutate(ChangeScope::searches(), |context| {
            push_recent(&mut context.recent_searches, query);
        });
    }

    /// Drops the mod list and the analysis that belonged to it.
    pub fn clear_mod_list(&mut self) {
        self.clear_mod_list_at(now_millis());
    }

    pub fn clear_mod_list_at(&mut self, now_ms: i64) {
        let scope = ChangeScope {
            analysis: true,
            working_set: true,
            ..ChangeScope::default()
        };
        self.mutate(scope, |context| {
            context.set_mod_list_text(String::new());
            context.last_analysis = None;
            context.last_analysis_time = next_stamp(context.last_analysis_time, now_ms);
        });
    }

    /// Drains change notifications from other tabs. Returns what changed locally.
    pub fn poll_remote(&mut self) -> ChangeScope {
        let mut latest = None;
        if let Some(handle) = &self.storage {
            while let Some(event) = handle.try_next_event() {
                if event.key == SESSION_KEY {
                    latest = Some(event.new_value);
                }
            }
        }
        match latest {
            Some(Some(raw)) => self.apply_remote(&raw),
            _ => ChangeScope::default(),
        }
    }

    /// Field-group merge of a value written by another tab.
    pub fn apply_remote(&mut self, raw: &str) -> ChangeScope {
        let Ok(incoming) = serde_json::from_str::<PersistedContext>(raw) else {
            return ChangeScope::default();
        };
        let mut scope = merge_timestamped(&mut self.context, &incoming);
        scope.merge(merge_overwrites(&mut self.context, incoming));
        if scope.any() {
            self.broadcast(ContextEvent::Changed {
                origin: ChangeOrigin::Remote,
                scope,
            });
        }
        scope
    }

    fn restore(&mut self, persisted: PersistedContext) {
        let filter = persisted.filter_state;
        merge_timestamped(&mut self.context, &persisted);
        merge_overwrites(&mut self.context, persisted);
        if let Some(filter) = filter {
            self.context.filter_state = filter;
        }
    }

    fn mutate(&mut self, scope: ChangeScope, apply: impl FnOnce(&mut SessionContext)) {
        self.poll_remote();
        apply(&mut self.context);
        self.persist();
        self.broadcast(ContextEvent::Changed {
            origin: ChangeOrigin::Local,
            scope,
        });
    }

    /// Read-merge-write: a newer analysis or saved-list group already in the store is adopted
    /// before this tab's value replaces it.
    fn persist(&mut self) {
        let stored = match &self.storage {
            Some(handle) => handle.read(SESSION_KEY),
            None => return,
        };
        if let Ok(Some(raw)) = stored {
            if let Ok(stored) = serde_json::from_str::<PersistedContext>(&raw) {
                let scope = merge_timestamped(&mut self.context, &stored);
                if scope.any() {
                    self.broadcast(ContextEvent::Changed {
                        origin: ChangeOrigin::Remote,
                        scope,
                    });
                }
            }
        }

        let result = serde_json::to_string(&self.context.persisted())
            .map_err(|err| err.to_string())
            .and_then(|raw| match &self.storage {
                Some(handle) => handle.write(SESSION_KEY, &raw).map_err(|err| err.to_string()),
                None => Ok(()),
            });
        match result {
            Ok(()) => self.persist_failed = false,
            Err(err) => {
                if !self.persist_failed {
                    self.persist_failed = true;
                    self.broadcast(ContextEvent::PersistFailed(err));
                }
            }
        }
    }

    fn broadcast(&mut self, event: ContextEvent) {
        self.listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
    }
}

impl ChangeScope {
    fn working_set() -> Self {
        Self {
            working_set: true,
            ..Self::default()
        }
    }

    fn analysis() -> Self {
        Self {
            analysis: true,
            ..Self::default()
        }
    }

    fn saved_lists() -> Self {
        Self {
            saved_lists: true,
            ..Self::default()
        }
    }

    fn filters() -> Self {
        Self {
            filters: true,
            ..Self::default()
        }
    }

    fn searches() -> Self {
        Self {
            searches: true,
            ..Self::default()
        }
    }
}

/// Expensive state: each group is replaced only by a strictly newer timestamp.
fn merge_timestamped(context: &mut SessionContext, incoming: &PersistedContext) -> ChangeScope {
    let mut scope = ChangeScope::default();
    if let Some(time) = incoming.last_analysis_time {
        if time > context.last_analysis_time {
            context.last_analysis = incoming.last_analysis.clone();
            context.last_analysis_time = time;
            scope.analysis = true;
        }
    }
    if let Some(time) = incoming.last_save_time {
        if time > context.last_save_time {
            context.saved_lists = incoming.saved_lists.clone().unwrap_or_default();
            context.last_save_time = time;
            scope.saved_lists = true;
        }
    }
    scope
}

/// Cheap, frequently edited input: the incoming value wins whenever present.
fn merge_overwrites(context: &mut SessionContext, incoming: PersistedContext) -> ChangeScope {
    let mut scope = ChangeScope::default();
    if let Some(game) = incoming.selected_game {
        scope.working_set |= context.selected_game != game;
        context.selected_game = game;
    }
    if let Some(version) = incoming.game_version {
        scope.working_set |= context.game_version != version;
        context.game_version = version;
    }
    if let Some(branch) = incoming.masterlist_branch {
        scope.working_set |= context.masterlist_branch != branch;
        context.masterlist_branch = branch;
    }
    if let Some(text) = incoming.mod_list_text {
        if context.mod_list_text != text {
            scope.working_set = true;
            context.set_mod_list_text(text);
        }
    }
    if let Some(searches) = incoming.recent_searches {
        let mut cleaned = Vec::new();
        for query in searches.into_iter().rev() {
            push_recent(&mut cleaned, query);
        }
        scope.searches |= context.recent_searches != cleaned;
        context.recent_searches = cleaned;
    }
    scope
}

fn push_recent(list: &mut Vec<String>, query: String) {
    list.retain(|existing| *existing != query);
    list.insert(0, query);
    list.truncate(RECENT_SEARCH_LIMIT);
}

fn next_stamp(previous: i64, now_ms: i64) -> i64 {
    now_ms.max(previous.saturating_add(1))
}

pub fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        report::Issue,
        storage::{MemoryStorage, StorageHub, UnavailableStorage},
    };

    fn result_with(message: &str) -> AnalysisResult {
        let mut result = AnalysisResult::default();
        result.conflicts.errors.push(Issue {
            severity: Severity::Error,
            message: message.to_string(),
            ..Issue::default()
        });
        result
    }

    fn open_tab(hub: &StorageHub) -> SessionContextStore {
        SessionContextStore::open(Some(hub.connect().unwrap()), GameId::SkyrimSe, "v0.21")
    }

    fn snapshot(message: &str, time: i64) -> String {
        let mut context = SessionContext::new(GameId::SkyrimSe, "v0.21");
        context.last_analysis = Some(result_with(message));
        context.last_analysis_time = time;
        serde_json::to_string(&context.persisted()).unwrap()
    }

    #[test]
    fn recent_searches_are_a_deduplicated_mru_list() {
        let mut store = SessionContextStore::in_memory(GameId::SkyrimSe, "v0.21");
        store.add_recent_search("skse");
        store.add_recent_search("mcm");
        store.add_recent_search("skse");
        assert_eq!(store.context().recent_searches, vec!["skse", "mcm"]);

        for index in 0..12 {
            store.add_recent_search(&format!("q{index}"));
        }
        store.add_recent_search("   ");
        let searches = &store.context().recent_searches;
        assert_eq!(searches.len(), RECENT_SEARCH_LIMIT);
        assert_eq!(searches[0], "q11");
        assert_eq!(searches[9], "q2");
    }

    #[test]
    fn parsed_mod_list_tracks_the_text() {
        let mut store = SessionContextStore::in_memory(GameId::SkyrimSe, "v0.21");
        store.set_mod_list_text("*Skyrim.esm\n*SkyUI_SE.esp\n");
        assert_eq!(store.context().mod_list_parsed(), ["Skyrim.esm", "SkyUI_SE.esp"]);
        store.set_mod_list_text("*Skyrim.esm\n");
        assert_eq!(store.context().mod_list_parsed(), ["Skyrim.esm"]);
    }

    #[test]
    fn merge_keeps_the_newer_analysis_in_either_order() {
        let mut older_tab = SessionContextStore::in_memory(GameId::SkyrimSe, "v0.21");
        older_tab.set_analysis_at(result_with("old"), 100);
        older_tab.apply_remote(&snapshot("new", 200));
        assert_eq!(older_tab.context().last_analysis_time, 200);
        assert_eq!(older_tab.context().last_analysis, Some(result_with("new")));

        let mut newer_tab = SessionContextStore::in_memory(GameId::SkyrimSe, "v0.21");
        newer_tab.set_analysis_at(result_with("new"), 200);
        let scope = newer_tab.apply_remote(&snapshot("old", 100));
        assert!(!scope.analysis);
        assert_eq!(newer_tab.context().last_analysis_time, 200);
        assert_eq!(newer_tab.context().last_analysis, Some(result_with("new")));
    }

    #[test]
    fn equal_timestamps_keep_local_state() {
        let mut tab = SessionContextStore::in_memory(GameId::SkyrimSe, "v0.21");
        tab.set_analysis_at(result_with("mine"), 150);
        tab.apply_remote(&snapshot("theirs", 150));
        assert_eq!(tab.context().last_analysis, Some(result_with("mine")));
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut tab = SessionContextStore::in_memory(GameId::SkyrimSe, "v0.21");
        tab.set_analysis_at(result_with("a"), 500);
        tab.set_analysis_at(result_with("b"), 400);
        assert_eq!(tab.context().last_analysis_time, 501);
        tab.set_saved_lists_at(Vec::new(), 10);
        tab.set_saved_lists_at(Vec::new(), 10);
        assert_eq!(tab.context().last_save_time, 11);
    }

    #[test]
    fn tabs_converge_through_the_shared_store() {
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = open_tab(&hub);
        let mut second = open_tab(&hub);
        let events = second.subscribe();

        first.set_mod_list_text("*Skyrim.esm\n*Alternate Start.esp\n");
        first.set_game(GameId::Fallout4);
        first.add_recent_search("patch");
        first.set_analysis_at(result_with("from first"), 1_000);

        let scope = second.poll_remote();
        assert!(scope.analysis && scope.working_set && scope.searches);
        assert_eq!(second.context().selected_game, GameId::Fallout4);
        assert_eq!(
            second.context().mod_list_parsed(),
            ["Skyrim.esm", "Alternate Start.esp"]
        );
        assert_eq!(second.context().recent_searches, vec!["patch"]);
        assert_eq!(second.context().last_analysis, Some(result_with("from first")));
        assert_eq!(
            events.try_recv().unwrap(),
            ContextEvent::Changed {
                origin: ChangeOrigin::Remote,
                scope,
            }
        );
        assert_eq!(second.poll_remote(), ChangeScope::default());
    }

    #[test]
    fn filter_state_stays_local_to_each_tab() {
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = open_tab(&hub);
        let mut second = open_tab(&hub);
        first.toggle_severity(Severity::Info);
        second.poll_remote();
        assert!(second.context().filter_state.show_info);

        let third = open_tab(&hub);
        assert!(!third.context().filter_state.show_info);
    }

    #[test]
    fn stale_local_write_adopts_newer_stored_analysis() {
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = open_tab(&hub);
        let mut second = open_tab(&hub);
        first.set_analysis_at(result_with("fresh"), 5_000);
        // second never polls explicitly; its next write must not clobber the fresh result
        second.set_game_version("1.6.1170");
        assert_eq!(second.context().last_analysis, Some(result_with("fresh")));

        let reopened = open_tab(&hub);
        assert_eq!(reopened.context().last_analysis, Some(result_with("fresh")));
        assert_eq!(reopened.context().game_version, "1.6.1170");
    }

    #[test]
    fn clearing_the_mod_list_replicates_the_null_analysis() {
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = open_tab(&hub);
        let mut second = open_tab(&hub);
        first.set_mod_list_text("*A.esp\n");
        first.set_analysis_at(result_with("x"), 100);
        second.poll_remote();
        assert!(second.context().last_analysis.is_some());

        first.clear_mod_list_at(150);
        second.poll_remote();
        assert_eq!(second.context().last_analysis, None);
        assert_eq!(second.context().mod_list_text(), "");
        assert!(second.context().mod_list_parsed().is_empty());
    }

    #[test]
    fn saved_lists_use_their_own_timestamp() {
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = open_tab(&hub);
        let mut second = open_tab(&hub);
        first.record_saved_list(SavedListMeta {
            name: "Survival".to_string(),
            game: GameId::SkyrimSe,
            mod_count: 120,
            saved_at: 1,
        });
        second.poll_remote();
        assert_eq!(second.context().saved_lists.len(), 1);
        assert!(second.remove_saved_list("Survival"));
        assert!(!second.remove_saved_list("Survival"));
        first.poll_remote();
        assert!(first.context().saved_lists.is_empty());
    }

    #[test]
    fn corrupt_stored_value_degrades_to_defaults() {
        let mut backend = MemoryStorage::new();
        crate::storage::Storage::write(&mut backend, SESSION_KEY, "{not json").unwrap();
        let hub = StorageHub::new(backend);
        let mut store = open_tab(&hub);
        assert!(store.take_restore_warning().is_some());
        assert!(store.is_persistent());
        assert_eq!(store.context().selected_game, GameId::SkyrimSe);
        assert!(store.context().last_analysis.is_none());

        assert_eq!(store.apply_remote("garbage"), ChangeScope::default());
    }

    #[test]
    fn unavailable_storage_keeps_working_in_memory() {
        let hub = StorageHub::new(UnavailableStorage);
        let mut store = open_tab(&hub);
        assert!(!store.is_persistent());
        assert!(store.take_restore_warning().is_some());
        store.add_recent_search("skse");
        store.set_mod_list_text("*A.esp");
        assert_eq!(store.context().recent_searches, vec!["skse"]);
        assert_eq!(store.context().mod_list_parsed(), ["A.esp"]);
    }

    #[test]
    fn failed_writes_notify_once() {
        struct BrokenWrites;
        impl crate::storage::Storage for BrokenWrites {
            fn read(&self, _key: &str) -> Result<Option<String>, crate::error::StorageError> {
                Ok(None)
            }
            fn write(&mut self, _key: &str, _value: &str) -> Result<(), crate::error::StorageError> {
                Err(crate::error::StorageError::Unavailable)
            }
            fn remove(&mut self, _key: &str) -> Result<(), crate::error::StorageError> {
                Ok(())
            }
        }

        let hub = StorageHub::new(BrokenWrites);
        let mut store = open_tab(&hub);
        let events = store.subscribe();
        store.add_recent_search("one");
        store.add_recent_search("two");
        let failures = events
            .try_iter()
            .filter(|event| matches!(event, ContextEvent::PersistFailed(_)))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(store.context().recent_searches, vec!["two", "one"]);
    }
}
