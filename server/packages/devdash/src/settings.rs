//! Persisted dashboard settings (favorites, archive, custom ports and names).
//!
//! All writes go through [`SettingsStore::update`], which holds a single
//! writer lock for the whole read-modify-write so concurrent callers cannot
//! lose each other's updates.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::persistence::JsonFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FavoritesSortMode {
    #[default]
    Manual,
    AlphaAsc,
    AlphaDesc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub favorites: Vec<String>,
    pub archived: BTreeSet<String>,
    pub custom_ports: BTreeMap<String, u16>,
    pub custom_names: BTreeMap<String, String>,
    pub favorites_sort_mode: FavoritesSortMode,
}

impl Settings {
    pub fn display_name<'a>(&'a self, app_id: &'a str) -> &'a str {
        self.custom_names
            .get(app_id)
            .map(String::as_str)
            .unwrap_or(app_id)
    }

    pub fn is_favorite(&self, app_id: &str) -> bool {
        self.favorites.iter().any(|id| id == app_id)
    }

    /// Favorites in display order for the current sort mode.
    pub fn sorted_favorites(&self) -> Vec<String> {
        let mut favorites = self.favorites.clone();
        match self.favorites_sort_mode {
            FavoritesSortMode::Manual => {}
            FavoritesSortMode::AlphaAsc => favorites.sort_by_key(|id| self.sort_key(id)),
            FavoritesSortMode::AlphaDesc => {
                favorites.sort_by_key(|id| self.sort_key(id));
                favorites.reverse();
            }
        }
        favorites
    }

    fn sort_key(&self, app_id: &str) -> String {
        self.display_name(app_id).to_lowercase()
    }

    fn set_favorite(&mut self, app_id: &str, favorite: bool) {
        if favorite {
            if !self.is_favorite(app_id) {
                self.favorites.push(app_id.to_string());
            }
            self.archived.remove(app_id);
        } else {
            self.favorites.retain(|id| id != app_id);
        }
    }

    fn set_archived(&mut self, app_id: &str, archived: bool) {
        if archived {
            self.archived.insert(app_id.to_string());
            self.favorites.retain(|id| id != app_id);
        } else {
            self.archived.remove(app_id);
        }
    }
}

#[derive(Debug)]
pub struct SettingsStore {
    file: JsonFile<Settings>,
    current: Mutex<Settings>,
}

impl SettingsStore {
    /// Open the store, starting from defaults if the document is missing or unreadable.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let file = JsonFile::new(path);
        let current = match file.load().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load settings, using defaults");
                Settings::default()
            }
        };
        Self {
            file,
            current: Mutex::new(current),
        }
    }

    pub async fn get(&self) -> Settings {
        self.current.lock().await.clone()
    }

    /// Apply `mutate` to the current document and persist the result.
    ///
    /// The in-memory copy is committed even when the write fails; only
    /// durability is lost.
    pub async fn update<R>(&self, mutate: impl FnOnce(&mut Settings) -> R) -> (Settings, R) {
        let mut current = self.current.lock().await;
        let mut next = current.clone();
        let result = mutate(&mut next);
        if next != *current {
            if let Err(err) = self.file.save(&next).await {
                tracing::warn!(error = %err, "failed to persist settings");
            }
            *current = next;
        }
        (current.clone(), result)
    }

    /// Toggle an app's favorite flag. Returns the new flag.
    pub async fn toggle_favorite(&self, app_id: &str) -> bool {
        let (_, favorite) = self
            .update(|settings| {
                let favorite = !settings.is_favorite(app_id);
                settings.set_favorite(app_id, favorite);
                favorite
            })
            .await;
        favorite
    }

    /// Archive or unarchive an app. Archiving also drops it from favorites.
    pub async fn set_archived(&self, app_id: &str, archived: bool) -> Settings {
        self.update(|settings| settings.set_archived(app_id, archived))
            .await
            .0
    }

    pub async fn set_custom_port(&self, app_id: &str, port: Option<u16>) -> Settings {
        self.update(|settings| match port {
            Some(port) => {
                settings.custom_ports.insert(app_id.to_string(), port);
            }
            None => {
                settings.custom_ports.remove(app_id);
            }
        })
        .await
        .0
    }

    pub async fn set_custom_ports(&self, ports: &BTreeMap<String, u16>) -> Settings {
        self.update(|settings| {
            for (app_id, port) in ports {
                settings.custom_ports.insert(app_id.clone(), *port);
            }
        })
        .await
        .0
    }

    pub async fn set_custom_name(&self, app_id: &str, name: Option<String>) -> Settings {
        self.update(|settings| match name.filter(|name| !name.trim().is_empty()) {
            Some(name) => {
                settings.custom_names.insert(app_id.to_string(), name);
            }
            None => {
                settings.custom_names.remove(app_id);
            }
        })
        .await
        .0
    }

    pub async fn set_sort_mode(&self, mode: FavoritesSortMode) -> Settings {
        self.update(|settings| settings.favorites_sort_mode = mode)
            .await
            .0
    }

    /// Replace the manual favorites order. Ids that are not favorites are
    /// ignored; favorites missing from `order` keep their relative order at the end.
    pub async fn reorder_favorites(&self, order: &[String]) -> Settings {
        self.update(|settings| {
            let mut reordered: Vec<String> = Vec::with_capacity(settings.favorites.len());
            for app_id in order {
                if settings.is_favorite(app_id) && !reordered.contains(app_id) {
                    reordered.push(app_id.clone());
                }
            }
            for app_id in &settings.favorites {
                if !reordered.contains(app_id) {
                    reordered.push(app_id.clone());
                }
            }
            settings.favorites = reordered;
        })
        .await
        .0
    }

    pub async fn custom_port(&self, app_id: &str) -> Option<u16> {
        self.current.lock().await.custom_ports.get(app_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json")).await;
        (dir, store)
    }

    #[tokio::test]
    async fn archiving_a_favorite_removes_it_in_the_same_update() {
        let (dir, store) = store().await;
        assert!(store.toggle_favorite("web").await);
        assert!(store.toggle_favorite("api").await);

        let settings = store.set_archived("web", true).await;
        assert_eq!(settings.favorites, vec!["api".to_string()]);
        assert!(settings.archived.contains("web"));

        let reopened = SettingsStore::open(dir.path().join("settings.json")).await;
        let persisted = reopened.get().await;
        assert_eq!(persisted.favorites, vec!["api".to_string()]);
        assert!(persisted.archived.contains("web"));
    }

    #[tokio::test]
    async fn favoriting_an_archived_app_unarchives_it() {
        let (_dir, store) = store().await;
        store.set_archived("web", true).await;
        assert!(store.toggle_favorite("web").await);
        let settings = store.get().await;
        assert!(settings.is_favorite("web"));
        assert!(!settings.archived.contains("web"));
    }

    #[tokio::test]
    async fn sort_modes_use_display_names() {
        let (_dir, store) = store().await;
        for id in ["zeta", "alpha", "mid"] {
            store.toggle_favorite(id).await;
        }
        store
            .set_custom_name("zeta", Some("Aardvark".to_string()))
            .await;

        assert_eq!(store.get().await.sorted_favorites(), vec!["zeta", "alpha", "mid"]);

        store.set_sort_mode(FavoritesSortMode::AlphaAsc).await;
        assert_eq!(store.get().await.sorted_favorites(), vec!["zeta", "alpha", "mid"]);

        store
            .set_custom_name("zeta", None)
            .await;
        assert_eq!(store.get().await.sorted_favorites(), vec!["alpha", "mid", "zeta"]);

        store.set_sort_mode(FavoritesSortMode::AlphaDesc).await;
        assert_eq!(store.get().await.sorted_favorites(), vec!["zeta", "mid", "alpha"]);
    }

    #[tokio::test]
    async fn reorder_keeps_unlisted_favorites() {
        let (_dir, store) = store().await;
        for id in ["a", "b", "c"] {
            store.toggle_favorite(id).await;
        }
        let settings = store
            .reorder_favorites(&["c".to_string(), "ghost".to_string(), "a".to_string()])
            .await;
        assert_eq!(settings.favorites, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_updates() {
        let (_dir, store) = store().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..20u16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set_custom_port(&format!("app{i}"), Some(3000 + i)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get().await.custom_ports.len(), 20);
        assert_eq!(store.custom_port("app7").await, Some(3007));
    }

    #[test]
    fn sort_mode_serializes_kebab_case() {
        let json = serde_json::to_string(&FavoritesSortMode::AlphaDesc).unwrap();
        assert_eq!(json, "\"alpha-desc\"");
    }
}
