use crate::model::VehicleKind;

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Selectable base map layers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseMap {
    #[serde(rename = "openstreetmap")]
    OpenStreetMap,
    #[serde(rename = "opentopomap")]
    OpenTopoMap,
}

// Unrecognized persisted base map names fall back to the default instead of
// invalidating the whole settings file.
fn base_map_or_default<'de, D>(deserializer: D) -> Result<BaseMap, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(match name.as_str() {
        "opentopomap" => BaseMap::OpenTopoMap,
        _ => BaseMap::OpenStreetMap,
    })
}

/// User display preferences, the persisted unit of the settings store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapSettings {
    pub show_tooltip: bool,
    pub show_station_names: bool,
    pub station_names_opacity: f64,
    pub show_trains: bool,
    pub show_tram_trains: bool,
    pub show_hev: bool,
    #[serde(deserialize_with = "base_map_or_default")]
    pub base_map: BaseMap,
    pub show_railway_overlay: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            show_tooltip: true,
            show_station_names: true,
            station_names_opacity: 0.9,
            show_trains: true,
            show_tram_trains: true,
            show_hev: true,
            base_map: BaseMap::OpenStreetMap,
            show_railway_overlay: true,
        }
    }
}

impl MapSettings {
    pub fn kind_visible(&self, kind: VehicleKind) -> bool {
        match kind {
            VehicleKind::Train => self.show_trains,
            VehicleKind::TramTrain => self.show_tram_trains,
            VehicleKind::Hev => self.show_hev,
        }
    }
}

type Subscriber = Box<dyn Fn(&MapSettings) + Send + Sync>;

/// Observable settings store: holds the current `MapSettings`, persists
/// every change to a JSON file, and notifies registered subscribers after
/// each change. Explicit pub/sub instead of ambient broadcast events.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<MapSettings>,
    subscribers: RwLock<Vec<Subscriber>>,
    /// Mobile clients never show tooltips, regardless of the stored
    /// preference. Runtime-only, never persisted.
    mobile: AtomicBool,
}

impl SettingsStore {
    /// Loads settings from `path`; a missing or unreadable file yields the
    /// defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match Self::read_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                if path.exists() {
                    warn!("Could not read settings from {:?}: {:#}", path, e);
                }
                MapSettings::default()
            }
        };
        Self {
            path,
            current: RwLock::new(current),
            subscribers: RwLock::new(Vec::new()),
            mobile: AtomicBool::new(false),
        }
    }

    fn read_file(path: &Path) -> Result<MapSettings> {
        let f = File::open(path).context("opening settings file")?;
        serde_json::from_reader(f).context("parsing settings file")
    }

    fn write_file(&self, settings: &MapSettings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let f = File::create(&self.path).context("creating settings file")?;
        serde_json::to_writer_pretty(f, settings).context("writing settings file")?;
        Ok(())
    }

    pub fn get(&self) -> MapSettings {
        self.current.read().unwrap().clone()
    }

    /// Registers a callback invoked after every settings change.
    pub fn subscribe(&self, subscriber: impl Fn(&MapSettings) + Send + Sync + 'static) {
        self.subscribers.write().unwrap().push(Box::new(subscriber));
    }

    /// Applies a mutation, persists the result, and notifies subscribers.
    /// No-op (no persistence, no notification) when nothing changed.
    pub fn update(&self, mutate: impl FnOnce(&mut MapSettings)) -> Result<MapSettings> {
        let updated = {
            let mut guard = self.current.write().unwrap();
            let before = guard.clone();
            mutate(&mut guard);
            if *guard == before {
                return Ok(before);
            }
            guard.clone()
        };

        self.write_file(&updated)?;

        for subscriber in self.subscribers.read().unwrap().iter() {
            subscriber(&updated);
        }
        Ok(updated)
    }

    /// Replaces the settings wholesale (the PUT /settings path).
    pub fn replace(&self, settings: MapSettings) -> Result<MapSettings> {
        self.update(|s| *s = settings)
    }

    pub fn set_mobile(&self, mobile: bool) {
        self.mobile.store(mobile, Ordering::Relaxed);
    }

    pub fn is_mobile(&self) -> bool {
        self.mobile.load(Ordering::Relaxed)
    }

    /// Tooltip visibility with the mobile override applied.
    pub fn effective_show_tooltip(&self) -> bool {
        !self.is_mobile() && self.current.read().unwrap().show_tooltip
    }
}
