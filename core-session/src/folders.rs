//! Folder / playlist graph owned by the session entity.
//!
//! The collection is rebuilt wholesale on every hydration. Mutations publish
//! [`CollectionEvent`]s on the event bus:
//!
//! - structural changes (add, rename, remove) publish `ChildChanged`, which the
//!   dirty flag coordinator turns into `dirty = true`
//! - a folder or playlist turning active publishes `FolderActivated` /
//!   `PlaylistActivated`, which the selection persister records locally
//!
//! At most one folder is active, and at most one playlist is active inside
//! each folder.

use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};

use crate::error::{Result, SessionError};
use crate::model::{EntityId, FolderId, FolderPayload, PlaylistId, PlaylistPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    id: PlaylistId,
    title: String,
    active: bool,
}

impl Playlist {
    pub fn id(&self) -> &PlaylistId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn to_payload(&self) -> PlaylistPayload {
        PlaylistPayload {
            id: self.id.clone(),
            title: self.title.clone(),
            active: self.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    id: FolderId,
    title: String,
    active: bool,
    playlists: Vec<Playlist>,
}

impl Folder {
    fn from_payload(payload: FolderPayload) -> Self {
        let mut seen_active = false;
        let playlists = payload
            .playlists
            .into_iter()
            .map(|p| {
                let active = p.active && !seen_active;
                seen_active |= active;
                Playlist {
                    id: p.id,
                    title: p.title,
                    active,
                }
            })
            .collect();

        Self {
            id: payload.id,
            title: payload.title,
            active: payload.active,
            playlists,
        }
    }

    pub fn id(&self) -> &FolderId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn playlist(&self, id: &PlaylistId) -> Option<&Playlist> {
        self.playlists.iter().find(|p| &p.id == id)
    }

    pub fn active_playlist(&self) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.active)
    }

    fn playlist_position(&self, id: &PlaylistId) -> Option<usize> {
        self.playlists.iter().position(|p| &p.id == id)
    }

    fn to_payload(&self) -> FolderPayload {
        FolderPayload {
            id: self.id.clone(),
            title: self.title.clone(),
            active: self.active,
            playlists: self.playlists.iter().map(Playlist::to_payload).collect(),
        }
    }
}

/// Ordered folders of one session entity.
#[derive(Debug)]
pub struct FolderCollection {
    entity_id: EntityId,
    folders: Vec<Folder>,
    bus: EventBus,
}

impl FolderCollection {
    /// Build a live collection from payload data.
    ///
    /// Duplicate `active` flags in the payload are dropped so only the first
    /// active folder (and the first active playlist per folder) survives.
    pub fn from_payload(entity_id: EntityId, payloads: Vec<FolderPayload>, bus: EventBus) -> Self {
        let mut seen_active = false;
        let folders = payloads
            .into_iter()
            .map(|payload| {
                let mut folder = Folder::from_payload(payload);
                folder.active = folder.active && !seen_active;
                seen_active |= folder.active;
                folder
            })
            .collect();

        Self {
            entity_id,
            folders,
            bus,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Folder> {
        self.folders.iter()
    }

    pub fn get(&self, id: &FolderId) -> Option<&Folder> {
        self.folders.iter().find(|f| &f.id == id)
    }

    pub fn active_folder(&self) -> Option<&Folder> {
        self.folders.iter().find(|f| f.active)
    }

    /// Active playlist of the active folder.
    pub fn active_playlist(&self) -> Option<&Playlist> {
        self.active_folder().and_then(Folder::active_playlist)
    }

    pub fn to_payloads(&self) -> Vec<FolderPayload> {
        self.folders.iter().map(Folder::to_payload).collect()
    }

    pub fn add_folder(&mut self, title: impl Into<String>) -> FolderId {
        let id = FolderId::generate();
        let activate = self.folders.is_empty();
        self.folders.push(Folder {
            id: id.clone(),
            title: title.into(),
            active: activate,
            playlists: Vec::new(),
        });

        self.child_changed(&id, None);
        if activate {
            self.folder_activated(&id);
        }
        id
    }

    pub fn rename_folder(&mut self, id: &FolderId, title: impl Into<String>) -> Result<()> {
        let index = self.position(id)?;
        self.folders[index].title = title.into();
        self.child_changed(id, None);
        Ok(())
    }

    /// Remove a folder. If it was active the first remaining folder takes over.
    pub fn remove_folder(&mut self, id: &FolderId) -> Result<Folder> {
        let index = self.position(id)?;
        let removed = self.folders.remove(index);
        self.child_changed(&removed.id, None);

        if removed.active {
            if let Some(first) = self.folders.first_mut() {
                first.active = true;
                let first_id = first.id.clone();
                self.folder_activated(&first_id);
            }
        }
        Ok(removed)
    }

    pub fn add_playlist(&mut self, folder_id: &FolderId, title: impl Into<String>) -> Result<PlaylistId> {
        let index = self.position(folder_id)?;
        let id = PlaylistId::generate();

        let folder = &mut self.folders[index];
        let activate = folder.playlists.is_empty();
        folder.playlists.push(Playlist {
            id: id.clone(),
            title: title.into(),
            active: activate,
        });
        let folder_active = folder.active;

        self.child_changed(folder_id, Some(&id));
        if activate && folder_active {
            self.playlist_activated(folder_id, &id);
        }
        Ok(id)
    }

    pub fn rename_playlist(
        &mut self,
        folder_id: &FolderId,
        playlist_id: &PlaylistId,
        title: impl Into<String>,
    ) -> Result<()> {
        let (folder, playlist) = self.playlist_position(folder_id, playlist_id)?;
        self.folders[folder].playlists[playlist].title = title.into();
        self.child_changed(folder_id, Some(playlist_id));
        Ok(())
    }

    pub fn remove_playlist(&mut self, folder_id: &FolderId, playlist_id: &PlaylistId) -> Result<Playlist> {
        let (index, position) = self.playlist_position(folder_id, playlist_id)?;
        let folder = &mut self.folders[index];
        let removed = folder.playlists.remove(position);

        let mut promoted = None;
        if removed.active {
            if let Some(first) = folder.playlists.first_mut() {
                first.active = true;
                promoted = Some(first.id.clone());
            }
        }
        let folder_active = folder.active;

        self.child_changed(folder_id, Some(playlist_id));
        if let (Some(next), true) = (promoted, folder_active) {
            self.playlist_activated(folder_id, &next);
        }
        Ok(removed)
    }

    /// Make `id` the active folder. Returns `false` when it already was.
    pub fn activate_folder(&mut self, id: &FolderId) -> Result<bool> {
        let index = self.position(id)?;
        if self.folders[index].active {
            return Ok(false);
        }

        for (i, folder) in self.folders.iter_mut().enumerate() {
            folder.active = i == index;
        }
        self.folder_activated(id);
        Ok(true)
    }

    /// Make `playlist_id` the active playlist of its folder. Returns `false`
    /// when it already was.
    pub fn activate_playlist(&mut self, folder_id: &FolderId, playlist_id: &PlaylistId) -> Result<bool> {
        let (index, position) = self.playlist_position(folder_id, playlist_id)?;
        let folder = &mut self.folders[index];
        if folder.playlists[position].active {
            return Ok(false);
        }

        for (i, playlist) in folder.playlists.iter_mut().enumerate() {
            playlist.active = i == position;
        }
        if folder.active {
            self.playlist_activated(folder_id, playlist_id);
        }
        Ok(true)
    }

    /// Apply a remembered selection without publishing events.
    ///
    /// Falls back to the first folder (and the first playlist of the chosen
    /// folder) when nothing is remembered or the remembered item is gone.
    pub(crate) fn restore_selection(&mut self, folder: Option<&FolderId>, playlist: Option<&PlaylistId>) {
        if self.folders.is_empty() {
            return;
        }

        let index = folder
            .and_then(|id| self.folders.iter().position(|f| &f.id == id))
            .unwrap_or(0);
        for (i, f) in self.folders.iter_mut().enumerate() {
            f.active = i == index;
        }

        let target = &mut self.folders[index];
        if target.playlists.is_empty() {
            return;
        }
        let position = playlist
            .and_then(|id| target.playlist_position(id))
            .unwrap_or(0);
        for (i, p) in target.playlists.iter_mut().enumerate() {
            p.active = i == position;
        }
    }

    fn position(&self, id: &FolderId) -> Result<usize> {
        self.folders
            .iter()
            .position(|f| &f.id == id)
            .ok_or_else(|| SessionError::FolderNotFound(id.to_string()))
    }

    fn playlist_position(&self, folder_id: &FolderId, playlist_id: &PlaylistId) -> Result<(usize, usize)> {
        let index = self.position(folder_id)?;
        let position = self.folders[index]
            .playlist_position(playlist_id)
            .ok_or_else(|| SessionError::PlaylistNotFound {
                folder_id: folder_id.to_string(),
                playlist_id: playlist_id.to_string(),
            })?;
        Ok((index, position))
    }

    fn child_changed(&self, folder_id: &FolderId, playlist_id: Option<&PlaylistId>) {
        self.emit(CollectionEvent::ChildChanged {
            entity_id: self.entity_id.to_string(),
            folder_id: folder_id.to_string(),
            playlist_id: playlist_id.map(ToString::to_string),
        });
    }

    fn folder_activated(&self, folder_id: &FolderId) {
        self.emit(CollectionEvent::FolderActivated {
            entity_id: self.entity_id.to_string(),
            folder_id: folder_id.to_string(),
        });
    }

    fn playlist_activated(&self, folder_id: &FolderId, playlist_id: &PlaylistId) {
        self.emit(CollectionEvent::PlaylistActivated {
            entity_id: self.entity_id.to_string(),
            folder_id: folder_id.to_string(),
            playlist_id: playlist_id.to_string(),
        });
    }

    fn emit(&self, event: CollectionEvent) {
        // Nobody listening is fine
        let _ = self.bus.emit(CoreEvent::Collection(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::events::Receiver;

    fn folder(id: &str, active: bool, playlists: &[(&str, bool)]) -> FolderPayload {
        FolderPayload {
            id: FolderId::from(id),
            title: id.to_lowercase(),
            active,
            playlists: playlists
                .iter()
                .map(|(pid, active)| PlaylistPayload {
                    id: PlaylistId::from(*pid),
                    title: pid.to_lowercase(),
                    active: *active,
                })
                .collect(),
        }
    }

    fn collection(folders: Vec<FolderPayload>) -> (FolderCollection, Receiver<CoreEvent>) {
        let bus = EventBus::new(32);
        let rx = bus.subscribe();
        (FolderCollection::from_payload(EntityId::from("U1"), folders, bus), rx)
    }

    fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<CollectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Collection(e) = event {
                events.push(e);
            }
        }
        events
    }

    #[test]
    fn test_from_payload_keeps_single_active() {
        let (c, _rx) = collection(vec![
            folder("F1", true, &[("P1", true), ("P2", true)]),
            folder("F2", true, &[]),
        ]);

        assert_eq!(c.active_folder().unwrap().id().as_str(), "F1");
        assert!(!c.get(&FolderId::from("F2")).unwrap().is_active());
        assert_eq!(c.active_playlist().unwrap().id().as_str(), "P1");
        assert!(!c.get(&FolderId::from("F1")).unwrap().playlists()[1].is_active());
    }

    #[test]
    fn test_restore_selection_prefers_record() {
        let (mut c, mut rx) = collection(vec![
            folder("F1", false, &[]),
            folder("F2", false, &[("P1", false), ("P2", false)]),
        ]);

        c.restore_selection(Some(&FolderId::from("F2")), Some(&PlaylistId::from("P2")));

        assert_eq!(c.active_folder().unwrap().id().as_str(), "F2");
        assert_eq!(c.active_playlist().unwrap().id().as_str(), "P2");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_restore_selection_falls_back_to_first() {
        let (mut c, _rx) = collection(vec![
            folder("F1", false, &[("P1", false)]),
            folder("F2", true, &[]),
        ]);

        c.restore_selection(Some(&FolderId::from("gone")), None);

        assert_eq!(c.active_folder().unwrap().id().as_str(), "F1");
        assert!(!c.get(&FolderId::from("F2")).unwrap().is_active());
        assert_eq!(c.active_playlist().unwrap().id().as_str(), "P1");
    }

    #[test]
    fn test_restore_selection_on_empty_is_noop() {
        let (mut c, _rx) = collection(Vec::new());
        c.restore_selection(None, None);
        assert!(c.active_folder().is_none());
    }

    #[test]
    fn test_activate_folder_emits_only_on_edge() {
        let (mut c, mut rx) = collection(vec![folder("F1", true, &[]), folder("F2", false, &[])]);

        assert!(c.activate_folder(&FolderId::from("F2")).unwrap());
        assert!(!c.activate_folder(&FolderId::from("F2")).unwrap());

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![CollectionEvent::FolderActivated {
                entity_id: "U1".to_string(),
                folder_id: "F2".to_string(),
            }]
        );
        assert!(!c.get(&FolderId::from("F1")).unwrap().is_active());
    }

    #[test]
    fn test_structural_mutations_raise_child_changed() {
        let (mut c, mut rx) = collection(vec![folder("F1", true, &[])]);
        let f1 = FolderId::from("F1");

        c.rename_folder(&f1, "Renamed").unwrap();
        let playlist = c.add_playlist(&f1, "New").unwrap();
        c.rename_playlist(&f1, &playlist, "Other").unwrap();

        let events = drain(&mut rx);
        let changed = events
            .iter()
            .filter(|e| matches!(e, CollectionEvent::ChildChanged { .. }))
            .count();
        assert_eq!(changed, 3);
        // First playlist in the active folder becomes active
        assert!(events.iter().any(|e| matches!(
            e,
            CollectionEvent::PlaylistActivated { playlist_id, .. } if playlist_id == playlist.as_str()
        )));
        assert_eq!(c.get(&f1).unwrap().title(), "Renamed");
    }

    #[test]
    fn test_remove_active_folder_promotes_first() {
        let (mut c, mut rx) = collection(vec![
            folder("F1", false, &[]),
            folder("F2", true, &[]),
            folder("F3", false, &[]),
        ]);

        let removed = c.remove_folder(&FolderId::from("F2")).unwrap();
        assert!(removed.is_active());
        assert_eq!(c.active_folder().unwrap().id().as_str(), "F1");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CollectionEvent::ChildChanged { .. }));
        assert!(matches!(events[1], CollectionEvent::FolderActivated { .. }));
    }

    #[test]
    fn test_remove_active_playlist_promotes_first() {
        let (mut c, _rx) = collection(vec![folder("F1", true, &[("P1", false), ("P2", true)])]);
        let f1 = FolderId::from("F1");

        c.remove_playlist(&f1, &PlaylistId::from("P2")).unwrap();
        assert_eq!(c.active_playlist().unwrap().id().as_str(), "P1");
    }

    #[test]
    fn test_playlist_activation_outside_active_folder_is_quiet() {
        let (mut c, mut rx) = collection(vec![
            folder("F1", true, &[]),
            folder("F2", false, &[("P1", false), ("P2", false)]),
        ]);

        assert!(c
            .activate_playlist(&FolderId::from("F2"), &PlaylistId::from("P2"))
            .unwrap());
        assert!(drain(&mut rx).is_empty());
        assert!(c.get(&FolderId::from("F2")).unwrap().playlists()[1].is_active());
    }

    #[test]
    fn test_missing_items_are_errors() {
        let (mut c, _rx) = collection(vec![folder("F1", true, &[])]);

        assert!(matches!(
            c.activate_folder(&FolderId::from("nope")),
            Err(SessionError::FolderNotFound(_))
        ));
        assert!(matches!(
            c.activate_playlist(&FolderId::from("F1"), &PlaylistId::from("nope")),
            Err(SessionError::PlaylistNotFound { .. })
        ));
    }

    #[test]
    fn test_first_folder_added_becomes_active() {
        let (mut c, mut rx) = collection(Vec::new());
        let id = c.add_folder("Inbox");

        assert_eq!(c.active_folder().unwrap().id(), &id);
        assert_eq!(drain(&mut rx).len(), 2);

        c.add_folder("Second");
        assert_eq!(c.active_folder().unwrap().id(), &id);
        assert_eq!(c.to_payloads().len(), 2);
    }
}
