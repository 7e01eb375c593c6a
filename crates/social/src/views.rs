//! Live-view registrations. This module is main-context only: view handles
//! are `Rc`/`Weak` and the registry is deliberately `!Send`, matching the
//! rule that view objects are never touched from the worker context.

use camarade_storage::PlayerId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Friends,
    Requests,
    Blocked,
    Settings,
}

/// An open interactive view. The registry only needs identity and kind; the
/// UI layer owns rendering and click dispatch.
pub trait LobbyView {
    fn kind(&self) -> MenuKind;
}

/// Session-layer probe used by the sweep: connectivity and the view the
/// player actually has open right now.
pub trait SessionDirectory {
    fn is_connected(&self, player: &PlayerId) -> bool;

    fn open_view(&self, player: &PlayerId) -> Option<Rc<dyn LobbyView>>;
}

pub type RefreshCallback = Rc<dyn Fn(&PlayerId)>;

struct Registration {
    view: Weak<dyn LobbyView>,
    callback: RefreshCallback,
    menu: MenuKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub refreshed: usize,
    pub dropped: usize,
}

/// Tracks which view each player has open and periodically asks it to
/// recompute its dynamic content. Registrations hold a non-owning handle,
/// so a closed view is never kept alive from here; the sweep notices the
/// dead handle and drops the registration instead.
#[derive(Default)]
pub struct LiveViewRegistry {
    entries: RefCell<HashMap<PlayerId, Registration>>,
}

impl LiveViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the player's open view, replacing any prior registration.
    pub fn register(&self, player: PlayerId, view: &Rc<dyn LobbyView>, callback: RefreshCallback) {
        let registration = Registration {
            view: Rc::downgrade(view),
            callback,
            menu: view.kind(),
        };
        self.entries.borrow_mut().insert(player, registration);
    }

    pub fn unregister(&self, player: &PlayerId) -> bool {
        self.entries.borrow_mut().remove(player).is_some()
    }

    pub fn is_registered(&self, player: &PlayerId) -> bool {
        self.entries.borrow().contains_key(player)
    }

    pub fn registered_menu(&self, player: &PlayerId) -> Option<MenuKind> {
        self.entries.borrow().get(player).map(|entry| entry.menu)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// One sweep pass over every registration: disconnected players, dead
    /// view handles and replaced views are dropped; surviving views get
    /// their refresh callback. A panicking callback is logged for that
    /// player and never aborts the pass for the others.
    pub fn sweep_once(&self, sessions: &dyn SessionDirectory) -> SweepOutcome {
        let mut stale = Vec::new();
        let mut refresh = Vec::new();
        {
            let entries = self.entries.borrow();
            for (player, registration) in entries.iter() {
                if !sessions.is_connected(player) {
                    stale.push(player.clone());
                    continue;
                }
                let Some(view) = registration.view.upgrade() else {
                    stale.push(player.clone());
                    continue;
                };
                match sessions.open_view(player) {
                    Some(open) if Rc::ptr_eq(&open, &view) => {
                        refresh.push((player.clone(), registration.callback.clone()));
                    }
                    _ => stale.push(player.clone()),
                }
            }
        }
        let dropped = stale.len();
        if dropped > 0 {
            let mut entries = self.entries.borrow_mut();
            for player in &stale {
                entries.remove(player);
            }
            debug!(dropped, "stale view registrations swept");
        }
        let mut refreshed = 0;
        for (player, callback) in refresh {
            if run_callback(&callback, &player) {
                refreshed += 1;
            }
        }
        SweepOutcome { refreshed, dropped }
    }

    /// Immediately refreshes the player's view, outside of the sweep. Used
    /// right after a mutation so an open menu reflects it without waiting
    /// for the next tick. Returns false when no live registration exists.
    pub fn force_update(&self, player: &PlayerId) -> bool {
        let live = {
            let entries = self.entries.borrow();
            entries.get(player).map(|registration| {
                (
                    registration.view.upgrade().is_some(),
                    registration.callback.clone(),
                )
            })
        };
        match live {
            Some((true, callback)) => {
                run_callback(&callback, player);
                true
            }
            Some((false, _)) => {
                self.entries.borrow_mut().remove(player);
                false
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

fn run_callback(callback: &RefreshCallback, player: &PlayerId) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(player))) {
        Ok(()) => true,
        Err(_) => {
            error!(player = %player, "view refresh callback panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct TestView {
        kind: MenuKind,
    }

    impl LobbyView for TestView {
        fn kind(&self) -> MenuKind {
            self.kind
        }
    }

    #[derive(Default)]
    struct TestSessions {
        connected: Vec<PlayerId>,
        open: HashMap<PlayerId, Rc<dyn LobbyView>>,
    }

    impl SessionDirectory for TestSessions {
        fn is_connected(&self, player: &PlayerId) -> bool {
            self.connected.contains(player)
        }

        fn open_view(&self, player: &PlayerId) -> Option<Rc<dyn LobbyView>> {
            self.open.get(player).cloned()
        }
    }

    fn view(kind: MenuKind) -> Rc<dyn LobbyView> {
        Rc::new(TestView { kind })
    }

    fn counting_callback() -> (RefreshCallback, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let callback: RefreshCallback = Rc::new(move |_player| seen.set(seen.get() + 1));
        (callback, count)
    }

    #[test]
    fn sweep_refreshes_live_matching_view() {
        let registry = LiveViewRegistry::new();
        let player = PlayerId::from("alice");
        let open = view(MenuKind::Friends);
        let (callback, count) = counting_callback();
        registry.register(player.clone(), &open, callback);
        let mut sessions = TestSessions::default();
        sessions.connected.push(player.clone());
        sessions.open.insert(player.clone(), open);
        let outcome = registry.sweep_once(&sessions);
        assert_eq!(outcome, SweepOutcome { refreshed: 1, dropped: 0 });
        assert_eq!(count.get(), 1);
        assert!(registry.is_registered(&player));
    }

    #[test]
    fn sweep_drops_released_view_without_firing() {
        let registry = LiveViewRegistry::new();
        let player = PlayerId::from("alice");
        let open = view(MenuKind::Requests);
        let (callback, count) = counting_callback();
        registry.register(player.clone(), &open, callback);
        let mut sessions = TestSessions::default();
        sessions.connected.push(player.clone());
        drop(open);
        let outcome = registry.sweep_once(&sessions);
        assert_eq!(outcome, SweepOutcome { refreshed: 0, dropped: 1 });
        assert_eq!(count.get(), 0);
        assert!(!registry.is_registered(&player));
    }

    #[test]
    fn sweep_drops_disconnected_and_replaced_views() {
        let registry = LiveViewRegistry::new();
        let offline = PlayerId::from("offline");
        let swapped = PlayerId::from("swapped");
        let (callback, count) = counting_callback();
        let first = view(MenuKind::Friends);
        let second = view(MenuKind::Settings);
        registry.register(offline.clone(), &first, callback.clone());
        registry.register(swapped.clone(), &first, callback);
        let mut sessions = TestSessions::default();
        sessions.connected.push(swapped.clone());
        sessions.open.insert(swapped.clone(), second);
        let outcome = registry.sweep_once(&sessions);
        assert_eq!(outcome, SweepOutcome { refreshed: 0, dropped: 2 });
        assert_eq!(count.get(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_callback_does_not_abort_sweep() {
        let registry = LiveViewRegistry::new();
        let loud = PlayerId::from("loud");
        let quiet = PlayerId::from("quiet");
        let loud_view = view(MenuKind::Friends);
        let quiet_view = view(MenuKind::Friends);
        registry.register(
            loud.clone(),
            &loud_view,
            Rc::new(|_player| panic!("refresh exploded")),
        );
        let (callback, count) = counting_callback();
        registry.register(quiet.clone(), &quiet_view, callback);
        let mut sessions = TestSessions::default();
        sessions.connected.push(loud.clone());
        sessions.connected.push(quiet.clone());
        sessions.open.insert(loud.clone(), loud_view);
        sessions.open.insert(quiet.clone(), quiet_view);
        let outcome = registry.sweep_once(&sessions);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn force_update_fires_immediately_or_prunes() {
        let registry = LiveViewRegistry::new();
        let player = PlayerId::from("alice");
        let open = view(MenuKind::Blocked);
        let (callback, count) = counting_callback();
        registry.register(player.clone(), &open, callback);
        assert!(registry.force_update(&player));
        assert_eq!(count.get(), 1);
        drop(open);
        assert!(!registry.force_update(&player));
        assert!(!registry.is_registered(&player));
    }

    #[test]
    fn register_replaces_prior_registration() {
        let registry = LiveViewRegistry::new();
        let player = PlayerId::from("alice");
        let first = view(MenuKind::Friends);
        let second = view(MenuKind::Settings);
        let (callback, _count) = counting_callback();
        registry.register(player.clone(), &first, callback.clone());
        registry.register(player.clone(), &second, callback);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.registered_menu(&player), Some(MenuKind::Settings));
        assert!(registry.unregister(&player));
        assert!(!registry.unregister(&player));
    }
}
