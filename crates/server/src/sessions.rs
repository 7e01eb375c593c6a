use camarade_social::PlayerId;
use camarade_social::bridge::MainHandle;
use camarade_social::notify::{Notifier, SocialNotice};
use camarade_social::views::{LiveViewRegistry, LobbyView, SessionDirectory};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use tracing::info;

/// Connected-player registry shared with the worker context. Engine
/// completions reach session and view state exclusively through the main
/// queue; `notify` posts, it never touches views itself.
pub struct LobbySessions {
    online: RwLock<HashSet<PlayerId>>,
    main: MainHandle<MainState>,
}

impl LobbySessions {
    pub fn new(main: MainHandle<MainState>) -> Self {
        Self {
            online: RwLock::new(HashSet::new()),
            main,
        }
    }

    pub fn connect(&self, player: PlayerId) {
        self.online.write().insert(player);
    }

    pub fn disconnect(&self, player: &PlayerId) {
        self.online.write().remove(player);
        let player = player.clone();
        self.main.post(move |state| {
            state.views.unregister(&player);
            state.open.remove(&player);
        });
    }

    pub fn is_online(&self, player: &PlayerId) -> bool {
        self.online.read().contains(player)
    }
}

impl Notifier for LobbySessions {
    fn is_online(&self, player: &PlayerId) -> bool {
        LobbySessions::is_online(self, player)
    }

    fn notify(&self, player: &PlayerId, notice: SocialNotice) {
        let player = player.clone();
        self.main.post(move |state| {
            match &notice {
                SocialNotice::RequestReceived { from, .. } => {
                    info!(player = %player, from = %from, "friend request notice delivered");
                }
                SocialNotice::FriendAdded { friend } => {
                    info!(player = %player, friend = %friend, "friend added notice delivered");
                }
            }
            // an open menu should reflect the change right away
            state.views.force_update(&player);
        });
    }
}

/// State owned by the main cooperative context: the live-view registry and
/// the views players actually have open. Never leaves the main thread.
pub struct MainState {
    pub views: LiveViewRegistry,
    pub open: HashMap<PlayerId, Rc<dyn LobbyView>>,
    pub sessions: Arc<LobbySessions>,
}

impl MainState {
    pub fn new(sessions: Arc<LobbySessions>) -> Self {
        Self {
            views: LiveViewRegistry::new(),
            open: HashMap::new(),
            sessions,
        }
    }
}

impl SessionDirectory for MainState {
    fn is_connected(&self, player: &PlayerId) -> bool {
        self.sessions.is_online(player)
    }

    fn open_view(&self, player: &PlayerId) -> Option<Rc<dyn LobbyView>> {
        self.open.get(player).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camarade_social::bridge::main_channel;
    use camarade_social::views::MenuKind;
    use std::cell::Cell;

    struct Menu;

    impl LobbyView for Menu {
        fn kind(&self) -> MenuKind {
            MenuKind::Friends
        }
    }

    #[tokio::test]
    async fn notice_is_marshaled_onto_the_main_state() {
        let (handle, mut queue) = main_channel::<MainState>();
        let sessions = Arc::new(LobbySessions::new(handle));
        sessions.connect(PlayerId::from("alice"));
        let mut state = MainState::new(Arc::clone(&sessions));

        let view: Rc<dyn LobbyView> = Rc::new(Menu);
        let refreshed = Rc::new(Cell::new(0));
        let seen = refreshed.clone();
        state.views.register(
            PlayerId::from("alice"),
            &view,
            Rc::new(move |_player| seen.set(seen.get() + 1)),
        );
        state.open.insert(PlayerId::from("alice"), view);

        sessions.notify(
            &PlayerId::from("alice"),
            SocialNotice::FriendAdded {
                friend: PlayerId::from("bob"),
            },
        );
        assert_eq!(queue.drain(&mut state), 1);
        assert_eq!(refreshed.get(), 1);
    }

    #[tokio::test]
    async fn disconnect_unregisters_the_view() {
        let (handle, mut queue) = main_channel::<MainState>();
        let sessions = Arc::new(LobbySessions::new(handle));
        sessions.connect(PlayerId::from("alice"));
        let mut state = MainState::new(Arc::clone(&sessions));
        let view: Rc<dyn LobbyView> = Rc::new(Menu);
        state
            .views
            .register(PlayerId::from("alice"), &view, Rc::new(|_player| {}));
        state.open.insert(PlayerId::from("alice"), view);

        sessions.disconnect(&PlayerId::from("alice"));
        assert!(!sessions.is_online(&PlayerId::from("alice")));
        queue.drain(&mut state);
        assert!(!state.views.is_registered(&PlayerId::from("alice")));
        assert!(state.open.is_empty());
    }
}
