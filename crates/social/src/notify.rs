use camarade_storage::PlayerId;

/// User-facing event raised by the engine toward a connected session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocialNotice {
    RequestReceived { from: PlayerId, message: String },
    FriendAdded { friend: PlayerId },
}

/// Delivery seam toward the session layer. The engine only talks to sessions
/// through this trait; the embedding server decides how a notice reaches the
/// player (chat line, toast, sound).
pub trait Notifier: Send + Sync {
    fn is_online(&self, player: &PlayerId) -> bool;

    fn notify(&self, player: &PlayerId, notice: SocialNotice);
}

/// Notifier that drops everything. Useful for batch tooling and tests that
/// do not care about session side effects.
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn is_online(&self, _player: &PlayerId) -> bool {
        false
    }

    fn notify(&self, _player: &PlayerId, _notice: SocialNotice) {}
}
