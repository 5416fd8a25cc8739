use tokio::sync::watch;

use crate::peer::types::CallFlags;

// ========== OBSERVABLE CALL STATE ==========

/// Owner of the UI flags of one call attempt. Observers get a
/// [`watch::Receiver`] and see every committed change.
#[derive(Debug)]
pub struct FlagState {
    tx: watch::Sender<CallFlags>,
}

impl Default for FlagState {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CallFlags::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<CallFlags> {
        self.tx.subscribe()
    }

    pub fn get(&self) -> CallFlags {
        self.tx.borrow().clone()
    }

    /// Applies `f`; observers are woken only if a field actually changed.
    pub fn update(&self, f: impl FnOnce(&mut CallFlags)) -> bool {
        self.tx.send_if_modified(|flags| {
            let before = flags.clone();
            f(flags);
            *flags != before
        })
    }

    /// Back to the values of a fresh call screen.
    pub fn reset(&self) -> bool {
        self.update(|flags| *flags = CallFlags::default())
    }

    pub fn clear_remote_video(&self) -> bool {
        self.update(|flags| {
            flags.remote_video_present = false;
            flags.remote_video_enabled = false;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::Orientation;

    #[test]
    fn update_notifies_only_on_change() {
        let state = FlagState::new();
        let rx = state.subscribe();

        assert!(!state.update(|f| f.local_audio_enabled = true));
        assert!(!rx.has_changed().unwrap());

        assert!(state.update(|f| f.remote_orientation = Orientation::Portrait));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn reset_restores_defaults() {
        let state = FlagState::new();
        state.update(|f| {
            f.remote_video_present = true;
            f.local_audio_enabled = false;
        });
        assert!(state.reset());
        assert_eq!(state.get(), CallFlags::default());
    }
}
