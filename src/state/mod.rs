// Change notification
//
// Broadcasts PluginChange events to subscribers and tracks, per channel,
// whether the engine itself is currently writing so watch events caused by
// its own writes can be dropped.

use camino::Utf8PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Changes observed in the plugin directory or the persisted records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PluginChange {
    /// The load order changed outside this engine
    LoadOrderChanged,

    /// `plugins.txt` changed outside this engine
    ActivePluginsChanged,

    /// A plugin file appeared that the engine had not seen before
    ExternalPluginAdded { path: Utf8PathBuf },
}

impl PluginChange {
    /// The suppression channel this change belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            PluginChange::ActivePluginsChanged => Channel::ActivePlugins,
            PluginChange::LoadOrderChanged | PluginChange::ExternalPluginAdded { .. } => {
                Channel::LoadOrder
            }
        }
    }
}

/// Independent suppression channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    LoadOrder,
    ActivePlugins,
}

/// Self-write tracking for one channel.
#[derive(Debug, Default)]
struct Suppression {
    in_flight: AtomicUsize,
    /// Milliseconds since the notifier's epoch until which the channel stays quiet.
    quiet_until_ms: AtomicU64,
}

/// Broadcasts [`PluginChange`] events and suppresses the ones the engine caused.
///
/// # Usage
///
/// Wrap every engine-initiated write in [`begin_write`](Self::begin_write);
/// the returned guard keeps the channel suppressed until it is dropped and
/// for the settle window afterwards. Watch handlers then call
/// [`notify`](Self::notify), which drops the change if its channel is
/// suppressed.
#[derive(Debug)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<PluginChange>,
    epoch: Instant,
    settle_window: Duration,
    load_order: Suppression,
    active_plugins: Suppression,
}

impl ChangeNotifier {
    /// Create a notifier with a broadcast buffer of 100 events.
    pub fn new(settle_window: Duration) -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            tx,
            epoch: Instant::now(),
            settle_window,
            load_order: Suppression::default(),
            active_plugins: Suppression::default(),
        }
    }

    pub fn settle_window(&self) -> Duration {
        self.settle_window
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginChange> {
        self.tx.subscribe()
    }

    fn suppression(&self, channel: Channel) -> &Suppression {
        match channel {
            Channel::LoadOrder => &self.load_order,
            Channel::ActivePlugins => &self.active_plugins,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Mark `channel` busy until the returned guard drops.
    pub fn begin_write(&self, channel: Channel) -> WriteGuard<'_> {
        self.suppression(channel)
            .in_flight
            .fetch_add(1, Ordering::SeqCst);
        WriteGuard {
            notifier: self,
            channel,
        }
    }

    /// True while a write on `channel` is in flight or settling.
    pub fn is_suppressed(&self, channel: Channel) -> bool {
        let suppression = self.suppression(channel);
        suppression.in_flight.load(Ordering::SeqCst) > 0
            || self.now_ms() < suppression.quiet_until_ms.load(Ordering::SeqCst)
    }

    /// Broadcast `change` unless its channel is suppressed.
    ///
    /// # Returns
    /// `true` if the change was sent (whether or not anyone is listening).
    pub fn notify(&self, change: PluginChange) -> bool {
        if self.is_suppressed(change.channel()) {
            tracing::debug!("Suppressed {:?} during self-write", change);
            return false;
        }

        tracing::debug!("Emitting {:?}", change);
        // No subscribers is fine
        let _ = self.tx.send(change);
        true
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

/// Keeps a channel suppressed for as long as it lives.
#[must_use = "the channel is only suppressed while the guard is alive"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    notifier: &'a ChangeNotifier,
    channel: Channel,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let suppression = self.notifier.suppression(self.channel);
        let quiet_until = self.notifier.now_ms() + self.notifier.settle_window.as_millis() as u64;
        suppression
            .quiet_until_ms
            .fetch_max(quiet_until, Ordering::SeqCst);
        suppression.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_channels() {
        assert_eq!(PluginChange::LoadOrderChanged.channel(), Channel::LoadOrder);
        assert_eq!(
            PluginChange::ActivePluginsChanged.channel(),
            Channel::ActivePlugins
        );
        let added = PluginChange::ExternalPluginAdded {
            path: Utf8PathBuf::from("/data/New.esp"),
        };
        assert_eq!(added.channel(), Channel::LoadOrder);
    }

    #[test]
    fn test_guard_suppresses_only_its_channel() {
        let notifier = ChangeNotifier::new(Duration::ZERO);

        {
            let _guard = notifier.begin_write(Channel::LoadOrder);
            assert!(notifier.is_suppressed(Channel::LoadOrder));
            assert!(!notifier.is_suppressed(Channel::ActivePlugins));
            assert!(!notifier.notify(PluginChange::LoadOrderChanged));
            assert!(notifier.notify(PluginChange::ActivePluginsChanged));
        }

        assert!(!notifier.is_suppressed(Channel::LoadOrder));
        assert!(notifier.notify(PluginChange::LoadOrderChanged));
    }

    #[test]
    fn test_nested_guards() {
        let notifier = ChangeNotifier::new(Duration::ZERO);

        let outer = notifier.begin_write(Channel::ActivePlugins);
        let inner = notifier.begin_write(Channel::ActivePlugins);
        drop(inner);
        assert!(notifier.is_suppressed(Channel::ActivePlugins));
        drop(outer);
        assert!(!notifier.is_suppressed(Channel::ActivePlugins));
    }

    #[test]
    fn test_settle_window() {
        let notifier = ChangeNotifier::new(Duration::from_secs(60));

        drop(notifier.begin_write(Channel::LoadOrder));
        assert!(notifier.is_suppressed(Channel::LoadOrder));
    }

    #[test]
    fn test_settle_window_expires() {
        let notifier = ChangeNotifier::new(Duration::from_millis(20));

        drop(notifier.begin_write(Channel::LoadOrder));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!notifier.is_suppressed(Channel::LoadOrder));
    }

    #[tokio::test]
    async fn test_subscribers_receive_changes() {
        let notifier = ChangeNotifier::default();
        let mut rx = notifier.subscribe();

        assert!(notifier.notify(PluginChange::ActivePluginsChanged));
        assert_eq!(rx.recv().await.unwrap(), PluginChange::ActivePluginsChanged);
    }

    #[test]
    fn test_receivers_close_with_notifier() {
        let notifier = ChangeNotifier::default();
        let mut rx = notifier.subscribe();
        drop(notifier);

        let result = tokio_test::block_on(rx.recv());
        assert_eq!(result, Err(broadcast::error::RecvError::Closed));
    }
}
