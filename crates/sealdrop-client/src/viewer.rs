//! Image viewer with focus-loss blur and an optional self-destruct countdown.
//!
//! Two timers compose:
//! - the countdown ticks once per `tick` from the ephemeral window and forces
//!   a close at zero; it cannot be paused;
//! - the blur guard hides the image on every hide signal and only unhides it
//!   `grace` after the last show signal, so focus flicker never exposes a frame.
//!
//! Controls are folded into a [`watch`] board of counters rather than queued,
//! so a burst of input can coalesce but never drop a hide or a close.
//!
//! The viewer task owns the decrypted image. Whatever ends it (close, countdown,
//! handle drop, abort) drops the [`ViewerScope`], which clears the surface and
//! zeroizes the image.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::debug;
use zeroize::Zeroizing;

use sealdrop_core::config::ViewerConfig;

/// Where the image is drawn. Implementations must not retain the bytes
/// passed to [`Surface::paint`] beyond what [`Surface::clear`] releases.
pub trait Surface: Send + 'static {
    fn paint(&mut self, image: &[u8], zoomed: bool);
    fn blur(&mut self);
    fn countdown(&mut self, remaining: u32);
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerControl {
    Hide,
    Show,
    ToggleZoom,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UserClosed,
    /// Countdown reached zero.
    Expired,
    /// Every control sender went away.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewerState {
    pub hidden: bool,
    pub zoomed: bool,
    /// Seconds left; `None` for non-ephemeral images.
    pub remaining: Option<u32>,
    pub closed: Option<CloseReason>,
}

/// Clock-free hide/unhide logic. Callers supply `now`.
#[derive(Debug, Clone)]
pub struct BlurGuard {
    hidden: bool,
    unblur_at: Option<Instant>,
    grace: Duration,
}

impl BlurGuard {
    pub fn new(grace: Duration) -> Self {
        Self {
            hidden: false,
            unblur_at: None,
            grace,
        }
    }

    /// Hide immediately and cancel any pending unblur.
    pub fn on_hide(&mut self) {
        self.hidden = true;
        self.unblur_at = None;
    }

    /// Schedule an unblur `grace` from now. A later show pushes it back.
    pub fn on_show(&mut self, now: Instant) {
        if self.hidden {
            self.unblur_at = Some(now + self.grace);
        }
    }

    /// Apply a due unblur. Returns true when the image just became visible.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.unblur_at {
            Some(at) if at <= now => {
                self.hidden = false;
                self.unblur_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.unblur_at
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    remaining: u32,
}

impl Countdown {
    pub fn new(seconds: u32) -> Self {
        Self { remaining: seconds }
    }

    pub fn tick(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

/// Resources released on every exit path of the viewer task.
struct ViewerScope {
    surface: Box<dyn Surface>,
    image: Zeroizing<Vec<u8>>,
}

impl Drop for ViewerScope {
    fn drop(&mut self) {
        self.surface.clear();
        // Zeroizing wipes the buffer when the field drops
        debug!(bytes = self.image.len(), "viewer scope released");
    }
}

/// Every control ever sent, as counters. The viewer compares against the last
/// board it saw, so it only needs the latest value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Signals {
    hides: u64,
    shows: u64,
    zooms: u64,
    /// Whether the most recent focus signal was a show.
    focused: bool,
    close: bool,
}

impl Signals {
    fn initial() -> Self {
        Self {
            focused: true,
            ..Default::default()
        }
    }

    fn apply(&mut self, control: ViewerControl) {
        match control {
            ViewerControl::Hide => {
                self.hides += 1;
                self.focused = false;
            }
            ViewerControl::Show => {
                self.shows += 1;
                self.focused = true;
            }
            ViewerControl::ToggleZoom => self.zooms += 1,
            ViewerControl::Close => self.close = true,
        }
    }
}

/// Cloneable sender side, usable from blocking input threads. Sending never
/// blocks and never loses a control while the viewer is alive.
#[derive(Clone)]
pub struct ViewerController {
    signals: Arc<watch::Sender<Signals>>,
}

impl ViewerController {
    /// Returns false once the viewer is gone.
    pub fn send(&self, control: ViewerControl) -> bool {
        if self.signals.is_closed() {
            return false;
        }
        self.signals.send_modify(|s| s.apply(control));
        true
    }

    pub fn is_closed(&self) -> bool {
        self.signals.is_closed()
    }
}

/// Owner handle. Dropping it aborts the viewer task.
pub struct ViewerHandle {
    controller: ViewerController,
    state: watch::Receiver<ViewerState>,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    pub fn controller(&self) -> ViewerController {
        self.controller.clone()
    }

    pub fn send(&self, control: ViewerControl) -> bool {
        self.controller.send(control)
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerState> {
        self.state.clone()
    }

    pub fn state(&self) -> ViewerState {
        self.state.borrow().clone()
    }

    /// Wait until the viewer closes, for whatever reason.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.state.clone();
        let outcome = rx.wait_for(|s| s.closed.is_some()).await;
        match outcome {
            Ok(state) => state.closed.unwrap_or(CloseReason::Dropped),
            Err(_) => CloseReason::Dropped,
        }
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct EphemeralViewer;

impl EphemeralViewer {
    /// Start a viewer task. `ephemeral_seconds == None` disables the countdown.
    pub fn spawn(
        image: Zeroizing<Vec<u8>>,
        ephemeral_seconds: Option<u32>,
        config: &ViewerConfig,
        surface: Box<dyn Surface>,
    ) -> ViewerHandle {
        let (signals_tx, signals_rx) = watch::channel(Signals::initial());
        let initial = ViewerState {
            remaining: ephemeral_seconds,
            ..Default::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);

        let scope = ViewerScope { surface, image };
        let tick = Duration::from_millis(config.tick_ms.max(1));
        let grace = Duration::from_millis(config.unblur_grace_ms);
        let task = tokio::spawn(run(scope, signals_rx, state_tx, ephemeral_seconds, tick, grace));

        ViewerHandle {
            controller: ViewerController {
                signals: Arc::new(signals_tx),
            },
            state: state_rx,
            task,
        }
    }
}

async fn run(
    mut scope: ViewerScope,
    mut signals: watch::Receiver<Signals>,
    state_tx: watch::Sender<ViewerState>,
    ephemeral_seconds: Option<u32>,
    tick: Duration,
    grace: Duration,
) {
    let mut guard = BlurGuard::new(grace);
    let mut countdown = ephemeral_seconds.map(Countdown::new);
    let mut zoomed = false;
    let mut ticker = interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seen = Signals::initial();

    scope.surface.paint(&scope.image, zoomed);
    if let Some(cd) = &countdown {
        scope.surface.countdown(cd.remaining());
    }

    let reason = loop {
        let unblur_at = guard.deadline();

        tokio::select! {
            changed = signals.changed() => {
                if changed.is_err() {
                    break CloseReason::Dropped;
                }
                let latest = *signals.borrow_and_update();
                if latest.close {
                    break CloseReason::UserClosed;
                }
                if latest.hides != seen.hides {
                    let was_hidden = guard.is_hidden();
                    guard.on_hide();
                    if !was_hidden {
                        scope.surface.blur();
                    }
                }
                if latest.focused && latest.shows != seen.shows {
                    guard.on_show(Instant::now());
                }
                if latest.zooms.wrapping_sub(seen.zooms) % 2 == 1 {
                    zoomed = !zoomed;
                    if !guard.is_hidden() {
                        scope.surface.paint(&scope.image, zoomed);
                    }
                }
                seen = latest;
            },
            _ = ticker.tick(), if countdown.is_some() => {
                if let Some(cd) = countdown.as_mut() {
                    let remaining = cd.tick();
                    scope.surface.countdown(remaining);
                    if cd.is_done() {
                        break CloseReason::Expired;
                    }
                }
            },
            _ = sleep_until(unblur_at.unwrap_or_else(Instant::now)), if unblur_at.is_some() => {
                if guard.poll(Instant::now()) {
                    scope.surface.paint(&scope.image, zoomed);
                }
            },
        }

        state_tx.send_replace(ViewerState {
            hidden: guard.is_hidden(),
            zoomed,
            remaining: countdown.map(|cd| cd.remaining()),
            closed: None,
        });
    };

    debug!(?reason, "viewer closing");
    drop(scope);
    state_tx.send_replace(ViewerState {
        hidden: true,
        zoomed,
        remaining: countdown.map(|cd| cd.remaining()),
        closed: Some(reason),
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Painted {
        Image { len: usize, zoomed: bool },
        Blur,
        Countdown(u32),
        Clear,
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingSurface {
        pub events: Arc<Mutex<Vec<Painted>>>,
    }

    impl RecordingSurface {
        pub(crate) fn events(&self) -> Vec<Painted> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Surface for RecordingSurface {
        fn paint(&mut self, image: &[u8], zoomed: bool) {
            self.events.lock().unwrap().push(Painted::Image {
                len: image.len(),
                zoomed,
            });
        }
        fn blur(&mut self) {
            self.events.lock().unwrap().push(Painted::Blur);
        }
        fn countdown(&mut self, remaining: u32) {
            self.events.lock().unwrap().push(Painted::Countdown(remaining));
        }
        fn clear(&mut self) {
            self.events.lock().unwrap().push(Painted::Clear);
        }
    }

    fn config() -> ViewerConfig {
        ViewerConfig {
            unblur_grace_ms: 1500,
            tick_ms: 1000,
        }
    }

    fn image() -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![7u8; 64])
    }

    #[test]
    fn test_blur_guard_core() {
        let t0 = Instant::now();
        let grace = Duration::from_millis(1500);
        let mut guard = BlurGuard::new(grace);
        assert!(!guard.is_hidden());

        // show while visible is a no-op
        guard.on_show(t0);
        assert_eq!(guard.deadline(), None);

        guard.on_hide();
        guard.on_show(t0);
        assert!(!guard.poll(t0 + Duration::from_millis(1499)));
        assert!(guard.is_hidden());
        assert!(guard.poll(t0 + grace));
        assert!(!guard.is_hidden());

        // hide inside the grace window cancels the pending unblur
        guard.on_hide();
        guard.on_show(t0);
        guard.on_hide();
        assert_eq!(guard.deadline(), None);
        assert!(!guard.poll(t0 + Duration::from_secs(10)));
        assert!(guard.is_hidden());
    }

    #[test]
    fn test_countdown_core() {
        let mut cd = Countdown::new(2);
        assert_eq!(cd.tick(), 1);
        assert_eq!(cd.tick(), 0);
        assert!(cd.is_done());
        assert_eq!(cd.tick(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ephemeral_viewer_closes_after_countdown() {
        let surface = RecordingSurface::default();
        let start = Instant::now();
        let handle = EphemeralViewer::spawn(image(), Some(3), &config(), Box::new(surface.clone()));

        assert_eq!(handle.closed().await, CloseReason::Expired);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));

        let countdowns: Vec<u32> = surface
            .events()
            .iter()
            .filter_map(|e| match e {
                Painted::Countdown(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![3, 2, 1, 0]);
        assert_eq!(surface.events().last(), Some(&Painted::Clear));
        assert!(handle.state().hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_waits_for_grace_period() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), None, &config(), Box::new(surface.clone()));
        let mut rx = handle.subscribe();

        assert!(handle.send(ViewerControl::Hide));
        rx.wait_for(|s| s.hidden).await.unwrap();
        assert!(handle.send(ViewerControl::Show));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(handle.state().hidden, "must stay blurred inside the grace period");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!handle.state().hidden);
        assert_eq!(
            surface.events().last(),
            Some(&Painted::Image {
                len: 64,
                zoomed: false
            })
        );
        assert_eq!(handle.state().remaining, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_during_grace_cancels_unblur() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), None, &config(), Box::new(surface.clone()));
        let mut rx = handle.subscribe();

        handle.send(ViewerControl::Hide);
        rx.wait_for(|s| s.hidden).await.unwrap();
        handle.send(ViewerControl::Show);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.send(ViewerControl::Hide);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(handle.state().hidden);

        let paints = surface
            .events()
            .iter()
            .filter(|e| matches!(e, Painted::Image { .. }))
            .count();
        assert_eq!(paints, 1, "only the initial paint may happen");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_show_restarts_grace() {
        let handle =
            EphemeralViewer::spawn(image(), None, &config(), Box::new(RecordingSurface::default()));
        let mut rx = handle.subscribe();

        handle.send(ViewerControl::Hide);
        rx.wait_for(|s| s.hidden).await.unwrap();
        handle.send(ViewerControl::Show);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.send(ViewerControl::Show);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(handle.state().hidden);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!handle.state().hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zoom_repaints_only_when_visible() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), None, &config(), Box::new(surface.clone()));
        let mut rx = handle.subscribe();

        handle.send(ViewerControl::ToggleZoom);
        rx.wait_for(|s| s.zoomed).await.unwrap();
        assert_eq!(
            surface.events().last(),
            Some(&Painted::Image {
                len: 64,
                zoomed: true
            })
        );

        handle.send(ViewerControl::Hide);
        rx.wait_for(|s| s.hidden).await.unwrap();
        handle.send(ViewerControl::ToggleZoom);
        rx.wait_for(|s| !s.zoomed).await.unwrap();
        assert_eq!(surface.events().last(), Some(&Painted::Blur));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_survives_input_burst() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), Some(60), &config(), Box::new(surface.clone()));

        for _ in 0..40 {
            assert!(handle.send(ViewerControl::ToggleZoom));
        }
        assert!(handle.send(ViewerControl::Hide));
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.hidden).await.unwrap();
        assert!(surface.events().contains(&Painted::Blur));
        // an even number of toggles nets out
        assert!(!handle.state().zoomed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_then_show_between_polls_still_blurs() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), None, &config(), Box::new(surface.clone()));

        // both land before the viewer task runs again
        handle.send(ViewerControl::Hide);
        handle.send(ViewerControl::Show);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.state().hidden);
        assert!(surface.events().contains(&Painted::Blur));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!handle.state().hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_never_lost_behind_other_input() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), Some(60), &config(), Box::new(surface.clone()));
        let controller = handle.controller();

        for _ in 0..100 {
            controller.send(ViewerControl::ToggleZoom);
        }
        assert!(controller.send(ViewerControl::Close));
        assert_eq!(handle.closed().await, CloseReason::UserClosed);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(controller.is_closed());
        assert!(!controller.send(ViewerControl::Hide));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_does_not_burst_after_stall() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), Some(10), &config(), Box::new(surface.clone()));
        let mut rx = handle.subscribe();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        // stall the runtime clock past several ticks before the viewer runs
        tokio::time::advance(Duration::from_millis(3500)).await;
        rx.wait_for(|s| s.remaining.is_some_and(|r| r < 10)).await.unwrap();
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.state().remaining, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_tears_down_once() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), Some(60), &config(), Box::new(surface.clone()));

        handle.send(ViewerControl::Close);
        assert_eq!(handle.closed().await, CloseReason::UserClosed);
        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let clears = surface
            .events()
            .iter()
            .filter(|e| **e == Painted::Clear)
            .count();
        assert_eq!(clears, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_tears_down() {
        let surface = RecordingSurface::default();
        let handle = EphemeralViewer::spawn(image(), Some(60), &config(), Box::new(surface.clone()));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(surface.events().last(), Some(&Painted::Clear));
    }
}
