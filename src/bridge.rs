use std::{io, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    discovery::DiscoveredDevice,
    error::BridgeError,
    gamepad::{CapabilitySet, GamepadSink},
    physical::{ControllerProvider, EventSource},
    translator::Translator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// How long the virtual gamepad is kept alive without its controller
    pub reconnect_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered(DiscoveredDevice),
    Grabbed,
    Active,
    Disconnected,
    WaitingReconnect { deadline: Instant },
    Terminated,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Discovered(_) => "discovered",
            ConnectionState::Grabbed => "grabbed",
            ConnectionState::Active => "active",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::WaitingReconnect { .. } => "waiting-reconnect",
            ConnectionState::Terminated => "terminated",
        }
    }
}

/// Moves events from the physical controller to the virtual gamepad and
/// keeps the virtual gamepad alive while the controller is away.
pub struct Bridge<P: ControllerProvider, G> {
    provider: P,
    settings: BridgeSettings,
    translator: Translator,
    cancel: CancellationToken,
    state: ConnectionState,
    source: Option<P::Source>,
    gamepad: Option<G>,
}

impl<P: ControllerProvider, G: GamepadSink> Bridge<P, G> {
    pub fn new(
        provider: P,
        device: DiscoveredDevice,
        translator: Translator,
        settings: BridgeSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            settings,
            translator,
            cancel,
            state: ConnectionState::Discovered(device),
            source: None,
            gamepad: None,
        }
    }

    /// Runs until cancelled or until a fatal condition.
    ///
    /// `create_gamepad` is called once, after the controller has been grabbed
    /// for the first time. Whatever the outcome, the controller is released
    /// and the virtual gamepad destroyed before returning.
    pub async fn run<F>(mut self, create_gamepad: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&CapabilitySet) -> Result<G, BridgeError>,
    {
        let result = self.drive(create_gamepad).await;
        self.shutdown();
        result
    }

    async fn drive<F>(&mut self, create_gamepad: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&CapabilitySet) -> Result<G, BridgeError>,
    {
        let mut create_gamepad = Some(create_gamepad);
        loop {
            let next = match self.state.clone() {
                ConnectionState::Discovered(device) => {
                    let source = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(()),
                        source = self.provider.acquire(&device) => source?,
                    };
                    self.source = Some(source);
                    for mismatch in device.range_mismatches(self.translator.table()) {
                        tracing::warn!(
                            "{:?} reports {:?} over [{}, {}], scaling assumes [{}, {}]",
                            device.path,
                            mismatch.axis,
                            mismatch.reported.min,
                            mismatch.reported.max,
                            mismatch.expected.min,
                            mismatch.expected.max
                        );
                    }
                    ConnectionState::Grabbed
                }
                ConnectionState::Grabbed => {
                    if let Some(create) = create_gamepad.take() {
                        let capabilities = CapabilitySet::from(self.translator.table());
                        self.gamepad = Some(create(&capabilities)?);
                    }
                    ConnectionState::Active
                }
                ConnectionState::Active => self.pump().await?,
                ConnectionState::Disconnected => {
                    if let Some(source) = self.source.take() {
                        source.release();
                    }
                    if let Some(gamepad) = self.gamepad.as_mut() {
                        self.translator
                            .neutral_frame(gamepad)
                            .map_err(BridgeError::VirtualDevice)?;
                    }
                    ConnectionState::WaitingReconnect {
                        deadline: Instant::now() + self.settings.reconnect_timeout,
                    }
                }
                ConnectionState::WaitingReconnect { deadline } => {
                    let wake = (Instant::now() + self.settings.poll_interval).min(deadline);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep_until(wake) => {}
                    }
                    match self.provider.discover() {
                        Ok(device) => {
                            tracing::info!("Controller is back at {:?}", device.path);
                            self.translator.reset();
                            ConnectionState::Discovered(device)
                        }
                        Err(e) if Instant::now() >= deadline => {
                            tracing::error!("Last attempt to find the controller failed: {e}");
                            return Err(BridgeError::ReconnectTimeout(
                                self.settings.reconnect_timeout,
                            ));
                        }
                        Err(e) => {
                            tracing::debug!("Controller not back yet: {e}");
                            ConnectionState::WaitingReconnect { deadline }
                        }
                    }
                }
                ConnectionState::Terminated => return Ok(()),
            };
            self.transition(next);
        }
    }

    /// Translates events until the controller goes away.
    async fn pump(&mut self) -> Result<ConnectionState, BridgeError> {
        let (Some(source), Some(gamepad)) = (self.source.as_mut(), self.gamepad.as_mut()) else {
            return Err(BridgeError::VirtualDevice(io::Error::other(
                "bridge became active without its devices",
            )));
        };
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(ConnectionState::Terminated),
                event = source.next_event() => event,
            };
            match event {
                Ok(event) => self
                    .translator
                    .feed(event, gamepad)
                    .map_err(BridgeError::VirtualDevice)?,
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                    tracing::warn!("Controller was unplugged");
                    return Ok(ConnectionState::Disconnected);
                }
                Err(e) => {
                    tracing::warn!("Reading the controller failed, treating it as gone: {e}");
                    return Ok(ConnectionState::Disconnected);
                }
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::info!("Connection {} -> {}", self.state.name(), next.name());
        }
        self.state = next;
    }

    fn shutdown(&mut self) {
        self.transition(ConnectionState::Terminated);
        if let Some(source) = self.source.take() {
            source.release();
        }
        if let Some(gamepad) = self.gamepad.take() {
            gamepad.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::{HashMap, VecDeque},
        path::PathBuf,
        rc::Rc,
    };

    use evdev::{AbsoluteAxisCode, EventType, InputEvent, KeyCode};

    use super::*;
    use crate::{
        discovery::DiscoveryError,
        error::{EXIT_ACQUISITION, EXIT_RECONNECT_TIMEOUT},
        filter::FilterSettings,
        mapping::MappingTable,
        testing::{Recorded, Recorder, abs, key, syn},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Discover(bool),
        Acquire(PathBuf),
        Release,
        Create,
        Frame(Vec<Recorded>),
        Destroy,
    }

    type Journal = Rc<RefCell<Vec<Call>>>;

    enum Step {
        Event(InputEvent),
        Unplug,
    }

    struct MockSource {
        journal: Journal,
        steps: VecDeque<Step>,
    }

    impl EventSource for MockSource {
        async fn next_event(&mut self) -> io::Result<InputEvent> {
            match self.steps.pop_front() {
                Some(Step::Event(event)) => Ok(event),
                Some(Step::Unplug) => Err(io::Error::from_raw_os_error(libc::ENODEV)),
                None => std::future::pending().await,
            }
        }

        fn release(self) {
            self.journal.borrow_mut().push(Call::Release);
        }
    }

    struct MockProvider {
        journal: Journal,
        /// One entry per discovery attempt while reconnecting
        rediscoveries: RefCell<VecDeque<bool>>,
        /// One event script per successful grab
        sessions: RefCell<VecDeque<Vec<Step>>>,
    }

    impl ControllerProvider for MockProvider {
        type Source = MockSource;

        fn discover(&self) -> Result<DiscoveredDevice, DiscoveryError> {
            let found = self.rediscoveries.borrow_mut().pop_front().unwrap_or(false);
            self.journal.borrow_mut().push(Call::Discover(found));
            if found {
                Ok(device())
            } else {
                Err(DiscoveryError::NotFound)
            }
        }

        async fn acquire(&self, device: &DiscoveredDevice) -> Result<MockSource, BridgeError> {
            let session = self.sessions.borrow_mut().pop_front();
            self.journal
                .borrow_mut()
                .push(Call::Acquire(device.path.clone()));
            match session {
                Some(steps) => Ok(MockSource {
                    journal: self.journal.clone(),
                    steps: steps.into(),
                }),
                None => Err(BridgeError::Acquisition {
                    path: device.path.clone(),
                    source: io::Error::from_raw_os_error(libc::EBUSY),
                }),
            }
        }
    }

    struct MockGamepad {
        journal: Journal,
        recorder: Recorder,
    }

    impl GamepadSink for MockGamepad {
        fn emit(&mut self, event: InputEvent) {
            self.recorder.emit(event);
        }

        fn flush(&mut self) -> io::Result<()> {
            self.recorder.flush()?;
            let frame = self.recorder.frames.pop().unwrap_or_default();
            self.journal.borrow_mut().push(Call::Frame(frame));
            Ok(())
        }

        fn destroy(self) {
            self.journal.borrow_mut().push(Call::Destroy);
        }
    }

    fn device() -> DiscoveredDevice {
        DiscoveredDevice {
            path: PathBuf::from("/dev/input/event4"),
            name: "Corsair SCUF Envision Pro Controller V2".to_string(),
            auxiliary: Vec::new(),
            axes: HashMap::new(),
        }
    }

    struct Harness {
        journal: Journal,
        cancel: CancellationToken,
        bridge: Bridge<MockProvider, MockGamepad>,
    }

    fn harness(
        sessions: Vec<Vec<Step>>,
        rediscoveries: Vec<bool>,
        reconnect_timeout: Duration,
        poll_interval: Duration,
    ) -> Harness {
        let journal = Journal::default();
        let cancel = CancellationToken::new();
        let provider = MockProvider {
            journal: journal.clone(),
            rediscoveries: RefCell::new(rediscoveries.into()),
            sessions: RefCell::new(sessions.into()),
        };
        let translator = Translator::new(
            MappingTable::builtin().unwrap(),
            FilterSettings::default(),
        );
        let bridge = Bridge::new(
            provider,
            device(),
            translator,
            BridgeSettings {
                reconnect_timeout,
                poll_interval,
            },
            cancel.clone(),
        );
        Harness {
            journal,
            cancel,
            bridge,
        }
    }

    fn gamepad_factory(
        journal: Journal,
    ) -> impl FnOnce(&CapabilitySet) -> Result<MockGamepad, BridgeError> {
        move |_capabilities| {
            journal.borrow_mut().push(Call::Create);
            Ok(MockGamepad {
                journal,
                recorder: Recorder::default(),
            })
        }
    }

    fn cancel_after(cancel: &CancellationToken, after: Duration) {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            cancel.cancel();
        });
    }

    fn neutral() -> Call {
        let mut translator = Translator::new(
            MappingTable::builtin().unwrap(),
            FilterSettings::default(),
        );
        let mut recorder = Recorder::default();
        translator.neutral_frame(&mut recorder).unwrap();
        Call::Frame(recorder.frames.remove(0))
    }

    fn count(journal: &Journal, call: &Call) -> usize {
        journal.borrow().iter().filter(|c| *c == call).count()
    }

    #[tokio::test(start_paused = true)]
    async fn button_press_is_one_event_and_one_boundary() {
        let h = harness(
            vec![vec![
                Step::Event(key(KeyCode::BTN_NORTH, 1)),
                Step::Event(syn()),
            ]],
            vec![],
            Duration::from_secs(60),
            Duration::from_secs(2),
        );
        cancel_after(&h.cancel, Duration::from_secs(1));

        h.bridge.run(gamepad_factory(h.journal.clone())).await.unwrap();

        assert_eq!(
            *h.journal.borrow(),
            vec![
                Call::Acquire(device().path),
                Call::Create,
                Call::Frame(vec![(EventType::KEY.0, KeyCode::BTN_WEST.0, 1)]),
                Call::Release,
                Call::Destroy,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unplug_keeps_the_gamepad_and_resets_filters_on_return() {
        let frame = || {
            vec![
                Step::Event(abs(AbsoluteAxisCode::ABS_Y, 20000)),
                Step::Event(syn()),
            ]
        };
        let mut first = frame();
        first.push(Step::Unplug);
        let h = harness(
            vec![first, frame()],
            vec![false, true],
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        cancel_after(&h.cancel, Duration::from_secs(30));

        h.bridge.run(gamepad_factory(h.journal.clone())).await.unwrap();

        let journal = h.journal.borrow().clone();
        let Some(Call::Frame(emitted)) = journal.get(2).cloned() else {
            panic!("no frame before the unplug: {journal:?}");
        };
        assert_eq!(
            journal,
            vec![
                Call::Acquire(device().path),
                Call::Create,
                Call::Frame(emitted.clone()),
                Call::Release,
                neutral(),
                Call::Discover(false),
                Call::Discover(true),
                Call::Acquire(device().path),
                Call::Frame(emitted),
                Call::Release,
                Call::Destroy,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_the_controller_stays_away() {
        let h = harness(
            vec![vec![Step::Unplug]],
            vec![],
            Duration::from_secs(10),
            Duration::from_secs(3),
        );
        let started = Instant::now();

        let err = h.bridge.run(gamepad_factory(h.journal.clone())).await.unwrap_err();

        assert!(matches!(err, BridgeError::ReconnectTimeout(t) if t == Duration::from_secs(10)));
        assert_eq!(err.exit_code(), EXIT_RECONNECT_TIMEOUT);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        // attempts at 3s, 6s, 9s and at the deadline
        assert_eq!(count(&h.journal, &Call::Discover(false)), 4);
        assert_eq!(count(&h.journal, &Call::Create), 1);
        assert_eq!(count(&h.journal, &neutral()), 1);
        assert_eq!(count(&h.journal, &Call::Destroy), 1);
        assert_eq!(h.journal.borrow().last(), Some(&Call::Destroy));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_destroys_the_gamepad() {
        let h = harness(
            vec![vec![Step::Unplug]],
            vec![],
            Duration::from_secs(60),
            Duration::from_secs(2),
        );
        cancel_after(&h.cancel, Duration::from_secs(5));

        h.bridge.run(gamepad_factory(h.journal.clone())).await.unwrap();

        assert_eq!(
            *h.journal.borrow(),
            vec![
                Call::Acquire(device().path),
                Call::Create,
                Call::Release,
                neutral(),
                Call::Discover(false),
                Call::Discover(false),
                Call::Destroy,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_grab_is_fatal() {
        let h = harness(vec![], vec![], Duration::from_secs(60), Duration::from_secs(2));

        let err = h.bridge.run(gamepad_factory(h.journal.clone())).await.unwrap_err();

        assert_eq!(err.exit_code(), EXIT_ACQUISITION);
        assert_eq!(*h.journal.borrow(), vec![Call::Acquire(device().path)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_gamepad_creation_releases_the_controller() {
        let h = harness(
            vec![vec![Step::Event(syn())]],
            vec![],
            Duration::from_secs(60),
            Duration::from_secs(2),
        );

        let err = h
            .bridge
            .run(|_: &CapabilitySet| -> Result<MockGamepad, BridgeError> {
                Err(BridgeError::VirtualDevice(io::Error::from(
                    io::ErrorKind::PermissionDenied,
                )))
            })
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), EXIT_ACQUISITION);
        assert_eq!(
            *h.journal.borrow(),
            vec![Call::Acquire(device().path), Call::Release]
        );
    }
}
