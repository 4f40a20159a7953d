//! IP-T session state machine (C3, spec §4.3).
//!
//! A pure state machine: no I/O, no clock of its own. Methods take the
//! current time as a parameter and return the actions the driver should
//! perform, the same action-returning style as the teacher's
//! `Connection<I>` (`handle_hello`/`handle_frame`/`tick` all return
//! `Vec<_Action>` rather than doing I/O themselves).
//!
//! ```text
//! Authenticating ──login──> Authenticated ──open_connection──> ConnectedLocal/Remote
//!       │                        │                                    │
//!       └──login failure─────────┴──protocol violation/close──────────┴──> Shutdown
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use smf_proto::ipt::command::{self, is_request};
use smf_proto::ipt::{Frame, IptBody, SimpleResult};

use crate::env::Environment;
use crate::error::SessionError;

/// Default watchdog window (spec §4.3/§5): overrides the teacher's 60s
/// idle timeout, which was sized for human-paced chat traffic rather
/// than a metering line.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(15);

/// Session lifecycle state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state: only a login request/response is permitted.
    Authenticating,
    /// Logged in, no virtual connection up.
    Authenticated,
    /// A virtual connection this session originated is up.
    ConnectedLocal,
    /// A virtual connection originated by the peer is up.
    ConnectedRemote,
    /// No I/O, sockets closed, tasks cancelled.
    Shutdown,
}

/// Tunable timing for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Peer-inactivity timer; exceeding it tears the session down.
    pub watchdog_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT }
    }
}

/// When a freshly negotiated scramble key takes effect relative to frame
/// I/O (spec §4.3's correctness invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInstallTiming {
    /// Install before the next frame this side emits.
    BeforeNextEmit,
    /// Install only once the current frame has been fully dispatched.
    AfterDispatch,
}

/// Actions the driver executes on behalf of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Serialize and send this frame to the peer.
    SendFrame(Frame),
    /// Rotate the transport-level scramble key at the given timing.
    InstallScrambleKey {
        /// The new 32-byte key.
        key: [u8; 32],
        /// When the driver must switch the wire codec over to it.
        timing: KeyInstallTiming,
    },
    /// Close the connection with this reason.
    Close {
        /// Human-readable reason, for the operator log.
        reason: String,
    },
}

/// Per-peer IP-T session state machine.
///
/// Generic over [`Environment::Instant`] so it can run against real or
/// simulated time without depending on the rest of the `Environment`
/// trait (the session itself never needs randomness — sequence
/// allocation is deterministic).
pub struct IptSession<E: Environment> {
    state: SessionState,
    config: SessionConfig,
    last_activity: E::Instant,
    next_sequence: u8,
    pending: HashMap<u8, u16>,
    open_channels: std::collections::HashSet<u32>,
}

impl<E: Environment> IptSession<E> {
    /// Builds a new session in [`SessionState::Authenticating`].
    #[must_use]
    pub fn new(now: E::Instant, config: SessionConfig) -> Self {
        Self {
            state: SessionState::Authenticating,
            config,
            last_activity: now,
            next_sequence: 1,
            pending: HashMap::new(),
            open_channels: std::collections::HashSet::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Allocates the next sequence number: monotone, wraps at `0xFF`
    /// skipping `0` (spec §4.3).
    fn next_seq(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = if self.next_sequence == 0xFF { 1 } else { self.next_sequence + 1 };
        seq
    }

    fn send(&mut self, body: IptBody) -> Result<SessionAction, SessionError> {
        let seq = self.next_seq();
        self.pending.insert(seq, body.command());
        let frame = Frame::new(body.command(), seq, body.encode())?;
        Ok(SessionAction::SendFrame(frame))
    }

    fn require_state(&self, expected: SessionState, operation: &str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation: operation.to_string() })
        }
    }

    /// Sends a login request. `scrambled` selects the scrambled or
    /// cleartext variant of the command pair (spec §4.3, §8 scenario 1).
    pub fn login(
        &mut self,
        account: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_state(SessionState::Authenticating, "login")?;
        let body = IptBody::LoginRequest { account: account.into(), password: password.into() };
        Ok(vec![self.send(body)?])
    }

    /// Opens a push channel to `target` (spec §4.3, §8 scenario 2).
    #[allow(clippy::too_many_arguments)]
    pub fn open_push_channel(
        &mut self,
        target: impl Into<String>,
        account: impl Into<String>,
        msisdn: impl Into<String>,
        version: impl Into<String>,
        device_id: impl Into<String>,
        timeout_secs: u16,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_state(SessionState::Authenticated, "open_push_channel")?;
        let body = IptBody::OpenPushChannel {
            target: target.into(),
            account: account.into(),
            msisdn: msisdn.into(),
            version: version.into(),
            device_id: device_id.into(),
            timeout_secs,
        };
        Ok(vec![self.send(body)?])
    }

    /// Closes a previously opened push channel. Idempotent per spec §4.4
    /// at the push-channel-manager layer; at the session layer this just
    /// emits the request.
    pub fn close_push_channel(&mut self, channel_id: u32) -> Result<Vec<SessionAction>, SessionError> {
        self.require_state(SessionState::Authenticated, "close_push_channel")?;
        Ok(vec![self.send(IptBody::ClosePushChannel { channel_id })?])
    }

    /// Transfers one block of readout data over an open push channel.
    pub fn transfer_push_data(
        &mut self,
        channel_id: u32,
        status: u8,
        block: u8,
        payload: Bytes,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_state(SessionState::Authenticated, "transfer_push_data")?;
        if !self.open_channels.contains(&channel_id) {
            return Err(SessionError::ResourceNotFound(format!("push channel {channel_id}")));
        }
        Ok(vec![self.send(IptBody::TransferPushData { channel_id, status, block, payload })?])
    }

    /// Registers this session as a push target.
    pub fn register_target(
        &mut self,
        name: impl Into<String>,
        packet_size: u16,
        window_size: u8,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_state(SessionState::Authenticated, "register_target")?;
        Ok(vec![self.send(IptBody::RegisterTarget { name: name.into(), packet_size, window_size })?])
    }

    /// Opens a virtual connection to a peer identified by `msisdn`.
    pub fn open_connection(&mut self, msisdn: impl Into<String>) -> Result<Vec<SessionAction>, SessionError> {
        self.require_state(SessionState::Authenticated, "open_connection")?;
        Ok(vec![self.send(IptBody::OpenConnection { msisdn: msisdn.into() })?])
    }

    /// Closes the current virtual connection.
    pub fn close_connection(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::ConnectedLocal && self.state != SessionState::ConnectedRemote {
            return Err(SessionError::InvalidState { state: self.state, operation: "close_connection".into() });
        }
        Ok(vec![self.send(IptBody::CloseConnection)?])
    }

    /// Records that a fresh scramble key has been negotiated and this
    /// side is the one that received the negotiating frame: per spec
    /// §4.3 the key is installed only after the current frame has been
    /// dispatched to upper layers, never mid-frame.
    #[must_use]
    pub const fn rotate_scramble_key_after_receive(key: [u8; 32]) -> SessionAction {
        SessionAction::InstallScrambleKey { key, timing: KeyInstallTiming::AfterDispatch }
    }

    /// The sender-side counterpart: the new key takes effect before the
    /// next frame this side emits.
    #[must_use]
    pub const fn rotate_scramble_key_before_send(key: [u8; 32]) -> SessionAction {
        SessionAction::InstallScrambleKey { key, timing: KeyInstallTiming::BeforeNextEmit }
    }

    /// Sends a watchdog keepalive and resets the peer-inactivity timer.
    pub fn watchdog(&mut self, now: E::Instant) -> Result<Vec<SessionAction>, SessionError> {
        self.last_activity = now;
        Ok(vec![self.send(IptBody::Watchdog)?])
    }

    /// Elapsed time since the last inbound activity, if it exceeds the
    /// configured watchdog window. `None` while the session is healthy or
    /// past needing a watchdog (shutdown).
    #[must_use]
    pub fn check_watchdog(&self, now: E::Instant) -> Option<Duration> {
        if matches!(self.state, SessionState::Shutdown) {
            return None;
        }
        let elapsed = now - self.last_activity;
        (elapsed > self.config.watchdog_timeout).then_some(elapsed)
    }

    /// Periodic maintenance: detects watchdog timeout and tears the
    /// session down if exceeded.
    pub fn tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        if let Some(elapsed) = self.check_watchdog(now) {
            self.state = SessionState::Shutdown;
            return vec![SessionAction::Close { reason: format!("watchdog timeout after {elapsed:?}") }];
        }
        Vec::new()
    }

    /// Processes an inbound frame, updating state and returning the
    /// actions the driver should take.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ProtocolViolation`] for a command not
    /// valid in the current state, and [`SessionError::FrameError`] if
    /// the body fails to decode. Both are fatal — the caller should
    /// follow up with [`SessionAction::Close`] (already included in the
    /// happy-path-adjacent error cases below where spec §7 calls for it).
    pub fn handle_frame(&mut self, frame: &Frame, now: E::Instant) -> Result<Vec<SessionAction>, SessionError> {
        self.last_activity = now;

        if !is_request(frame.command()) {
            // Response: must match a pending request, else log-and-discard (spec §4.3).
            let Some(expected_command) = self.pending.remove(&frame.sequence()) else {
                return Ok(Vec::new());
            };
            if command::response_for(expected_command) != frame.command() {
                return Ok(Vec::new());
            }
        }

        let body = IptBody::decode(frame.command(), frame.body().clone())?;
        self.dispatch(body, frame.command())
    }

    fn dispatch(&mut self, body: IptBody, command: u16) -> Result<Vec<SessionAction>, SessionError> {
        match (self.state, body) {
            (SessionState::Authenticating, IptBody::LoginResponse { result, .. }) => {
                if result.is_success() {
                    self.state = SessionState::Authenticated;
                    Ok(Vec::new())
                } else {
                    self.state = SessionState::Shutdown;
                    Err(SessionError::AuthError(format!("{result:?}")))
                }
            }

            (SessionState::Authenticated, IptBody::OpenPushChannelResponse { result, channel_id, .. }) => {
                if result.is_success() {
                    self.open_channels.insert(channel_id);
                }
                Ok(Vec::new())
            }

            (SessionState::Authenticated, IptBody::ClosePushChannelResponse { channel_id, .. }) => {
                self.open_channels.remove(&channel_id);
                Ok(Vec::new())
            }

            (
                SessionState::Authenticated,
                IptBody::RegisterTargetResponse { .. } | IptBody::TransferPushDataResponse { .. },
            ) => Ok(Vec::new()),

            (SessionState::Authenticated, IptBody::OpenConnectionResponse { result }) => {
                if result.is_success() {
                    self.state = SessionState::ConnectedLocal;
                }
                Ok(Vec::new())
            }

            (SessionState::ConnectedLocal | SessionState::ConnectedRemote, IptBody::CloseConnectionResponse { .. }) => {
                self.state = SessionState::Authenticated;
                Ok(Vec::new())
            }

            (_, IptBody::Watchdog) => Ok(vec![self.send(IptBody::WatchdogResponse)?]),
            (_, IptBody::WatchdogResponse) => Ok(Vec::new()),

            (state, IptBody::Logout) if state != SessionState::Shutdown => {
                self.state = SessionState::Shutdown;
                Ok(vec![
                    self.send(IptBody::LogoutResponse { result: SimpleResult::Success })?,
                    SessionAction::Close { reason: "peer logout".to_string() },
                ])
            }

            (state, _) => {
                self.state = SessionState::Shutdown;
                Err(SessionError::ProtocolViolation { state, command })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use smf_proto::ipt::command;
    use smf_proto::ipt::{LoginResult, OpenPushChannelResult};

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;
        fn now(&self) -> Instant {
            Instant::now()
        }
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }
        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, b) in buffer.iter_mut().enumerate() {
                *b = i as u8;
            }
        }
    }

    fn login_response(seq: u8, result: LoginResult) -> Frame {
        let body = IptBody::LoginResponse { result, watchdog_secs: 15 };
        Frame::new(command::CTRL_RES_LOGIN_SCRAMBLED, seq, body.encode()).unwrap()
    }

    #[test]
    fn successful_login_transitions_to_authenticated() {
        let t0 = Instant::now();
        let mut session: IptSession<TestEnv> = IptSession::new(t0, SessionConfig::default());
        let actions = session.login("acct", "pwd").unwrap();
        assert_eq!(actions.len(), 1);
        let SessionAction::SendFrame(frame) = &actions[0] else { panic!("expected SendFrame") };
        let seq = frame.sequence();

        let reply = login_response(seq, LoginResult::Success);
        session.handle_frame(&reply, t0).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn failed_login_shuts_down() {
        let t0 = Instant::now();
        let mut session: IptSession<TestEnv> = IptSession::new(t0, SessionConfig::default());
        let actions = session.login("acct", "wrong").unwrap();
        let SessionAction::SendFrame(frame) = &actions[0] else { panic!("expected SendFrame") };
        let seq = frame.sequence();

        let reply = login_response(seq, LoginResult::WrongPassword);
        let err = session.handle_frame(&reply, t0).unwrap_err();
        assert!(matches!(err, SessionError::AuthError(_)));
        assert_eq!(session.state(), SessionState::Shutdown);
    }

    #[test]
    fn login_rejected_outside_authenticating_state() {
        let t0 = Instant::now();
        let mut session: IptSession<TestEnv> = IptSession::new(t0, SessionConfig::default());
        let actions = session.login("acct", "pwd").unwrap();
        let SessionAction::SendFrame(frame) = &actions[0] else { panic!("expected SendFrame") };
        session.handle_frame(&login_response(frame.sequence(), LoginResult::Success), t0).unwrap();

        let err = session.login("acct", "pwd").unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[test]
    fn watchdog_timeout_closes_session() {
        let t0 = Instant::now();
        let config = SessionConfig { watchdog_timeout: Duration::from_secs(15) };
        let mut session: IptSession<TestEnv> = IptSession::new(t0, config);
        let actions = session.login("acct", "pwd").unwrap();
        let SessionAction::SendFrame(frame) = &actions[0] else { panic!("expected SendFrame") };
        session.handle_frame(&login_response(frame.sequence(), LoginResult::Success), t0).unwrap();

        let t1 = t0 + Duration::from_secs(16);
        let actions = session.tick(t1);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Close { .. }));
        assert_eq!(session.state(), SessionState::Shutdown);
    }

    #[test]
    fn unmatched_response_is_discarded_not_fatal() {
        let t0 = Instant::now();
        let mut session: IptSession<TestEnv> = IptSession::new(t0, SessionConfig::default());
        // No request was ever sent with sequence 42.
        let reply = login_response(42, LoginResult::Success);
        let actions = session.handle_frame(&reply, t0).unwrap();
        assert!(actions.is_empty());
        assert_eq!(session.state(), SessionState::Authenticating);
    }

    #[test]
    fn open_and_close_push_channel_round_trip() {
        let t0 = Instant::now();
        let mut session: IptSession<TestEnv> = IptSession::new(t0, SessionConfig::default());
        let actions = session.login("acct", "pwd").unwrap();
        let SessionAction::SendFrame(frame) = &actions[0] else { panic!("expected SendFrame") };
        session.handle_frame(&login_response(frame.sequence(), LoginResult::Success), t0).unwrap();

        let actions =
            session.open_push_channel("target-a", "acct", "49123", "1.0", "dev-1", 30).unwrap();
        let SessionAction::SendFrame(frame) = &actions[0] else { panic!("expected SendFrame") };
        let seq = frame.sequence();
        let body = IptBody::OpenPushChannelResponse {
            result: OpenPushChannelResult::Success,
            channel_id: 7,
            packet_size: 512,
        };
        let reply = Frame::new(command::TP_RES_OPEN_PUSH_CHANNEL, seq, body.encode()).unwrap();
        session.handle_frame(&reply, t0).unwrap();

        // Transfer now succeeds because the channel is tracked as open.
        let actions = session.transfer_push_data(7, 0, 0, Bytes::from_static(b"data")).unwrap();
        assert_eq!(actions.len(), 1);

        // An unknown channel is rejected before any frame is sent.
        let err = session.transfer_push_data(99, 0, 0, Bytes::new()).unwrap_err();
        assert!(matches!(err, SessionError::ResourceNotFound(_)));
    }

    #[test]
    fn scramble_key_rotation_timing_differs_by_direction() {
        let key = [5u8; 32];
        let receive_action = IptSession::<TestEnv>::rotate_scramble_key_after_receive(key);
        let send_action = IptSession::<TestEnv>::rotate_scramble_key_before_send(key);
        assert_eq!(
            receive_action,
            SessionAction::InstallScrambleKey { key, timing: KeyInstallTiming::AfterDispatch }
        );
        assert_eq!(
            send_action,
            SessionAction::InstallScrambleKey { key, timing: KeyInstallTiming::BeforeNextEmit }
        );
    }

    #[test]
    fn unexpected_command_is_a_protocol_violation() {
        let t0 = Instant::now();
        let mut session: IptSession<TestEnv> = IptSession::new(t0, SessionConfig::default());
        // Open-push-channel is not valid while still authenticating.
        let body = IptBody::OpenPushChannelResponse {
            result: OpenPushChannelResult::Success,
            channel_id: 1,
            packet_size: 512,
        };
        let frame = Frame::new(command::TP_RES_OPEN_PUSH_CHANNEL, 5, body.encode()).unwrap();
        // Force past the pending-response gate by registering it as sent.
        session.pending.insert(5, command::TP_REQ_OPEN_PUSH_CHANNEL);
        let err = session.handle_frame(&frame, t0).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation { .. }));
        assert_eq!(session.state(), SessionState::Shutdown);
    }
}
