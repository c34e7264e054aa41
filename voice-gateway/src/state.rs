//! Session bookkeeping and the control connection's state machine (spec §3
//! `VoiceSession`, §4.5 state diagram).

/// Plain data tracked across a join: guild/channel/user identity, the
/// session id handed out by the main gateway, the voice server endpoint and
/// token, and resume-eligibility flags.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub server_endpoint: Option<String>,
    pub token: Option<String>,
    pub has_session: bool,
    pub has_token: bool,
    pub started: bool,
    pub resuming: bool,
}

impl SessionInfo {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn set_session(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
        self.has_session = true;
    }

    pub fn set_tokens(&mut self, server_endpoint: impl Into<String>, token: impl Into<String>) {
        self.server_endpoint = Some(server_endpoint.into());
        self.token = Some(token.into());
        self.has_token = true;
    }

    /// IDENTIFY may be sent once both the session id and voice-server token
    /// have arrived (spec §4.5 "start proceeds when both are present").
    pub fn ready_to_identify(&self) -> bool {
        self.has_session && self.has_token
    }
}

/// The control connection's state machine (spec §4.5, verbatim state names).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Identifying,
    HelloReceived,
    Identified,
    ReadyReceived,
    UdpHandshaking,
    SelectingProtocol,
    ProtocolAcked,
    Operational,
    Resuming,
    Closed,
}

impl ConnectionState {
    /// Whether a control-plane close from this state is eligible for resume
    /// (spec §4.5 "the session had reached Identified or later").
    pub fn resume_eligible(self) -> bool {
        !matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Connecting | ConnectionState::Identifying
        )
    }
}
