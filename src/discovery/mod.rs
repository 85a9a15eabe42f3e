//! PPPoE discovery state machine - RFC 2516, client side
//!
//! The driver broadcasts a PADI, waits for PADOs, selects an access
//! concentrator, requests a session with PADR and latches the session
//! id from PADS. Retries back off exponentially; with `persist` the
//! whole exchange restarts from PADI instead of giving up.

use crate::protocol::ethernet::{Frame, FrameBuilder};
use crate::protocol::pppoe::{
    codes, tags, PppoeBuilder, PppoeFrame, Tag, PPPOE_DISCOVERY_ETHERTYPE, PPPOE_MTU,
};
use crate::protocol::MacAddr;
use crate::transport::Transport;
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Maximum PADI (and PADR) attempts per cycle
pub const MAX_PADI_ATTEMPTS: u32 = 3;

/// Initial per-attempt timeout
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configured service name that means "send no Service-Name tag at
/// all" - a workaround for ACs that reject the RFC-mandated empty tag.
pub const NO_SERVICE_NAME_SENTINEL: &str = "NO-SERVICE-NAME-NON-RFC-COMPLIANT";

const RECV_BUF_SIZE: usize = 2048;

/// Discovery phase states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Nothing sent yet
    Initial,
    /// PADI sent, waiting for PADO
    PadiSent,
    /// Acceptable PADO latched
    PadoReceived,
    /// PADR sent, waiting for PADS
    PadrSent,
    /// PADS accepted, session id valid
    Session,
}

/// What the driver reports to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Session established; the session id and peer MAC are valid
    Established,
    /// Retry budget exhausted without a session
    GaveUp,
    /// skip_discovery + kill_session: PADT sent, nothing more to do
    SessionKilled,
}

/// What one full PADI → PADS cycle produced
enum Cycle {
    Established,
    Restart,
    Abort,
}

/// A tag remembered from PADO for verbatim echo in PADR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoTag {
    pub tag_type: u16,
    pub value: Vec<u8>,
}

impl EchoTag {
    fn new(tag_type: u16, value: &[u8]) -> Self {
        Self {
            tag_type,
            value: value.to_vec(),
        }
    }
}

/// An access concentrator offer collected in probe mode
#[derive(Debug, Clone)]
pub struct AcOffer {
    pub ac_name: String,
    pub service_names: Vec<String>,
    pub cookie: Option<Vec<u8>>,
    pub relay_session_id: Option<Vec<u8>>,
    pub mac: MacAddr,
}

/// PPP-LCP collaborator for RFC 4638 jumbo-frame MRU negotiation.
///
/// When attached, PADI/PADR advertise `min(want, allow)` if it exceeds
/// the standard PPPoE MTU, and the AC's PPP-Max-Payload reply clamps
/// both values downward. Without a PPP-Max-Payload reply both are
/// clamped to 1492 as RFC 4638 requires.
pub trait MruNegotiator: Send {
    /// MRU this side wants to request
    fn want(&self) -> u16;
    /// Largest MRU this side will allow the peer
    fn allow(&self) -> u16;
    /// Clamp both values down to at most `mru`
    fn clamp(&mut self, mru: u16);
}

/// Plain MRU want/allow pair, the default [`MruNegotiator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcpMru {
    pub want: u16,
    pub allow: u16,
}

impl MruNegotiator for LcpMru {
    fn want(&self) -> u16 {
        self.want
    }

    fn allow(&self) -> u16 {
        self.allow
    }

    fn clamp(&mut self, mru: u16) {
        if self.want > mru {
            self.want = mru;
        }
        if self.allow > mru {
            self.allow = mru;
        }
    }
}

/// Discovery policy and peer selection knobs
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Requested service; [`NO_SERVICE_NAME_SENTINEL`] omits the tag
    /// from PADI entirely
    pub service_name: Option<String>,
    /// Only accept offers whose AC-Name matches exactly
    pub ac_name: Option<String>,
    /// Sent in every packet and required byte-exact in every reply
    pub host_uniq: Option<Vec<u8>>,
    /// Only accept offers from this MAC; also the preset peer for
    /// `skip_discovery` and the PADT destination for `kill_session`
    pub ac_mac: Option<MacAddr>,
    /// Preset session id for `skip_discovery` / `kill_session`
    pub session: Option<u16>,
    /// Initial per-attempt timeout; doubles after every miss
    pub timeout: Duration,
    /// Restart discovery forever instead of giving up
    pub persist: bool,
    /// Assume an established session instead of discovering
    pub skip_discovery: bool,
    /// With `skip_discovery`: terminate the preset session via PADT
    pub kill_session: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_name: None,
            ac_name: None,
            host_uniq: None,
            ac_mac: None,
            session: None,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            persist: false,
            skip_discovery: false,
            kill_session: false,
        }
    }
}

impl DiscoveryConfig {
    /// Service name with the sentinel mapped to "none configured"
    fn effective_service(&self) -> Option<&str> {
        match self.service_name.as_deref() {
            Some(NO_SERVICE_NAME_SENTINEL) => None,
            other => other,
        }
    }
}

/// Per-PADO evaluation record
#[derive(Debug, Default)]
struct PadoEval {
    seen_ac_name: bool,
    seen_service_name: bool,
    ac_name_ok: bool,
    service_name_ok: bool,
    error: Option<(&'static str, String)>,
    ac_name: String,
    service_names: Vec<String>,
    cookie: Option<EchoTag>,
    relay_id: Option<EchoTag>,
    max_payload: Option<u16>,
}

/// One discovery run over a single interface
pub struct Discovery<T: Transport> {
    transport: T,
    local_mac: MacAddr,
    peer_mac: MacAddr,
    config: DiscoveryConfig,
    state: DiscoveryState,
    session_id: u16,
    cookie: Option<EchoTag>,
    relay_id: Option<EchoTag>,
    num_pados: u32,
    pads_had_error: bool,
    seen_max_payload: bool,
    mru: Option<Box<dyn MruNegotiator>>,
}

impl<T: Transport> Discovery<T> {
    pub fn new(transport: T, local_mac: MacAddr, config: DiscoveryConfig) -> Self {
        let peer_mac = config.ac_mac.unwrap_or(MacAddr::BROADCAST);
        let session_id = config.session.unwrap_or(0);

        Self {
            transport,
            local_mac,
            peer_mac,
            config,
            state: DiscoveryState::Initial,
            session_id,
            cookie: None,
            relay_id: None,
            num_pados: 0,
            pads_had_error: false,
            seen_max_payload: false,
            mru: None,
        }
    }

    /// Attach a PPP-LCP MRU collaborator (RFC 4638)
    pub fn with_mru_negotiator(mut self, negotiator: Box<dyn MruNegotiator>) -> Self {
        self.mru = Some(negotiator);
        self
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Session id; valid only in [`DiscoveryState::Session`]
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// The selected access concentrator's MAC
    pub fn peer_mac(&self) -> MacAddr {
        self.peer_mac
    }

    /// Well-formed PADOs seen so far
    pub fn num_pados(&self) -> u32 {
        self.num_pados
    }

    pub fn mru_negotiator(&self) -> Option<&dyn MruNegotiator> {
        self.mru.as_deref()
    }

    /// Run the discovery exchange to completion.
    ///
    /// Transient wire problems are handled internally; the result is
    /// either an outcome or a fatal error (I/O failure, or an
    /// AC-reported error tag when not persisting).
    pub async fn run(&mut self) -> Result<DiscoveryOutcome> {
        if self.config.skip_discovery {
            self.state = DiscoveryState::Session;
            if self.config.kill_session {
                self.send_padt("session killed manually").await?;
                return Ok(DiscoveryOutcome::SessionKilled);
            }
            return Ok(DiscoveryOutcome::Established);
        }

        loop {
            match self.cycle().await? {
                Cycle::Established => {
                    if !self.seen_max_payload {
                        // RFC 4638: without PPP-Max-Payload from the AC,
                        // MTU/MRU stay at the standard PPPoE limit
                        if let Some(negotiator) = self.mru.as_mut() {
                            negotiator.clamp(PPPOE_MTU);
                        }
                    }
                    return Ok(DiscoveryOutcome::Established);
                }
                Cycle::Restart => {
                    debug!("restarting discovery from PADI");
                }
                Cycle::Abort => return Ok(DiscoveryOutcome::GaveUp),
            }
        }
    }

    /// Probe mode: enumerate access concentrators without requesting a
    /// session. Collects every acceptable offer until the deadline of
    /// the first round that produced any; no PADR is ever sent and the
    /// timeout does not back off.
    pub async fn probe(&mut self) -> Result<Vec<AcOffer>> {
        let mut offers = Vec::new();

        for _ in 0..MAX_PADI_ATTEMPTS {
            self.send_padi().await?;
            self.state = DiscoveryState::PadiSent;
            self.wait_for_pado(self.config.timeout, Some(&mut offers))
                .await?;
            if !offers.is_empty() {
                break;
            }
        }

        Ok(offers)
    }

    /// One PADI → PADO → PADR → PADS cycle
    async fn cycle(&mut self) -> Result<Cycle> {
        let mut timeout = self.config.timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempts > MAX_PADI_ATTEMPTS {
                warn!("timeout waiting for PADO packets");
                if !self.config.persist {
                    return Ok(Cycle::Abort);
                }
                attempts = 0;
                timeout = self.config.timeout;
                continue;
            }
            self.send_padi().await?;
            self.state = DiscoveryState::PadiSent;
            self.wait_for_pado(timeout, None).await?;
            if self.state == DiscoveryState::PadoReceived {
                break;
            }
            timeout *= 2;
        }

        let mut timeout = self.config.timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempts > MAX_PADI_ATTEMPTS {
                warn!("timeout waiting for PADS packets");
                if self.config.persist {
                    // PADR exhaustion restarts the whole exchange at
                    // PADI, not just the PADR loop
                    return Ok(Cycle::Restart);
                }
                return Ok(Cycle::Abort);
            }
            self.send_padr().await?;
            self.state = DiscoveryState::PadrSent;
            self.wait_for_pads(timeout).await?;
            if self.state == DiscoveryState::Session {
                return Ok(Cycle::Established);
            }
            timeout *= 2;
        }
    }

    /// Drain the socket until an acceptable PADO arrives or the
    /// deadline expires. With `probe` set, acceptable offers are
    /// collected instead of ending the wait.
    async fn wait_for_pado(
        &mut self,
        timeout: Duration,
        mut probe: Option<&mut Vec<AcOffer>>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.seen_max_payload = false;
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        loop {
            let n = match timeout_at(deadline, self.transport.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(()), // deadline; caller decides what happens next
            };

            let Some((src, pppoe)) = self.accept_frame(&buf[..n]) else {
                continue;
            };
            if pppoe.code() != codes::PADO {
                continue;
            }
            if src.is_broadcast() {
                warn!("ignoring PADO packet from broadcast MAC address");
                continue;
            }
            if let Some(required) = self.config.ac_mac {
                if src != required {
                    warn!("ignoring PADO packet from wrong MAC address {}", src);
                    continue;
                }
            }

            let mut eval = self.evaluate_pado(&pppoe);

            if probe.is_none() {
                if let Some((tag, message)) = eval.error.take() {
                    if !self.config.persist {
                        return Err(Error::AcError {
                            packet: "PADO",
                            tag,
                            message,
                        });
                    }
                    continue;
                }
            }
            if !eval.seen_ac_name {
                warn!("ignoring PADO packet with no AC-Name tag");
                continue;
            }
            if !eval.seen_service_name {
                warn!("ignoring PADO packet with no Service-Name tag");
                continue;
            }
            self.num_pados += 1;
            if !(eval.ac_name_ok && eval.service_name_ok) {
                debug!("PADO from {} does not match configured AC/service", src);
                continue;
            }

            self.peer_mac = src;

            if let Some(offers) = probe.as_mut() {
                offers.push(AcOffer {
                    ac_name: eval.ac_name,
                    service_names: eval.service_names,
                    cookie: eval.cookie.map(|tag| tag.value),
                    relay_session_id: eval.relay_id.map(|tag| tag.value),
                    mac: src,
                });
                continue; // keep collecting until the deadline
            }

            info!("accepted PADO from {} (AC: {})", src, eval.ac_name);
            self.cookie = eval.cookie;
            self.relay_id = eval.relay_id;
            if let Some(mru) = eval.max_payload {
                self.apply_max_payload(mru);
            }
            self.state = DiscoveryState::PadoReceived;
            return Ok(());
        }
    }

    /// Drain the socket until a PADS from the selected AC arrives or
    /// the deadline expires.
    async fn wait_for_pads(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        loop {
            let n = match timeout_at(deadline, self.transport.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(()),
            };

            let Some((src, pppoe)) = self.accept_frame(&buf[..n]) else {
                continue;
            };
            // Only the AC we sent PADR to may confirm the session
            if src != self.peer_mac {
                continue;
            }
            if pppoe.code() != codes::PADS {
                continue;
            }

            self.pads_had_error = false;
            for tag in pppoe.tags() {
                match tag {
                    Tag::ServiceName(name) => {
                        debug!("PADS: Service-Name: '{}'", String::from_utf8_lossy(name));
                    }
                    Tag::RelaySessionId(data) => {
                        self.relay_id = Some(EchoTag::new(tags::RELAY_SESSION_ID, data));
                    }
                    Tag::PppMaxPayload(data) if data.len() == 2 => {
                        self.apply_max_payload(u16::from_be_bytes([data[0], data[1]]));
                    }
                    tag => {
                        if let Some(name) = tag.error_name() {
                            warn!("{} in PADS: {}", name, String::from_utf8_lossy(tag.data()));
                            self.pads_had_error = true;
                        }
                    }
                }
            }
            if self.pads_had_error {
                continue;
            }

            self.session_id = pppoe.session_id();
            self.state = DiscoveryState::Session;

            info!(
                "PPP session is {} (0x{:04x})",
                self.session_id, self.session_id
            );
            // RFC 2516 says the session id MUST NOT be 0 or 0xFFFF
            if self.session_id == 0 || self.session_id == 0xffff {
                warn!(
                    "access concentrator used session id 0x{:04x} in violation of RFC 2516",
                    self.session_id
                );
            }
            return Ok(());
        }
    }

    /// Parse and filter one received frame. Returns the source MAC and
    /// the PPPoE view, or None for anything not addressed to us.
    fn accept_frame<'a>(&self, data: &'a [u8]) -> Option<(MacAddr, PppoeFrame<'a>)> {
        let frame = match Frame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping runt frame: {}", e);
                return None;
            }
        };
        if frame.ethertype() != PPPOE_DISCOVERY_ETHERTYPE {
            return None;
        }

        let pppoe = match PppoeFrame::parse(frame.payload()) {
            Ok(pppoe) => pppoe,
            Err(e) => {
                warn!("dropping discovery frame: {}", e);
                return None;
            }
        };

        if !self.packet_is_for_me(&frame, &pppoe) {
            return None;
        }

        Some((frame.src_mac(), pppoe))
    }

    /// Destination MAC must be ours; with Host-Uniq configured, the
    /// frame must echo it byte-exact. Applied before any tag-specific
    /// interpretation.
    fn packet_is_for_me(&self, frame: &Frame, pppoe: &PppoeFrame) -> bool {
        if frame.dst_mac() != self.local_mac {
            return false;
        }
        match &self.config.host_uniq {
            None => true,
            Some(uniq) => pppoe
                .tags()
                .any(|tag| matches!(tag, Tag::HostUniq(data) if data == uniq.as_slice())),
        }
    }

    /// Pick the interesting tags out of a PADO
    fn evaluate_pado(&self, pppoe: &PppoeFrame) -> PadoEval {
        let mut eval = PadoEval {
            // Unconfigured selectors accept anything
            ac_name_ok: self.config.ac_name.is_none(),
            service_name_ok: self.config.effective_service().is_none(),
            ..Default::default()
        };

        for tag in pppoe.tags() {
            match tag {
                Tag::AcName(name) => {
                    eval.seen_ac_name = true;
                    eval.ac_name = String::from_utf8_lossy(name).into_owned();
                    if let Some(want) = &self.config.ac_name {
                        if name == want.as_bytes() {
                            eval.ac_name_ok = true;
                        }
                    }
                }
                Tag::ServiceName(name) => {
                    eval.seen_service_name = true;
                    eval.service_names
                        .push(String::from_utf8_lossy(name).into_owned());
                    if let Some(want) = self.config.effective_service() {
                        if name == want.as_bytes() {
                            eval.service_name_ok = true;
                        }
                    }
                }
                Tag::AcCookie(data) => {
                    eval.cookie = Some(EchoTag::new(tags::AC_COOKIE, data));
                }
                Tag::RelaySessionId(data) => {
                    eval.relay_id = Some(EchoTag::new(tags::RELAY_SESSION_ID, data));
                }
                Tag::PppMaxPayload(data) => {
                    if data.len() == 2 {
                        eval.max_payload = Some(u16::from_be_bytes([data[0], data[1]]));
                    }
                }
                tag => {
                    if let Some(name) = tag.error_name() {
                        let message = String::from_utf8_lossy(tag.data()).into_owned();
                        warn!("{} in PADO: {}", name, message);
                        eval.error = Some((name, message));
                    }
                }
            }
        }

        eval
    }

    fn apply_max_payload(&mut self, mru: u16) {
        if mru < PPPOE_MTU {
            return;
        }
        self.seen_max_payload = true;
        if let Some(negotiator) = self.mru.as_mut() {
            negotiator.clamp(mru);
        }
    }

    /// min(want, allow) when it exceeds the standard PPPoE MTU
    fn offered_max_payload(&self) -> Option<u16> {
        let negotiator = self.mru.as_ref()?;
        let mru = negotiator.want().min(negotiator.allow());
        (mru > PPPOE_MTU).then_some(mru)
    }

    fn build_padi(&self) -> Vec<u8> {
        let mut builder = PppoeBuilder::discovery();

        match self.config.service_name.as_deref() {
            Some(NO_SERVICE_NAME_SENTINEL) => {} // omit the tag entirely
            Some(name) => builder = builder.service_name(name.as_bytes()),
            None => builder = builder.service_name_any(),
        }
        if let Some(uniq) = &self.config.host_uniq {
            builder = builder.host_uniq(uniq);
        }
        if let Some(mru) = self.offered_max_payload() {
            builder = builder.ppp_max_payload(mru);
        }

        builder.build()
    }

    fn build_padr(&self) -> Vec<u8> {
        let mut builder = PppoeBuilder::discovery().code(codes::PADR);

        let service = self.config.effective_service().unwrap_or("");
        builder = builder.service_name(service.as_bytes());

        if let Some(uniq) = &self.config.host_uniq {
            builder = builder.host_uniq(uniq);
        }
        if let Some(cookie) = &self.cookie {
            builder = builder.tag(cookie.tag_type, &cookie.value);
        }
        if let Some(relay) = &self.relay_id {
            builder = builder.tag(relay.tag_type, &relay.value);
        }
        if let Some(mru) = self.offered_max_payload() {
            builder = builder.ppp_max_payload(mru);
        }

        builder.build()
    }

    fn wrap_discovery(&self, pppoe: &[u8], dst_mac: MacAddr) -> Vec<u8> {
        FrameBuilder::new()
            .dst_mac(dst_mac)
            .src_mac(self.local_mac)
            .ethertype(PPPOE_DISCOVERY_ETHERTYPE)
            .payload(pppoe)
            .build()
    }

    async fn send_padi(&mut self) -> Result<()> {
        let pppoe = self.build_padi();
        let frame = self.wrap_discovery(&pppoe, MacAddr::BROADCAST);
        self.transport.send(&frame).await?;
        debug!("sent PADI");
        Ok(())
    }

    async fn send_padr(&mut self) -> Result<()> {
        let pppoe = self.build_padr();
        let frame = self.wrap_discovery(&pppoe, self.peer_mac);
        self.transport.send(&frame).await?;
        debug!("sent PADR to {}", self.peer_mac);
        Ok(())
    }

    /// Terminate the preset session
    async fn send_padt(&mut self, reason: &str) -> Result<()> {
        let mut builder = PppoeBuilder::discovery()
            .code(codes::PADT)
            .session_id(self.session_id);

        if let Some(uniq) = &self.config.host_uniq {
            builder = builder.host_uniq(uniq);
        }
        builder = builder.generic_error(reason);

        let pppoe = builder.build();
        let frame = self.wrap_discovery(&pppoe, self.peer_mac);
        self.transport.send(&frame).await?;
        info!(
            "sent PADT for session 0x{:04x} to {}",
            self.session_id, self.peer_mac
        );
        Ok(())
    }
}
