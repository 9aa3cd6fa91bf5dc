//! The workflow state machine.
//!
//! Every multi-step exchange with the modem (mailbox scan, SMS submission,
//! call placement, GNSS bring-up, bearer setup, HTTP request/response) is a
//! short chain of states: send a command, wait for the channel to unlock,
//! react. One dispatch hub picks the next workflow by fixed priority whenever
//! the engine is otherwise idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{EngineConfig, FixPolicy};
use crate::engine::channel::{ChannelStatus, CommandChannel};
use crate::engine::shared::{SharedHandle, lock};
use crate::error::{Error, Fault, Result};
use crate::power::PowerControl;
use crate::protocol::{Chunk, Command, LineAssembler, Response, classify};
use crate::types::{GpsFix, Sms};
use crate::transport::Transport;

/// Engine states. Send states transmit and move to their await state; await
/// states hold until the channel unlocks, then react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Bootstrap,
    MailboxQuery,
    MailboxAwait,
    /// The dispatch hub.
    Idle,
    SmsRead,
    SmsReadAwait,
    SmsDeleteAwait,
    SmsSend,
    SmsSendAwait,
    Dial,
    DialAwait,
    CallActive,
    HangUp,
    HangUpAwait,
    GnssPowerOn,
    GnssPowerOnAwait,
    GnssStreamStart,
    GnssStreamStop,
    GnssPoll,
    GnssAwait,
    BearerQuery,
    BearerQueryAwait,
    BearerContype,
    BearerApn,
    BearerUser,
    BearerPassword,
    BearerOpen,
    BearerOpenAwait,
    HttpInit,
    HttpCid,
    HttpUrl,
    HttpActionSend,
    HttpRead,
    HttpTerm,
    Liveness,
    LivenessAwait,
}

/// The protocol engine owned by the background worker.
///
/// [`feed`](Self::feed) pushes received bytes through the line assembler and
/// response handling; [`step`](Self::step) runs one state-machine decision.
/// The worker calls them in that order, once per tick, which keeps the
/// single-outstanding-command invariant intact.
pub(crate) struct Engine<T> {
    channel: CommandChannel<T>,
    assembler: LineAssembler,
    power: Box<dyn PowerControl>,
    shared: SharedHandle,
    config: EngineConfig,

    state: State,
    next_state: Option<State>,
    wait_until: Instant,

    // Mailbox scan: index 0 means idle, 1..=20 is the slot being handled.
    sms_index: u32,
    sms_partial: Option<Sms>,
    retries_left: u32,

    bearer_ready: bool,
    http_in_flight: bool,
    http_response_seen: bool,
    http_body_pending: bool,

    gnss_power_req: bool,
    gnss_stream_start_req: bool,
    gnss_stream_stop_req: bool,
    gnss_poll_req: bool,

    gnss_poll_at: Instant,
    sms_poll_at: Instant,
    gprs_poll_at: Instant,
}

impl<T: Transport> Engine<T> {
    pub fn new(
        transport: Arc<Mutex<T>>,
        power: Box<dyn PowerControl>,
        shared: SharedHandle,
        config: EngineConfig,
    ) -> Self {
        let now = Instant::now();
        let channel = CommandChannel::new(transport, config.command_timeout);
        Self {
            channel,
            assembler: LineAssembler::new(),
            power,
            shared,
            state: State::Bootstrap,
            next_state: None,
            wait_until: now,
            sms_index: 0,
            sms_partial: None,
            retries_left: config.mailbox_retry_limit,
            bearer_ready: false,
            http_in_flight: false,
            http_response_seen: false,
            http_body_pending: false,
            gnss_power_req: false,
            gnss_stream_start_req: false,
            gnss_stream_stop_req: false,
            gnss_poll_req: false,
            gnss_poll_at: now,
            sms_poll_at: now,
            gprs_poll_at: now,
            config,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }

    pub fn record_fault(&self, fault: Fault) {
        lock(&self.shared).fault = Some(fault);
    }

    /// Feeds received bytes through the assembler and response handling.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some(chunk) = self.assembler.push(byte) {
                self.handle_chunk(chunk);
            }
        }
    }

    fn handle_chunk(&mut self, chunk: Chunk) {
        match chunk {
            Chunk::SmsBody(payload) => {
                if let Some(mut sms) = self.sms_partial.take() {
                    sms.message = payload;
                    tracing::info!("new message from {} received", sms.sender);
                    lock(&self.shared).inbox.push_back(sms);
                }
                self.channel.release();
            }
            Chunk::HttpBody(payload) => {
                tracing::debug!("HTTP body complete, {} bytes", payload.len());
                lock(&self.shared).url_responses.push_back(payload);
                self.channel.release();
            }
            Chunk::Line(line) => self.handle_line(&line),
        }
    }

    fn handle_line(&mut self, line: &str) {
        tracing::debug!("received: {line}");
        match classify(line) {
            Response::Ok => self.channel.release(),
            Response::GenericError => {
                if self.state == State::HttpCid {
                    // HTTPINIT failed, usually because a previous session was
                    // left open. Terminate it before the next request.
                    tracing::info!("error starting HTTP request, terminating session");
                    self.channel.release();
                    self.state = State::HttpTerm;
                } else {
                    tracing::warn!("modem reported ERROR in state {:?}", self.state);
                }
            }
            Response::CmeError(code) => {
                self.channel.release();
                tracing::info!("got CME ERROR: {code}");
            }
            Response::CmsError(code) => {
                self.channel.release();
                tracing::info!("got CMS ERROR: {code}");
            }
            Response::MailboxStatus { used, capacity } => {
                tracing::debug!("mailbox holds {used} of {capacity} messages");
                if used > 0 {
                    self.sms_index = 1;
                }
            }
            Response::SmsHeader { sender, date } => {
                self.assembler.begin_sms_capture();
                self.sms_partial = Some(Sms {
                    sender,
                    date,
                    ..Sms::default()
                });
            }
            Response::BearerStatus { ip, ready } => {
                tracing::debug!("bearer IP address: {ip}");
                self.bearer_ready = ready;
            }
            Response::HttpReadStart => self.assembler.begin_http_capture(),
            Response::HttpAction {
                method,
                status,
                length,
            } => {
                tracing::debug!("HTTP action: method {method}, status {status}, {length} bytes");
                self.http_response_seen = true;
                match status {
                    200 => self.http_body_pending = true,
                    601 => tracing::info!("HTTP action network error ({status})"),
                    _ => tracing::info!("HTTP action unhandled status ({status})"),
                }
            }
            Response::NewSmsNotice { storage, index } => {
                tracing::info!("new SMS in storage {storage} at index {index}");
                self.sms_index = index;
            }
            Response::GnssReport(fix) => self.apply_fix(fix),
            Response::Unrecognized => tracing::debug!("unhandled line: {line}"),
        }
    }

    fn apply_fix(&mut self, fix: GpsFix) {
        let accept = match self.config.fix_policy {
            FixPolicy::Always => true,
            FixPolicy::RequireGoodFix => fix.is_good_position(),
        };
        if accept {
            lock(&self.shared).gps_fix = fix;
        } else {
            tracing::debug!("discarding GNSS record without a good position");
        }
    }

    /// Checks whether the channel is free, handling an elapsed deadline.
    ///
    /// After timeout recovery the current state may have changed; the caller
    /// simply ends this step and the next tick proceeds from the new state.
    async fn ready(&mut self) -> Result<bool> {
        match self.channel.poll() {
            ChannelStatus::Ready => Ok(true),
            ChannelStatus::Busy => Ok(false),
            ChannelStatus::TimedOut => {
                self.recover_from_timeout().await?;
                Ok(false)
            }
        }
    }

    async fn recover_from_timeout(&mut self) -> Result<()> {
        tracing::error!(
            "timeout waiting for reply to {:?} in state {:?}",
            self.channel.last_command(),
            self.state
        );
        match self.state {
            // No answer to the bootstrap command or the liveness ping means
            // the module is likely unpowered.
            State::MailboxQuery | State::LivenessAwait => self.restart().await,
            State::MailboxAwait => {
                if self.retries_left > 0 {
                    self.retries_left -= 1;
                    tracing::info!(
                        "retrying mailbox query, {} retries left",
                        self.retries_left
                    );
                    self.channel.force_clear();
                    self.state = State::MailboxQuery;
                } else {
                    self.restart().await;
                }
            }
            state => {
                return Err(Error::Fault(Fault::UnhandledTimeout {
                    state: format!("{state:?}"),
                    command: self.channel.last_command().to_owned(),
                }));
            }
        }
        Ok(())
    }

    async fn restart(&mut self) {
        tracing::error!("attempting to restart the gsm module");
        self.power.cycle().await;
        self.state = State::Bootstrap;
        self.channel.force_clear();
        self.assembler.clear();
        self.retries_left = self.config.mailbox_retry_limit;
    }

    /// Runs one state-machine decision.
    #[allow(clippy::too_many_lines)]
    pub async fn step(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.state {
            State::Bootstrap => {
                if self.channel.send(&Command::SetSmsTextMode).await? {
                    self.gnss_power_req = true;
                    self.gnss_stream_stop_req = true;
                    self.state = State::MailboxQuery;
                }
            }
            State::MailboxQuery => {
                if self.ready().await? && self.channel.send(&Command::QueryMailbox).await? {
                    self.state = State::MailboxAwait;
                }
            }
            State::MailboxAwait => {
                if self.ready().await? {
                    self.retries_left = self.config.mailbox_retry_limit;
                    if self.next_state.is_none() {
                        self.next_state = Some(State::Liveness);
                        self.wait_until = now + self.config.liveness_interval;
                    }
                    self.state = State::Idle;
                }
            }
            State::Idle => self.dispatch(now),

            // Mailbox scan: read the slot, delete it unconditionally to keep
            // the scan moving, then advance the index.
            State::SmsRead => {
                if self.channel.send(&Command::ReadSms(self.sms_index)).await? {
                    self.state = State::SmsReadAwait;
                }
            }
            State::SmsReadAwait => {
                if self.ready().await?
                    && self.channel.send(&Command::DeleteSms(self.sms_index)).await?
                {
                    self.state = State::SmsDeleteAwait;
                }
            }
            State::SmsDeleteAwait => {
                if self.ready().await? {
                    self.sms_index = if self.sms_index == 20 {
                        0
                    } else {
                        self.sms_index + 1
                    };
                    self.state = State::Idle;
                }
            }

            State::SmsSend => {
                let Some(sms) = lock(&self.shared).outbox.front().cloned() else {
                    self.state = State::Idle;
                    return Ok(());
                };
                // The modem prompts for the body before acknowledging, which
                // takes far longer than a plain command.
                self.channel.set_timeout(self.config.sms_send_timeout);
                let command = Command::SendSms {
                    receiver: sms.receiver,
                    body: sms.message,
                };
                if self.channel.send(&command).await? {
                    self.state = State::SmsSendAwait;
                }
            }
            State::SmsSendAwait => {
                if self.ready().await? {
                    if let Some(sms) = lock(&self.shared).outbox.pop_front() {
                        tracing::info!("message to {} successfully sent", sms.receiver);
                    }
                    self.channel.set_timeout(self.config.command_timeout);
                    self.state = State::Idle;
                }
            }

            State::Dial => {
                let Some(request) = lock(&self.shared).call_request.clone() else {
                    self.state = State::Idle;
                    return Ok(());
                };
                if self.channel.send(&Command::Dial(request.number)).await? {
                    self.state = State::DialAwait;
                }
            }
            State::DialAwait => {
                if self.ready().await? {
                    let timeout = lock(&self.shared)
                        .call_request
                        .as_ref()
                        .map_or(self.config.default_call_timeout, |r| r.timeout);
                    self.wait_until = now + timeout;
                    self.state = State::CallActive;
                }
            }
            State::CallActive => {
                let hang_up = lock(&self.shared).hang_up;
                if now > self.wait_until || hang_up {
                    let mut shared = lock(&self.shared);
                    shared.call_request = None;
                    shared.hang_up = true;
                    self.state = State::Idle;
                }
            }
            State::HangUp => {
                if self.channel.send(&Command::HangUp).await? {
                    self.state = State::HangUpAwait;
                }
            }
            State::HangUpAwait => {
                if self.ready().await? {
                    lock(&self.shared).hang_up = false;
                    self.state = State::Idle;
                }
            }

            State::GnssPowerOn => {
                if self.channel.send(&Command::GnssPower(true)).await? {
                    self.state = State::GnssPowerOnAwait;
                }
            }
            State::GnssPowerOnAwait => {
                if self.ready().await? {
                    tracing::debug!("GNSS powered on");
                    self.gnss_power_req = false;
                    self.state = State::Idle;
                }
            }
            State::GnssStreamStart => {
                if self.channel.send(&Command::GnssStream(true)).await? {
                    tracing::debug!("GNSS streaming started");
                    self.gnss_stream_start_req = false;
                    self.state = State::GnssAwait;
                }
            }
            State::GnssStreamStop => {
                if self.channel.send(&Command::GnssStream(false)).await? {
                    self.gnss_stream_stop_req = false;
                    self.state = State::GnssAwait;
                }
            }
            State::GnssPoll => {
                if self.channel.send(&Command::GnssInfo).await? {
                    self.gnss_poll_req = false;
                    self.state = State::GnssAwait;
                }
            }
            State::GnssAwait => {
                if self.ready().await? {
                    self.state = State::Idle;
                }
            }

            State::BearerQuery => {
                if self.channel.send(&Command::BearerQuery).await? {
                    self.state = State::BearerQueryAwait;
                }
            }
            State::BearerQueryAwait => {
                if self.ready().await? {
                    let creds_set = lock(&self.shared).gprs.is_some();
                    self.state = if !self.bearer_ready && creds_set {
                        State::BearerContype
                    } else {
                        State::Idle
                    };
                }
            }
            State::BearerContype => {
                if self.channel.send(&Command::bearer_contype()).await? {
                    self.state = State::BearerApn;
                }
            }
            State::BearerApn => {
                if self.ready().await? {
                    let Some(gprs) = lock(&self.shared).gprs.clone() else {
                        self.state = State::Idle;
                        return Ok(());
                    };
                    if self.channel.send(&Command::bearer_apn(gprs.apn)).await? {
                        self.state = State::BearerUser;
                    }
                }
            }
            State::BearerUser => {
                if self.ready().await? {
                    let Some(gprs) = lock(&self.shared).gprs.clone() else {
                        self.state = State::Idle;
                        return Ok(());
                    };
                    if self.channel.send(&Command::bearer_user(gprs.user)).await? {
                        self.state = State::BearerPassword;
                    }
                }
            }
            State::BearerPassword => {
                if self.ready().await? {
                    let Some(gprs) = lock(&self.shared).gprs.clone() else {
                        self.state = State::Idle;
                        return Ok(());
                    };
                    if self
                        .channel
                        .send(&Command::bearer_password(gprs.password))
                        .await?
                    {
                        self.state = State::BearerOpen;
                    }
                }
            }
            State::BearerOpen => {
                if self.ready().await? && self.channel.send(&Command::BearerOpen).await? {
                    self.state = State::BearerOpenAwait;
                }
            }
            State::BearerOpenAwait => {
                if self.ready().await? {
                    self.state = State::Idle;
                }
            }

            State::HttpInit => {
                if self.channel.send(&Command::HttpInit).await? {
                    self.state = State::HttpCid;
                }
            }
            State::HttpCid => {
                if self.ready().await? && self.channel.send(&Command::HttpCid).await? {
                    self.state = State::HttpUrl;
                }
            }
            State::HttpUrl => {
                if self.ready().await? {
                    let Some(url) = lock(&self.shared).url_queue.front().cloned() else {
                        self.state = State::HttpTerm;
                        return Ok(());
                    };
                    if self.channel.send(&Command::HttpUrl(url)).await? {
                        lock(&self.shared).url_queue.pop_front();
                        self.http_in_flight = true;
                        self.http_response_seen = false;
                        self.http_body_pending = false;
                        self.state = State::HttpActionSend;
                    }
                }
            }
            State::HttpActionSend => {
                // The action result arrives later as +HTTPACTION; the hub
                // decides between body read and teardown when it does.
                if self.ready().await? && self.channel.send(&Command::HttpGet).await? {
                    self.state = State::Idle;
                }
            }
            State::HttpRead => {
                if self.ready().await? && self.channel.send(&Command::HttpRead).await? {
                    self.state = State::HttpTerm;
                }
            }
            State::HttpTerm => {
                if self.ready().await? && self.channel.send(&Command::HttpTerm).await? {
                    self.http_in_flight = false;
                    self.http_body_pending = false;
                    self.state = State::Idle;
                }
            }

            State::Liveness => {
                if self.channel.send(&Command::Ping).await? {
                    self.state = State::LivenessAwait;
                }
            }
            State::LivenessAwait => {
                if self.ready().await? {
                    self.next_state = Some(State::Liveness);
                    self.wait_until = now + self.config.liveness_interval;
                    self.state = State::Idle;
                }
            }
        }
        Ok(())
    }

    /// The dispatch hub: picks the next workflow by fixed priority.
    fn dispatch(&mut self, now: Instant) {
        let (outbox_pending, call_pending, hang_up, url_pending) = {
            let mut shared = lock(&self.shared);
            if shared.gps_poll_requested {
                shared.gps_poll_requested = false;
                self.gnss_poll_req = true;
            }
            if shared.gps_stream_start_requested {
                shared.gps_stream_start_requested = false;
                self.gnss_stream_start_req = true;
            }
            if shared.gps_stream_stop_requested {
                shared.gps_stream_stop_requested = false;
                self.gnss_stream_stop_req = true;
            }
            (
                !shared.outbox.is_empty(),
                shared.call_request.is_some(),
                shared.hang_up,
                !shared.url_queue.is_empty(),
            )
        };

        self.state = if outbox_pending {
            State::SmsSend
        } else if call_pending {
            State::Dial
        } else if hang_up {
            State::HangUp
        } else if self.sms_index > 0 {
            State::SmsRead
        } else if url_pending && self.bearer_ready && !self.http_in_flight {
            State::HttpInit
        } else if self.http_in_flight && self.http_response_seen {
            if self.http_body_pending {
                State::HttpRead
            } else {
                State::HttpTerm
            }
        } else if self.gnss_power_req {
            State::GnssPowerOn
        } else if self.gnss_stream_start_req {
            State::GnssStreamStart
        } else if self.gnss_stream_stop_req {
            State::GnssStreamStop
        } else if self.gnss_poll_req {
            State::GnssPoll
        } else if now > self.gnss_poll_at {
            self.gnss_poll_req = true;
            self.gnss_poll_at = now + self.config.gnss_poll_interval;
            State::Idle
        } else if now > self.sms_poll_at {
            self.sms_poll_at = now + self.config.sms_poll_interval;
            State::MailboxQuery
        } else if now > self.gprs_poll_at {
            self.gprs_poll_at = now + self.config.gprs_poll_interval;
            State::BearerQuery
        } else if now > self.wait_until {
            self.next_state.take().unwrap_or(State::Idle)
        } else {
            State::Idle
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::shared::Shared;
    use crate::engine::test_support::{CountingPower, MockTransport};
    use crate::types::CallRequest;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Writes = Arc<std::sync::Mutex<Vec<Vec<u8>>>>;

    fn engine_with_config(
        config: EngineConfig,
    ) -> (Engine<MockTransport>, Writes, Arc<AtomicU32>, SharedHandle) {
        crate::engine::test_support::init_tracing();
        let (transport, writes) = MockTransport::new();
        let (power, cycles) = CountingPower::new();
        let shared: SharedHandle = Arc::new(std::sync::Mutex::new(Shared::new()));
        let engine = Engine::new(
            Arc::new(Mutex::new(transport)),
            Box::new(power),
            Arc::clone(&shared),
            config,
        );
        (engine, writes, cycles, shared)
    }

    fn engine() -> (Engine<MockTransport>, Writes, Arc<AtomicU32>, SharedHandle) {
        engine_with_config(EngineConfig::default())
    }

    fn written(writes: &Writes) -> Vec<String> {
        writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    fn last_write(writes: &Writes) -> String {
        written(writes).last().cloned().unwrap_or_default()
    }

    /// Drives the engine through bootstrap with an empty mailbox and clears
    /// the GNSS bring-up requests so tests can target other workflows.
    async fn boot(engine: &mut Engine<MockTransport>) {
        engine.step().await.unwrap(); // AT+CMGF=1
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap(); // AT+CPMS="SM"
        engine.feed(b"+CPMS: 0,30,0,30,0,30\r\nOK\r\n");
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::Idle);
        engine.gnss_power_req = false;
        engine.gnss_stream_stop_req = false;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_sets_text_mode_and_requests_gnss() {
        let (mut engine, writes, _cycles, _shared) = engine();
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CMGF=1\n");
        assert!(engine.gnss_power_req);
        assert!(engine.gnss_stream_stop_req);

        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CPMS=\"SM\"\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mailbox_scan_read_delete_advance() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        // A later mailbox report with messages starts the scan at index 1.
        engine.feed(b"+CPMS: 2,30,2,30,2,30\r\n");
        assert_eq!(engine.sms_index, 1);

        engine.step().await.unwrap(); // hub -> SmsRead
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CMGR=1\n");

        engine.feed(
            b"+CMGR: \"REC UNREAD\",\"+491234567\",\"\",\"20/11/15,14:26:32+04\"\r\n\
              hello\r\nworld\r\nOK\r\n",
        );
        {
            let shared = lock(&shared);
            assert_eq!(shared.inbox.len(), 1);
            assert_eq!(shared.inbox[0].sender, "+491234567");
            assert_eq!(shared.inbox[0].message, "hello\r\nworld");
        }

        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CMGD=1\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(engine.sms_index, 2);
        assert_eq!(engine.state, State::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mailbox_scan_index_wraps_to_idle() {
        let (mut engine, writes, _cycles, _shared) = engine();
        boot(&mut engine).await;

        engine.sms_index = 20;
        engine.state = State::SmsRead;
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CMGR=20\n");

        // No message at this slot: the reply is a bare OK; delete anyway.
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CMGD=20\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(engine.sms_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_cmti_schedules_read_at_index() {
        let (mut engine, writes, _cycles, _shared) = engine();
        boot(&mut engine).await;

        engine.feed(b"+CMTI: \"SM\",3\r\n");
        engine.step().await.unwrap(); // hub -> SmsRead
        assert_eq!(engine.state, State::SmsRead);
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CMGR=3\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_send_pops_outbox_once() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        lock(&shared)
            .outbox
            .push_back(Sms::outgoing("+491234", "hello"));
        engine.step().await.unwrap(); // hub -> SmsSend
        engine.step().await.unwrap();
        let sent = last_write(&writes);
        assert!(sent.starts_with("AT+CMGS=\"+491234\"\nhello"));
        assert!(sent.contains('\x1A'));

        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert!(lock(&shared).outbox.is_empty());
        assert_eq!(engine.state, State::Idle);

        // Another ack must not pop anything else.
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert!(lock(&shared).outbox.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_then_deadline_hang_up() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        assert!(lock(&shared).request_call(CallRequest {
            number: "+491234".into(),
            timeout: Duration::from_secs(15),
        }));
        engine.step().await.unwrap(); // hub -> Dial
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "ATD+491234;\n");

        // A second request while the call is pending is rejected.
        assert!(!lock(&shared).request_call(CallRequest {
            number: "+495678".into(),
            timeout: Duration::from_secs(5),
        }));

        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::CallActive);

        tokio::time::advance(Duration::from_secs(16)).await;
        engine.step().await.unwrap(); // deadline elapsed
        assert!(lock(&shared).call_request.is_none());

        engine.step().await.unwrap(); // hub -> HangUp
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CHUP\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert!(!lock(&shared).hang_up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mailbox_query_retries_three_times_then_power_cycles() {
        let (mut engine, writes, cycles, _shared) = engine();
        engine.step().await.unwrap(); // AT+CMGF=1
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap(); // AT+CPMS="SM"
        assert_eq!(engine.state, State::MailboxAwait);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(6)).await;
            engine.step().await.unwrap(); // timeout -> retry
            assert_eq!(engine.state, State::MailboxQuery);
            engine.step().await.unwrap(); // resend AT+CPMS="SM"
            assert_eq!(engine.state, State::MailboxAwait);
        }
        assert_eq!(cycles.load(Ordering::SeqCst), 0);
        let cpms_writes = written(&writes)
            .iter()
            .filter(|w| w.as_str() == "AT+CPMS=\"SM\"\n")
            .count();
        assert_eq!(cpms_writes, 4);

        tokio::time::advance(Duration::from_secs(6)).await;
        engine.step().await.unwrap(); // budget exhausted -> power cycle
        assert_eq!(cycles.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state, State::Bootstrap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_timeout_power_cycles() {
        let (mut engine, _writes, cycles, _shared) = engine();
        engine.step().await.unwrap(); // AT+CMGF=1, never answered
        tokio::time::advance(Duration::from_secs(6)).await;
        engine.step().await.unwrap();
        assert_eq!(cycles.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state, State::Bootstrap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_timeout_is_fatal() {
        let (mut engine, _writes, _cycles, _shared) = engine();
        boot(&mut engine).await;

        engine.gnss_poll_req = true;
        engine.step().await.unwrap(); // hub -> GnssPoll
        engine.step().await.unwrap(); // AT+CGNSINF
        assert_eq!(engine.state, State::GnssAwait);

        tokio::time::advance(Duration::from_secs(6)).await;
        let err = engine.step().await.unwrap_err();
        match err {
            Error::Fault(Fault::UnhandledTimeout { state, command }) => {
                assert_eq!(state, "GnssAwait");
                assert_eq!(command, "AT+CGNSINF");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    async fn run_http_exchange(
        engine: &mut Engine<MockTransport>,
        writes: &Writes,
        shared: &SharedHandle,
        action_line: &[u8],
    ) {
        lock(shared)
            .url_queue
            .push_back("http://example.org/a".into());
        engine.bearer_ready = true;

        engine.step().await.unwrap(); // hub -> HttpInit
        engine.step().await.unwrap();
        assert_eq!(last_write(writes), "AT+HTTPINIT\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(last_write(writes), "AT+HTTPPARA=\"CID\",1\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(
            last_write(writes),
            "AT+HTTPPARA=\"URL\",\"http://example.org/a\"\n"
        );
        assert!(lock(shared).url_queue.is_empty());
        assert!(engine.http_in_flight);

        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(last_write(writes), "AT+HTTPACTION=0\n");
        assert_eq!(engine.state, State::Idle);

        engine.feed(b"OK\r\n"); // command ack; the action result comes later
        engine.feed(action_line);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_success_reads_body_then_terminates() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;
        run_http_exchange(&mut engine, &writes, &shared, b"+HTTPACTION: 0,200,57\r\n").await;

        engine.step().await.unwrap(); // hub -> HttpRead
        assert_eq!(engine.state, State::HttpRead);
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+HTTPREAD\n");

        engine.feed(b"+HTTPREAD: 57\r\n{\"answer\":42}\r\nOK\r\n");
        assert_eq!(
            lock(&shared).url_responses.front().map(String::as_str),
            Some("{\"answer\":42}")
        );

        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+HTTPTERM\n");
        assert!(!engine.http_in_flight);
        engine.feed(b"OK\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_network_error_terminates_without_read() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;
        run_http_exchange(&mut engine, &writes, &shared, b"+HTTPACTION: 0,601,0\r\n").await;

        engine.step().await.unwrap(); // hub -> HttpTerm
        assert_eq!(engine.state, State::HttpTerm);
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+HTTPTERM\n");
        assert!(!written(&writes).iter().any(|w| w == "AT+HTTPREAD\n"));
        assert!(lock(&shared).url_responses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_unhandled_status_terminates_without_read() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;
        run_http_exchange(&mut engine, &writes, &shared, b"+HTTPACTION: 0,503,0\r\n").await;

        engine.step().await.unwrap();
        assert_eq!(engine.state, State::HttpTerm);
        engine.step().await.unwrap();
        assert!(!written(&writes).iter().any(|w| w == "AT+HTTPREAD\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_init_error_jumps_to_teardown() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        lock(&shared)
            .url_queue
            .push_back("http://example.org/a".into());
        engine.bearer_ready = true;
        engine.step().await.unwrap(); // hub -> HttpInit
        engine.step().await.unwrap(); // AT+HTTPINIT

        engine.feed(b"ERROR\r\n");
        assert_eq!(engine.state, State::HttpTerm);
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+HTTPTERM\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bearer_setup_runs_once_credentials_are_set() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        lock(&shared).set_gprs(crate::types::GprsConfig::new("internet", "user", "pass"));
        engine.state = State::BearerQuery;
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+SAPBR=2,1\n");

        engine.feed(b"+SAPBR: 1,3,\"0.0.0.0\"\r\nOK\r\n");
        assert!(!engine.bearer_ready);
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::BearerContype);

        for expected in [
            "AT+SAPBR=3,1,\"Contype\",\"GPRS\"\n",
            "AT+SAPBR=3,1,\"APN\",\"internet\"\n",
            "AT+SAPBR=3,1,\"USER\",\"user\"\n",
            "AT+SAPBR=3,1,\"PWD\",\"pass\"\n",
            "AT+SAPBR=1,1\n",
        ] {
            engine.step().await.unwrap();
            assert_eq!(last_write(&writes), expected);
            engine.feed(b"OK\r\n");
        }
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bearer_ready_skips_setup() {
        let (mut engine, _writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        lock(&shared).set_gprs(crate::types::GprsConfig::new("internet", "user", "pass"));
        engine.state = State::BearerQuery;
        engine.step().await.unwrap();
        engine.feed(b"+SAPBR: 1,1,\"10.92.13.151\"\r\nOK\r\n");
        assert!(engine.bearer_ready);
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_policy_gates_replacement() {
        let (mut engine, _writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        engine.feed(
            b"+CGNSINF: 1,1,20201115142632.000,52.520008,13.404954,34.2,1.5,12.0,1,,1.1,1.4,0.9,,9,11,,,42,,\r\n",
        );
        assert!((lock(&shared).gps_fix.latitude - 52.520_008).abs() < 1e-9);

        // An invalid record must not clobber the held fix.
        engine.feed(b"+CGNSINF: 1,0,,0.0,0.0,0.0,0.0,0.0,0,,0.0,0.0,0.0,,0,0,,,0,,\r\n");
        assert!((lock(&shared).gps_fix.latitude - 52.520_008).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_policy_always_replaces_unconditionally() {
        let (mut engine, _writes, _cycles, shared) =
            engine_with_config(EngineConfig::default().fix_policy(FixPolicy::Always));
        boot(&mut engine).await;

        engine.feed(
            b"+CGNSINF: 1,1,20201115142632.000,52.520008,13.404954,34.2,1.5,12.0,1,,1.1,1.4,0.9,,9,11,,,42,,\r\n",
        );
        engine.feed(b"+CGNSINF: 1,0,,0.0,0.0,0.0,0.0,0.0,0,,0.0,0.0,0.0,,0,0,,,0,,\r\n");
        assert_eq!(lock(&shared).gps_fix.latitude, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_priority_prefers_outgoing_sms() {
        let (mut engine, _writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        engine.sms_index = 5;
        lock(&shared)
            .outbox
            .push_back(Sms::outgoing("+491234", "first"));
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::SmsSend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_liveness_ping_after_interval() {
        let (mut engine, writes, _cycles, _shared) = engine();
        boot(&mut engine).await;
        engine.gnss_poll_at = Instant::now() + Duration::from_secs(3600);
        engine.sms_poll_at = engine.gnss_poll_at;
        engine.gprs_poll_at = engine.gnss_poll_at;

        tokio::time::advance(Duration::from_secs(6)).await;
        engine.step().await.unwrap(); // hub resumes deferred liveness
        assert_eq!(engine.state, State::Liveness);
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::Idle);
        assert_eq!(engine.next_state, Some(State::Liveness));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_stream_request_reaches_modem() {
        let (mut engine, writes, _cycles, shared) = engine();
        boot(&mut engine).await;

        lock(&shared).gps_stream_start_requested = true;
        engine.step().await.unwrap(); // hub -> GnssStreamStart
        assert_eq!(engine.state, State::GnssStreamStart);
        assert!(!lock(&shared).gps_stream_start_requested);
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CGNSTST=1\n");
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap();
        assert_eq!(engine.state, State::Idle);

        lock(&shared).gps_stream_stop_requested = true;
        engine.step().await.unwrap(); // hub -> GnssStreamStop
        engine.step().await.unwrap();
        assert_eq!(last_write(&writes), "AT+CGNSTST=0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_error_keeps_lock_outside_http_init() {
        let (mut engine, _writes, _cycles, _shared) = engine();
        boot(&mut engine).await;

        engine.gnss_poll_req = true;
        engine.step().await.unwrap();
        engine.step().await.unwrap(); // AT+CGNSINF outstanding
        assert!(engine.channel.is_locked());

        // A bare ERROR is logged but does not free the channel; only the
        // timeout path recovers from a command that never acks.
        engine.feed(b"ERROR\r\n");
        assert!(engine.channel.is_locked());
        assert_eq!(engine.state, State::GnssAwait);

        engine.feed(b"OK\r\n");
        assert!(!engine.channel.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cme_error_releases_lock() {
        let (mut engine, _writes, _cycles, _shared) = engine();
        boot(&mut engine).await;

        engine.gnss_poll_req = true;
        engine.step().await.unwrap();
        engine.step().await.unwrap(); // AT+CGNSINF outstanding
        assert!(engine.channel.is_locked());

        engine.feed(b"+CME ERROR: 516\r\n");
        assert!(!engine.channel.is_locked());
    }
}
