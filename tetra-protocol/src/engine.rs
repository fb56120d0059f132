use log::{debug, info, trace, warn};
use tokio::sync::mpsc;

use crate::DeviceId;
use crate::calls::{CallCorrelator, DEFAULT_TALK_GROUPS, GroupActivity};
use crate::classify::{self, ClassifierConfig, Message, PositionReport};
use crate::lip::PositionFix;
use crate::reassembler::{Reassembler, Record, SdsRecord};
use crate::retry::{PositionRequest, RetryController, RetryOutcome, RetryPolicy, RetryState};
use crate::status::{self, CME_SDS_MAYBE_SENT, CellEntry, TerminalReport};
use crate::triggers::{TriggerAction, TriggerInput, TriggerRules};

/// Per-device engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub retry: RetryPolicy,
    /// Talk-groups that produce activity events.
    pub known_talk_groups: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            retry: RetryPolicy::default(),
            known_talk_groups: DEFAULT_TALK_GROUPS.iter().map(|tg| tg.to_string()).collect(),
        }
    }
}

/// Something the engine decoded or decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A terminal acknowledged one of our messages.
    Ack { from: Option<String> },
    Status {
        from: Option<String>,
        to: Option<String>,
        code: String,
    },
    Text {
        from: Option<String>,
        to: Option<String>,
        text: String,
    },
    /// A position with both coordinates.
    Position(PositionFix),
    /// A position without longitude.
    PartialPosition(PositionFix),
    /// A payload no rule could make sense of.
    Unrecognized { from: Option<String>, payload: String },
    /// A position re-request goes out after the retry delay.
    RetryScheduled { issi: String, attempt: u8 },
    /// Re-requests for this terminal are used up.
    RetryExhausted { issi: String },
    /// The sender expects an acknowledgement.
    AckRequested { to: String },
    /// A trigger rule fired.
    Trigger(TriggerAction),
    GroupActivity(GroupActivity),
    /// A status line of the terminal itself.
    Terminal(TerminalReport),
    /// One entry of a neighbour-cell list.
    Cell(CellEntry),
    /// The terminal reported an error after an SDS send that usually still
    /// reaches the network.
    SdsMaybeSent,
}

/// Decoding pipeline of one device.
///
/// Owns every piece of per-device state: the line reassembler, the call
/// correlator and the retry controller. Lines must be fed in arrival order.
/// Retry requests are delivered through the channel given to [`Engine::new`].
#[derive(Debug)]
pub struct Engine {
    device: DeviceId,
    classifier: ClassifierConfig,
    reassembler: Reassembler,
    calls: CallCorrelator,
    retries: RetryController,
    triggers: TriggerRules,
}

impl Engine {
    pub fn new(
        device: DeviceId,
        config: EngineConfig,
        triggers: TriggerRules,
        requests: mpsc::UnboundedSender<PositionRequest>,
    ) -> Self {
        Self {
            device,
            classifier: config.classifier,
            reassembler: Reassembler::new(),
            calls: CallCorrelator::new(device, config.known_talk_groups),
            retries: RetryController::new(device, config.retry, requests),
            triggers,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Process one line from the terminal (without terminator).
    pub fn feed(&mut self, line: &str) -> Vec<Event> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        trace!("[{}] RX {line}", self.device);

        let mut events = Vec::new();
        if let Some(activity) = self.calls.feed(line) {
            debug!(
                "[{}] activity on TG {} ({})",
                self.device,
                activity.talk_group,
                activity.issi.as_deref().unwrap_or("-")
            );
            events.push(Event::GroupActivity(activity));
        }

        match self.reassembler.feed(line) {
            Some(Record::Sds(record)) => self.handle_sds(&record, &mut events),
            Some(Record::CellEntry(entry)) => match status::parse_cell_entry(&entry) {
                Some(cell) => events.push(Event::Cell(cell)),
                None => debug!("[{}] unreadable cell entry: {entry}", self.device),
            },
            Some(Record::Line(line)) => match status::parse_line(&line) {
                Some(TerminalReport::CommandError {
                    code: CME_SDS_MAYBE_SENT,
                }) => {
                    info!("[{}] CME ERROR 35, SDS was probably sent anyway", self.device);
                    events.push(Event::SdsMaybeSent);
                }
                Some(report) => events.push(Event::Terminal(report)),
                None => {}
            },
            None => {}
        }
        events
    }

    /// Mark a user-initiated position request to `issi`. Any scheduled
    /// re-request is cancelled and the retry cycle starts over.
    pub fn request_position(&mut self, issi: &str) {
        self.retries.begin_request(issi);
    }

    /// Whether a re-request taken from the retry channel should still be
    /// sent. Requests superseded while queued are dropped.
    pub fn accept_retry(&mut self, request: &PositionRequest) -> bool {
        self.retries.accept(request)
    }

    pub fn retry_state(&self, issi: &str) -> RetryState {
        self.retries.state(issi)
    }

    /// Drop any half-assembled record, e.g. after the port reconnects.
    pub fn reset(&mut self) {
        self.reassembler.reset();
    }

    fn handle_sds(&mut self, record: &SdsRecord, events: &mut Vec<Event>) {
        let from = record.header.sender.clone();
        let to = record.header.destination.clone();
        let message = classify::classify(record, &self.classifier);

        match &message {
            Message::Ack => {
                debug!("[{}] ack from {}", self.device, display(&from));
                events.push(Event::Ack { from: from.clone() });
            }
            Message::Status { code } => {
                info!("[{}] status {code} from {}", self.device, display(&from));
                events.push(Event::Status {
                    from: from.clone(),
                    to: to.clone(),
                    code: code.clone(),
                });
                self.fire_triggers(Some(code), None, from.as_deref(), events);
            }
            Message::Text { text } => {
                info!("[{}] text from {}: {text}", self.device, display(&from));
                events.push(Event::Text {
                    from: from.clone(),
                    to: to.clone(),
                    text: text.clone(),
                });
                self.fire_triggers(None, Some(text), from.as_deref(), events);
            }
            Message::Position(report) => self.handle_position(report, from.as_deref(), events),
            Message::Unrecognized => {
                info!(
                    "[{}] unrecognized SDS from {}: {}",
                    self.device,
                    display(&from),
                    record.payload
                );
                events.push(Event::Unrecognized {
                    from: from.clone(),
                    payload: record.payload.clone(),
                });
            }
        }

        if message.expects_ack() {
            match from {
                Some(to) => events.push(Event::AckRequested { to }),
                None => warn!("[{}] SDS without sender, not acknowledged", self.device),
            }
        }
    }

    fn handle_position(
        &mut self,
        report: &PositionReport,
        from: Option<&str>,
        events: &mut Vec<Event>,
    ) {
        let complete = report.is_complete();
        match &report.primary {
            Some(fix) if complete => {
                info!("[{}] {fix}", self.device);
                events.push(Event::Position(fix.clone()));
            }
            Some(fix) => {
                warn!("[{}] incomplete {fix}", self.device);
                events.push(Event::PartialPosition(fix.clone()));
            }
            None => warn!("[{}] undecodable position from {}", self.device, from.unwrap_or("?")),
        }
        for fix in &report.supplementary {
            info!("[{}] {fix}", self.device);
            events.push(Event::Position(fix.clone()));
        }

        let Some(issi) = from else {
            warn!("[{}] position without sender, no retry handling", self.device);
            return;
        };
        if complete {
            self.retries.complete(issi);
            return;
        }
        let event = match self.retries.partial(issi) {
            RetryOutcome::Scheduled { attempt } => Event::RetryScheduled {
                issi: issi.to_string(),
                attempt,
            },
            RetryOutcome::Exhausted => Event::RetryExhausted {
                issi: issi.to_string(),
            },
        };
        events.push(event);
    }

    fn fire_triggers(
        &self,
        status: Option<&str>,
        text: Option<&str>,
        sender: Option<&str>,
        events: &mut Vec<Event>,
    ) {
        let input = TriggerInput {
            status,
            text,
            sender,
            device: self.device,
        };
        for action in self.triggers.matching(&input) {
            info!(
                "[{}] trigger fired: {} on device {}",
                self.device, action.automation, action.target_device
            );
            events.push(Event::Trigger(action));
        }
    }
}

fn display(issi: &Option<String>) -> &str {
    issi.as_deref().unwrap_or("?")
}
