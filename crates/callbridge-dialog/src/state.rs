//! Per-call conversation state machine.
//!
//! The machine is driven by caller turns, by the model's own function calls
//! and by tool results. It never performs I/O: every transition returns a
//! [`Step`] describing the tool call to run and what the agent should say,
//! and the call session carries that out.

use crate::extract::{extract, Extracted};
use crate::fields::{CollectedFields, Field};
use crate::urgency::{KeywordSet, UrgencyMatch, SCAN_WINDOW};
use callbridge_tools::{
    BookAppointmentArgs, CreateMessageArgs, ToolCall, ToolName, ToolResult, TransferCallArgs,
};
use callbridge_types::{BusinessProfile, CallOutcome, Urgency};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Phrases that mean the caller wants a call back instead of a booking.
const MESSAGE_INTENTS: &[&str] = &[
    "leave a message",
    "take a message",
    "call me back",
    "have someone call",
    "give me a call",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    Collecting,
    Confirming,
    Booking,
    Transferring,
    MessageTaking,
    Closing,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Collecting => "collecting",
            Self::Confirming => "confirming",
            Self::Booking => "booking",
            Self::Transferring => "transferring",
            Self::MessageTaking => "message_taking",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    fn for_tool(tool: ToolName) -> Option<Self> {
        match tool {
            ToolName::BookAppointment => Some(Self::Booking),
            ToolName::TransferCall => Some(Self::Transferring),
            ToolName::CreateMessage => Some(Self::MessageTaking),
            ToolName::CheckAvailability => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Transcription confidence, when the model reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub reason: &'static str,
}

/// What the session should do after an input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// A tool call to submit. Side-effecting calls are emitted at most once
    /// per attempt.
    pub action: Option<ToolCall>,
    /// Guidance for the agent's next reply.
    pub say: Option<String>,
    /// Background for the model that does not call for a reply.
    pub note: Option<String>,
}

impl Step {
    pub fn none() -> Self {
        Self::default()
    }

    fn say(text: impl Into<String>) -> Self {
        Self {
            say: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.action.is_none() && self.say.is_none() && self.note.is_none()
    }
}

/// Verdict on a function call issued by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow(ToolCall),
    /// Not run; the reason is returned to the model as the tool output.
    Reject(String),
}

#[derive(Debug, Clone)]
pub struct Conversation {
    phase: Phase,
    fields: CollectedFields,
    /// Field the agent was last told to ask for.
    asked: Option<Field>,
    urgency: Urgency,
    turns: Vec<Turn>,
    history: Vec<Transition>,
    keywords: KeywordSet,
    today: NaiveDate,
    /// Caller turns before this index are no longer scanned for keywords.
    scan_floor: usize,
    /// Side-effecting tools submitted and not yet answered, oldest first.
    pending: Vec<ToolName>,
    booked: bool,
    book_attempts: u32,
    message_requested: bool,
    outcome: Option<CallOutcome>,
}

impl Conversation {
    pub fn new(profile: &BusinessProfile, today: NaiveDate) -> Self {
        Self {
            phase: Phase::Greeting,
            fields: CollectedFields::default(),
            asked: None,
            urgency: Urgency::Normal,
            turns: Vec::new(),
            history: Vec::new(),
            keywords: KeywordSet::from_profile(profile),
            today,
            scan_floor: 0,
            pending: Vec::new(),
            booked: false,
            book_attempts: 0,
            message_requested: false,
            outcome: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn fields(&self) -> &CollectedFields {
        &self.fields
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// The field the agent should ask for next.
    pub fn next_field(&self) -> Option<Field> {
        self.fields.next_missing()
    }

    /// True while a side-effecting tool call is awaiting its result.
    pub fn action_in_flight(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn outcome(&self) -> CallOutcome {
        self.outcome.unwrap_or(CallOutcome::Completed)
    }

    /// Marks the call as failed unless a business outcome was already reached.
    pub fn mark_failed(&mut self) {
        if self.outcome.is_none() {
            self.outcome = Some(CallOutcome::Failed);
        }
    }

    pub fn transcript_json(&self) -> Value {
        serde_json::to_value(&self.turns).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn close(&mut self) {
        self.transition(Phase::Closed, "call ended");
    }

    /// The greeting has been spoken.
    pub fn on_greeted(&mut self) {
        if self.phase == Phase::Greeting {
            self.transition(Phase::Collecting, "greeted");
        }
    }

    pub fn on_agent_turn(&mut self, text: &str, at: DateTime<Utc>) {
        if text.trim().is_empty() {
            return;
        }
        self.turns.push(Turn {
            speaker: Speaker::Agent,
            text: text.trim().to_string(),
            timestamp: at,
            confidence: None,
        });
    }

    /// Handles one transcribed caller utterance.
    pub fn on_caller_turn(&mut self, text: &str, confidence: Option<f32>, at: DateTime<Utc>) -> Step {
        if self.phase == Phase::Closed || text.trim().is_empty() {
            return Step::none();
        }
        self.turns.push(Turn {
            speaker: Speaker::Caller,
            text: text.trim().to_string(),
            timestamp: at,
            confidence,
        });
        self.on_greeted();

        if let Some(hit) = self.scan_urgency() {
            return self.escalate(hit);
        }

        let lower = text.to_lowercase();
        if MESSAGE_INTENTS.iter().any(|p| lower.contains(p)) {
            self.message_requested = true;
        }

        // A bare answer only counts for a field the agent has asked about.
        let expected = self.asked.filter(|f| !self.fields.has(*f));
        let found = extract(text, expected, self.today);
        self.absorb(found);

        if self.phase != Phase::Collecting {
            return Step::none();
        }
        if self.message_requested {
            let step = self.take_message();
            if step.action.is_some() {
                return step;
            }
        }
        if self.fields.is_complete() && self.book_attempts == 0 && !self.booked {
            return self.confirm_and_book();
        }
        self.steer()
    }

    /// Screens a function call the model issued on its own.
    pub fn on_function_call(&mut self, call: &ToolCall) -> Decision {
        if matches!(self.phase, Phase::Closing | Phase::Closed) && call.name().has_side_effects() {
            return Decision::Reject("The call is wrapping up; no further actions are needed.".to_string());
        }
        match call {
            ToolCall::CheckAvailability(_) => Decision::Allow(call.clone()),
            ToolCall::BookAppointment(args) => {
                self.absorb_booking(args);
                if self.booked {
                    return Decision::Reject(
                        "This appointment is already booked. Do not book it again.".to_string(),
                    );
                }
                if self.pending.contains(&ToolName::TransferCall) {
                    return Decision::Reject("The caller is being transferred.".to_string());
                }
                if self.pending.contains(&ToolName::BookAppointment) {
                    return Decision::Reject(
                        "A booking for this caller is already in progress. Wait for its result."
                            .to_string(),
                    );
                }
                self.begin(ToolName::BookAppointment, "model requested booking");
                Decision::Allow(call.clone())
            }
            ToolCall::CreateMessage(args) => {
                if self.fields.name.is_none() {
                    self.fields.name = Some(args.customer_name.clone());
                }
                if self.fields.phone.is_none() {
                    self.fields.phone = Some(args.customer_phone.clone());
                }
                if self.pending.contains(&ToolName::CreateMessage)
                    || self.outcome == Some(CallOutcome::MessageTaken)
                {
                    return Decision::Reject("The message has already been taken.".to_string());
                }
                self.begin(ToolName::CreateMessage, "model requested message");
                Decision::Allow(call.clone())
            }
            ToolCall::TransferCall(args) => {
                if self.pending.contains(&ToolName::TransferCall)
                    || self.outcome == Some(CallOutcome::Transferred)
                {
                    return Decision::Reject("A transfer is already in progress.".to_string());
                }
                self.raise(if args.is_emergency {
                    Urgency::Emergency
                } else {
                    Urgency::Urgent
                });
                self.begin(ToolName::TransferCall, "model requested transfer");
                Decision::Allow(call.clone())
            }
        }
    }

    /// A model function call failed argument validation.
    pub fn on_invalid_arguments(&mut self, tool: &str, reason: &str) -> Step {
        warn!(tool, reason, "invalid tool arguments");
        self.return_to_collecting("invalid tool arguments");
        Step::say(
            "Apologize briefly, confirm the details you still need with the caller, and try again.",
        )
    }

    /// Applies the result of a previously emitted or allowed tool call.
    pub fn on_action_result(&mut self, result: &ToolResult) -> Step {
        if let Some(i) = self.pending.iter().position(|t| *t == result.tool) {
            self.pending.remove(i);
        }
        let Some(phase) = Phase::for_tool(result.tool) else {
            return Step::none();
        };
        let current = self.phase == phase;

        if !result.success {
            info!(tool = %result.tool, "tool failed, returning to collection");
            if result.tool == ToolName::TransferCall {
                self.scan_floor = self.caller_turns().count();
            }
            if current {
                self.return_to_collecting("tool failed");
            }
            return Step::say(format!(
                "Tell the caller: \"{}\" Then keep helping them.",
                result.spoken_message
            ));
        }

        let outcome = match result.tool {
            ToolName::BookAppointment => {
                self.booked = true;
                CallOutcome::Booked
            }
            ToolName::CreateMessage => CallOutcome::MessageTaken,
            ToolName::TransferCall => CallOutcome::Transferred,
            ToolName::CheckAvailability => return Step::none(),
        };
        // A transfer outranks a booking or message that finished after it started.
        if self.outcome != Some(CallOutcome::Transferred) {
            self.outcome = Some(outcome);
        }
        if current {
            self.transition(Phase::Closing, "tool succeeded");
        }
        Step::say(format!(
            "Tell the caller: \"{}\" Then ask if there is anything else.",
            result.spoken_message
        ))
    }

    fn caller_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.speaker == Speaker::Caller)
    }

    fn scan_urgency(&self) -> Option<UrgencyMatch> {
        if matches!(self.phase, Phase::Transferring | Phase::Closing | Phase::Closed)
            || self.pending.contains(&ToolName::TransferCall)
            || self.outcome == Some(CallOutcome::Transferred)
        {
            return None;
        }
        let recent: Vec<&str> = self
            .caller_turns()
            .skip(self.scan_floor)
            .map(|t| t.text.as_str())
            .collect();
        let start = recent.len().saturating_sub(SCAN_WINDOW);
        self.keywords.scan(recent[start..].iter().copied())
    }

    fn escalate(&mut self, hit: UrgencyMatch) -> Step {
        let emergency = hit.urgency == Urgency::Emergency;
        info!(keyword = %hit.keyword, urgency = hit.urgency.as_str(), "urgency keyword matched");
        self.raise(hit.urgency);
        self.begin(ToolName::TransferCall, "urgency keyword");
        let reason = if emergency {
            format!("Caller reported an emergency ({})", hit.keyword)
        } else {
            format!("Caller asked for a person ({})", hit.keyword)
        };
        let say = if emergency {
            "Tell the caller you understand this is an emergency and you are connecting them to someone right now."
        } else {
            "Tell the caller you are connecting them to a member of the team now."
        };
        Step {
            action: Some(ToolCall::TransferCall(TransferCallArgs {
                reason,
                is_emergency: emergency,
            })),
            say: Some(say.to_string()),
            ..Step::default()
        }
    }

    /// Points the model at the next missing field once it changes, so each
    /// field is asked for once and in order.
    fn steer(&mut self) -> Step {
        let next = self.next_field();
        if next == self.asked {
            return Step::none();
        }
        self.asked = next;
        let Some(field) = next else {
            return Step::none();
        };
        debug!(field = field.as_str(), "steering to next field");
        Step {
            note: Some(format!(
                "Collected so far: {}. Do not ask for these again. Next needed: {}. {}",
                self.fields.summary(),
                field.as_str(),
                field.question()
            )),
            ..Step::default()
        }
    }

    fn confirm_and_book(&mut self) -> Step {
        self.transition(Phase::Confirming, "all fields collected");
        let Some(date) = self.fields.date else {
            self.return_to_collecting("missing date");
            return Step::none();
        };
        if date < self.today {
            self.fields.date = None;
            self.fields.time = None;
            self.return_to_collecting("date in the past");
            return Step::say("That date has already passed. Ask the caller for another day.");
        }
        let (Some(name), Some(phone), Some(address), Some(service)) = (
            self.fields.name.clone(),
            self.fields.phone.clone(),
            self.fields.address.clone(),
            self.fields.service_type.clone(),
        ) else {
            self.return_to_collecting("missing fields");
            return Step::none();
        };
        let (time, notes) = match self.fields.time {
            Some(t) => (t, None),
            None => (
                NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
                Some("Caller gave no time preference.".to_string()),
            ),
        };
        let call = ToolCall::BookAppointment(BookAppointmentArgs {
            customer_name: name,
            customer_phone: phone,
            customer_address: address,
            service_type: service,
            date: date.format("%Y-%m-%d").to_string(),
            time: time.format("%H:%M").to_string(),
            notes,
        });
        if let Err(e) = call.validate() {
            debug!(error = %e, "collected fields do not form a valid booking");
            self.return_to_collecting("collected fields invalid");
            return Step::say("Confirm the caller's phone number and address, one at a time.");
        }
        self.begin(ToolName::BookAppointment, "booking confirmed");
        Step {
            action: Some(call),
            say: Some(format!(
                "Tell the caller you are booking their visit for {} at {} and it will just take a moment.",
                date.format("%A, %B %-d"),
                time.format("%-I:%M %p"),
            )),
            ..Step::default()
        }
    }

    fn take_message(&mut self) -> Step {
        let (Some(name), Some(phone)) = (self.fields.name.clone(), self.fields.phone.clone()) else {
            return Step::none();
        };
        if self.pending.contains(&ToolName::CreateMessage) {
            return Step::none();
        }
        self.message_requested = false;
        let message = self
            .fields
            .service_type
            .clone()
            .or_else(|| {
                self.caller_turns()
                    .last()
                    .map(|t| t.text.clone())
            })
            .unwrap_or_default();
        self.begin(ToolName::CreateMessage, "caller asked for a call back");
        Step {
            action: Some(ToolCall::CreateMessage(CreateMessageArgs {
                customer_name: name,
                customer_phone: phone,
                message,
                urgency: self.urgency,
            })),
            say: Some("Tell the caller you are passing their message along.".to_string()),
            ..Step::default()
        }
    }

    fn absorb(&mut self, found: Extracted) {
        if found.is_empty() {
            return;
        }
        // Only the turn that first describes the problem is read this way.
        let describes_problem = found.service_type.is_some() && self.fields.service_type.is_none();
        let f = &mut self.fields;
        fill(&mut f.service_type, found.service_type);
        fill(&mut f.name, found.name);
        fill(&mut f.phone, found.phone);
        fill(&mut f.address, found.address);
        // "it stopped working today" describes the problem, not a visit time.
        if !describes_problem {
            if found.date.is_some() {
                f.date = found.date;
                f.time = found.time.or(f.time);
            } else if found.time.is_some() && f.date.is_some() {
                f.time = found.time;
            }
        }
        debug!(missing = ?self.fields.missing(), "fields updated");
    }

    fn absorb_booking(&mut self, args: &BookAppointmentArgs) {
        let f = &mut self.fields;
        f.name = Some(args.customer_name.clone());
        f.phone = Some(args.customer_phone.clone());
        f.address = Some(args.customer_address.clone());
        f.service_type = Some(args.service_type.clone());
        if let Ok(date) = NaiveDate::parse_from_str(&args.date, "%Y-%m-%d") {
            f.date = Some(date);
        }
        if let Ok(time) = NaiveTime::parse_from_str(&args.time, "%H:%M") {
            f.time = Some(time);
        }
    }

    fn begin(&mut self, tool: ToolName, reason: &'static str) {
        if tool == ToolName::BookAppointment {
            self.book_attempts += 1;
        }
        self.pending.push(tool);
        if let Some(phase) = Phase::for_tool(tool) {
            // An active transfer is not displaced by a later booking or message.
            if self.phase != Phase::Transferring || phase == Phase::Transferring {
                self.transition(phase, reason);
            }
        }
    }

    fn raise(&mut self, urgency: Urgency) {
        let rank = |u: Urgency| match u {
            Urgency::Normal => 0,
            Urgency::Urgent => 1,
            Urgency::Emergency => 2,
        };
        if rank(urgency) > rank(self.urgency) {
            self.urgency = urgency;
        }
    }

    fn return_to_collecting(&mut self, reason: &'static str) {
        if !matches!(self.phase, Phase::Closing | Phase::Closed) {
            self.transition(Phase::Collecting, reason);
        }
    }

    fn transition(&mut self, to: Phase, reason: &'static str) {
        if self.phase == to || self.phase == Phase::Closed {
            return;
        }
        debug!(from = self.phase.as_str(), to = to.as_str(), reason, "phase transition");
        self.history.push(Transition {
            from: self.phase,
            to,
            reason,
        });
        self.phase = to;
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_types::{TurnDetection, VoiceSettings};
    use serde_json::json;

    fn profile() -> BusinessProfile {
        BusinessProfile {
            business_id: "acme-hvac".to_string(),
            name: "Acme Heating & Air".to_string(),
            phone_number: "+15550100".to_string(),
            agent_name: "Sam".to_string(),
            greeting: "Thanks for calling Acme.".to_string(),
            business_hours: "Mon-Fri 8am-6pm".to_string(),
            emergency_keywords: vec![],
            transfer_keywords: vec![],
            emergency_transfer_number: None,
            voice: VoiceSettings::default(),
            turn_detection: TurnDetection::default(),
        }
    }

    fn convo() -> Conversation {
        Conversation::new(&profile(), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap())
    }

    fn result(tool: ToolName, success: bool) -> ToolResult {
        ToolResult {
            tool,
            success,
            spoken_message: "done".to_string(),
            reference_id: None,
            data: Value::Null,
        }
    }

    fn booking_call() -> ToolCall {
        ToolCall::parse(
            "book_appointment",
            &json!({
                "customer_name": "Dana Reyes",
                "customer_phone": "5558675309",
                "customer_address": "42 Maple Street",
                "service_type": "AC repair",
                "date": "2026-10-18",
                "time": "14:00"
            }),
        )
        .unwrap()
    }

    #[test]
    fn first_caller_turn_leaves_greeting() {
        let mut c = convo();
        assert_eq!(c.phase(), Phase::Greeting);
        let step = c.on_caller_turn("hello?", None, Utc::now());
        assert!(step.action.is_none());
        assert_eq!(c.phase(), Phase::Collecting);
        assert_eq!(c.next_field(), Some(Field::ServiceType));
        let note = step.note.unwrap();
        assert!(note.contains("nothing yet"));
        assert!(note.contains(Field::ServiceType.question()));
    }

    #[test]
    fn small_talk_is_not_taken_as_the_problem() {
        let mut c = convo();
        let turns = [
            "Hi there, how are you",
            "My name is Dana Reyes.",
            "It's 555 867 5309.",
            "I'm at 42 Maple Street.",
            "Tomorrow afternoon works.",
        ];
        for text in turns {
            assert!(c.on_caller_turn(text, None, Utc::now()).action.is_none());
        }
        assert!(c.fields().service_type.is_none());
        assert_eq!(c.next_field(), Some(Field::ServiceType));
        assert_eq!(c.phase(), Phase::Collecting);

        // Once asked, a plain description is accepted and the visit is booked.
        let step = c.on_caller_turn("Yeah it keeps shutting off at night", None, Utc::now());
        match step.action {
            Some(ToolCall::BookAppointment(args)) => {
                assert_eq!(args.service_type, "Yeah it keeps shutting off at night");
                assert_eq!(args.customer_name, "Dana Reyes");
                assert_eq!(args.date, "2026-10-18");
            }
            other => panic!("expected a booking, got {other:?}"),
        }
    }

    #[test]
    fn visit_time_turn_naming_the_appliance_keeps_the_date() {
        let mut c = convo();
        c.on_caller_turn("My furnace is making a banging noise.", None, Utc::now());
        c.on_caller_turn("My name is Dana Reyes.", None, Utc::now());
        c.on_caller_turn("It's 555 867 5309.", None, Utc::now());
        c.on_caller_turn("I'm at 42 Maple Street.", None, Utc::now());
        let step = c.on_caller_turn(
            "Can you come tomorrow afternoon to fix the furnace?",
            None,
            Utc::now(),
        );
        match step.action {
            Some(ToolCall::BookAppointment(args)) => {
                assert_eq!(args.date, "2026-10-18");
                assert_eq!(args.time, "14:00");
                assert_eq!(args.service_type, "My furnace is making a banging noise");
            }
            other => panic!("expected a booking, got {other:?}"),
        }
        assert_eq!(c.phase(), Phase::Booking);
    }

    #[test]
    fn each_missing_field_is_steered_once_in_order() {
        let mut c = convo();
        let note = |step: Step| step.note.unwrap_or_default();

        let first = note(c.on_caller_turn("my AC is broken", None, Utc::now()));
        assert!(first.contains("problem \"my AC is broken\""));
        assert!(first.contains("Next needed: name. Ask for their name."));

        // The caller talks around the question; the agent is not told again.
        assert!(c.on_caller_turn("it's been a rough week", None, Utc::now()).is_empty());

        let second = note(c.on_caller_turn("this is Dana", None, Utc::now()));
        assert!(second.contains("name Dana"));
        assert!(second.contains("Next needed: phone."));

        // Volunteering a later field skips ahead without re-asking earlier ones.
        let third = note(c.on_caller_turn("5558675309, and I'm at 42 Maple Street", None, Utc::now()));
        assert!(third.contains("Next needed: preferred_time."));
    }

    #[test]
    fn problem_statement_does_not_set_visit_date() {
        let mut c = convo();
        c.on_caller_turn("my heater stopped working today", None, Utc::now());
        assert!(c.fields().service_type.is_some());
        assert!(c.fields().date.is_none());
    }

    #[test]
    fn transfer_keyword_is_urgent_not_emergency() {
        let mut c = convo();
        let step = c.on_caller_turn("can I talk to a real person", None, Utc::now());
        assert_eq!(c.phase(), Phase::Transferring);
        assert_eq!(c.urgency(), Urgency::Urgent);
        match step.action {
            Some(ToolCall::TransferCall(args)) => assert!(!args.is_emergency),
            other => panic!("expected transfer, got {other:?}"),
        }
    }

    #[test]
    fn failed_transfer_does_not_retrigger_on_same_turns() {
        let mut c = convo();
        c.on_caller_turn("I want a real person", None, Utc::now());
        c.on_action_result(&result(ToolName::TransferCall, false));
        assert_eq!(c.phase(), Phase::Collecting);

        let step = c.on_caller_turn("ok fine", None, Utc::now());
        assert!(step.action.is_none());
        assert_eq!(c.phase(), Phase::Collecting);
    }

    #[test]
    fn duplicate_model_booking_is_rejected() {
        let mut c = convo();
        c.on_greeted();
        assert!(matches!(c.on_function_call(&booking_call()), Decision::Allow(_)));
        assert_eq!(c.phase(), Phase::Booking);
        assert!(matches!(c.on_function_call(&booking_call()), Decision::Reject(_)));

        c.on_action_result(&result(ToolName::BookAppointment, true));
        assert_eq!(c.phase(), Phase::Closing);
        assert_eq!(c.outcome(), CallOutcome::Booked);
        assert!(matches!(c.on_function_call(&booking_call()), Decision::Reject(_)));
    }

    #[test]
    fn availability_checks_are_always_allowed_and_change_nothing() {
        let mut c = convo();
        c.on_greeted();
        let call = ToolCall::parse("check_availability", &json!({ "date": "2026-10-19" })).unwrap();
        assert!(matches!(c.on_function_call(&call), Decision::Allow(_)));
        assert!(!c.action_in_flight());
        let step = c.on_action_result(&result(ToolName::CheckAvailability, true));
        assert!(step.is_empty());
        assert_eq!(c.phase(), Phase::Collecting);
    }

    #[test]
    fn invalid_arguments_return_to_collecting() {
        let mut c = convo();
        c.on_greeted();
        c.on_function_call(&booking_call());
        c.on_action_result(&result(ToolName::BookAppointment, false));
        let step = c.on_invalid_arguments("book_appointment", "date must be YYYY-MM-DD");
        assert_eq!(c.phase(), Phase::Collecting);
        assert!(step.say.is_some());
    }

    #[test]
    fn message_request_is_taken_once_name_and_phone_are_known() {
        let mut c = convo();
        c.on_caller_turn("my furnace is making a noise, can someone call me back", None, Utc::now());
        assert_eq!(c.phase(), Phase::Collecting);
        c.on_caller_turn("my name is Lee Park", None, Utc::now());
        let step = c.on_caller_turn("555 010 0199 22", None, Utc::now());
        match step.action {
            Some(ToolCall::CreateMessage(args)) => {
                assert_eq!(args.customer_name, "Lee Park");
                assert_eq!(args.customer_phone, "555010019922");
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(c.phase(), Phase::MessageTaking);
        c.on_action_result(&result(ToolName::CreateMessage, true));
        assert_eq!(c.outcome(), CallOutcome::MessageTaken);
    }

    #[test]
    fn past_date_goes_back_to_collecting() {
        let mut c = convo();
        c.on_caller_turn("my AC is broken", None, Utc::now());
        c.on_caller_turn("my name is Dana", None, Utc::now());
        c.on_caller_turn("5558675309", None, Utc::now());
        c.on_caller_turn("42 Maple Street", None, Utc::now());
        let step = c.on_caller_turn("2026-10-01 at 10am", None, Utc::now());
        assert!(step.action.is_none());
        assert_eq!(c.phase(), Phase::Collecting);
        assert!(c.fields().date.is_none());
        assert!(c
            .history()
            .iter()
            .any(|t| t.from == Phase::Confirming && t.to == Phase::Collecting));
    }

    #[test]
    fn transcript_serializes_turns_in_order() {
        let mut c = convo();
        let at = Utc::now();
        c.on_agent_turn("Thanks for calling Acme.", at);
        c.on_caller_turn("hi there", Some(0.92), at);
        let json = c.transcript_json();
        assert_eq!(json[0]["speaker"], "agent");
        assert_eq!(json[1]["speaker"], "caller");
        assert_eq!(json[1]["text"], "hi there");
        assert!(json[0].get("confidence").is_none());
    }

    #[test]
    fn closed_conversation_ignores_input() {
        let mut c = convo();
        c.close();
        assert!(c.on_caller_turn("there's a gas leak", None, Utc::now()).is_empty());
        assert_eq!(c.phase(), Phase::Closed);
        assert_eq!(c.outcome(), CallOutcome::Completed);
    }
}
