//! System instructions sent to the voice model at session start.

use crate::fields::Field;
use callbridge_types::BusinessProfile;
use chrono::NaiveDate;
use std::fmt::Write;

/// Builds the agent persona for `profile`.
///
/// `today` is quoted so the model can resolve "tomorrow" the same way the
/// field extractor does.
pub fn instructions(profile: &BusinessProfile, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are {agent}, the phone receptionist for {business}. You are speaking with a caller on a live phone line.",
        agent = profile.agent_name,
        business = profile.name,
    );
    let _ = writeln!(
        out,
        "Today is {} ({}). Business hours: {}.",
        today.format("%Y-%m-%d"),
        today.format("%A"),
        profile.business_hours,
    );
    out.push_str(
        "Keep every reply to one or two short sentences. Ask one question at a time and never \
         ask again for something the caller already told you.\n",
    );

    out.push_str("\nCollect these details in order:\n");
    for (i, field) in Field::ORDER.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, describe(*field));
    }
    out.push_str(
        "During the call you will get notes starting \"Collected so far\". Trust them over \
         your own memory and ask for the field they name next.\n",
    );

    out.push_str(
        "\nWhen you have everything, read the appointment back once and call book_appointment. \
         Dates are YYYY-MM-DD and times are 24-hour HH:MM. Use check_availability if the caller \
         asks what is open. Call each tool once and wait for its result before saying it worked.\n",
    );
    out.push_str(
        "If the caller would rather leave a message or asks to be called back, take their name, \
         phone number and message, then call create_message.\n",
    );

    let emergency = profile.effective_emergency_keywords().join(", ");
    let _ = writeln!(
        out,
        "\nIf the caller describes an emergency (for example: {emergency}), tell them you are \
         connecting them to someone right away and call transfer_call with is_emergency set to true. \
         If they ask for a person, call transfer_call with is_emergency false."
    );
    out.push_str(
        "If a tool reports a failure, apologize, say someone will call them back, and keep \
         helping. Never invent appointment times or reference numbers.\n",
    );
    out
}

fn describe(field: Field) -> &'static str {
    match field {
        Field::ServiceType => "What problem they need help with",
        Field::Name => "Their full name",
        Field::Phone => "A callback phone number",
        Field::Address => "The service address",
        Field::PreferredTime => "The day and time they prefer for the visit",
    }
}
