//! Request validation performed before anything is sent

use hitl_common::{duplicate_option_name, CallId, ContactChannel, EmailRecipient, Escalation, FunctionCallSpec, HumanContactSpec, ResponseOption};

use crate::error::{ApprovalError, Result};

/// Validate a call or contact id
pub fn validate_call_id(id: &CallId) -> Result<()> {
    if id.is_empty() {
        return Err(ApprovalError::validation("call_id", "must not be empty"));
    }
    if id.as_str().contains(['/', '?', '#']) {
        return Err(ApprovalError::validation("call_id", "must not contain '/', '?' or '#'"));
    }
    Ok(())
}

/// Validate a contact channel: exactly one target, with a non-empty address
pub fn validate_channel(field: &str, channel: &ContactChannel) -> Result<()> {
    match channel.target_count() {
        0 => {
            return Err(ApprovalError::validation(
                field,
                "no delivery target (set email or slack)",
            ))
        }
        1 => {}
        _ => {
            return Err(ApprovalError::validation(
                field,
                "exactly one delivery target must be set",
            ))
        }
    }

    if let Some(email) = &channel.email {
        if email.address.trim().is_empty() {
            return Err(ApprovalError::validation(
                format!("{}.email.address", field),
                "must not be empty",
            ));
        }
        if let Some(recipients) = &email.additional_recipients {
            validate_recipients(&format!("{}.email.additional_recipients", field), recipients)?;
        }
    }
    if let Some(slack) = &channel.slack {
        if slack.channel_or_user_id.trim().is_empty() {
            return Err(ApprovalError::validation(
                format!("{}.slack.channel_or_user_id", field),
                "must not be empty",
            ));
        }
    }
    Ok(())
}

fn validate_recipients(field: &str, recipients: &[EmailRecipient]) -> Result<()> {
    if let Some(pos) = recipients.iter().position(|r| r.address.trim().is_empty()) {
        return Err(ApprovalError::validation(
            format!("{}[{}].address", field, pos),
            "must not be empty",
        ));
    }
    Ok(())
}

fn validate_options(field: &str, options: &[ResponseOption]) -> Result<()> {
    if let Some(pos) = options.iter().position(|o| o.name.trim().is_empty()) {
        return Err(ApprovalError::validation(
            format!("{}[{}].name", field, pos),
            "must not be empty",
        ));
    }
    if let Some(name) = duplicate_option_name(options) {
        return Err(ApprovalError::validation(
            field,
            format!("duplicate option name '{}'", name),
        ));
    }
    Ok(())
}

/// Validate a function call spec whose channel has already been resolved
pub fn validate_function_call_spec(spec: &FunctionCallSpec) -> Result<()> {
    if spec.fn_name.trim().is_empty() {
        return Err(ApprovalError::validation("spec.fn", "must not be empty"));
    }

    match &spec.channel {
        Some(channel) => validate_channel("spec.channel", channel)?,
        None => {
            return Err(ApprovalError::validation(
                "spec.channel",
                "no contact channel given and no default configured",
            ))
        }
    }

    if let Some(options) = &spec.reject_options {
        validate_options("spec.reject_options", options)?;
    }
    Ok(())
}

pub fn validate_human_contact_spec(spec: &HumanContactSpec) -> Result<()> {
    if spec.msg.trim().is_empty() {
        return Err(ApprovalError::validation("spec.msg", "must not be empty"));
    }

    match &spec.channel {
        Some(channel) => validate_channel("spec.channel", channel)?,
        None => {
            return Err(ApprovalError::validation(
                "spec.channel",
                "no contact channel given and no default configured",
            ))
        }
    }

    if let Some(options) = &spec.response_options {
        validate_options("spec.response_options", options)?;
    }
    Ok(())
}

/// An escalation needs a message and somewhere new to send it
pub fn validate_escalation(escalation: &Escalation) -> Result<()> {
    if escalation.escalation_msg.trim().is_empty() {
        return Err(ApprovalError::validation("escalation_msg", "must not be empty"));
    }

    let recipients = escalation.additional_recipients.as_deref().unwrap_or_default();
    if recipients.is_empty() && escalation.channel.is_none() {
        return Err(ApprovalError::validation(
            "additional_recipients",
            "at least one recipient or a channel is required",
        ));
    }

    validate_recipients("additional_recipients", recipients)?;
    if let Some(channel) = &escalation.channel {
        validate_channel("channel", channel)?;
    }
    Ok(())
}
