//! Subcommand implementations
//!
//! Every command writes its result as JSON to the given writer so the binary
//! can be scripted; diagnostics go to stderr through `tracing`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::StreamExt;
use hitl_client::{ApprovalClient, EventFilter, SubscriptionHooks};
use hitl_common::{
    CallId, ClientConfig, ContactChannel, EmailRecipient, Escalation, FunctionCallSpec,
    HumanContactResponse, HumanContactSpec, RecipientField, SlackContactChannel,
};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::args::{ChannelArgs, Cli, Commands, ConfigAction, EscalationArgs};
use crate::display::{print_json, print_json_line};
use crate::{completions, interactive};

/// Resolve the configuration: file, environment, then command-line flags
pub fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|p| p.exists()),
    };
    if let Some(path) = &path {
        debug!("loading configuration from {}", path.display());
    }

    let mut config = ClientConfig::load(path.as_deref())?;
    if let Some(base) = &cli.api_base {
        config.api_base_url = base.clone();
    }
    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(run_id) = &cli.run_id {
        config.run_id = Some(run_id.clone());
    }
    if let Some(retries) = cli.retries {
        config.retry.max_attempts = retries;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| ClientConfig::default_path(&dir))
}

/// Run one subcommand, writing its output to `out`
pub async fn run<W: Write>(cli: Cli, config: ClientConfig, out: &mut W) -> anyhow::Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            completions::generate(shell, out);
            Ok(())
        }
        Commands::Config { action } => run_config(action, &config, out),
        command => {
            let client = ApprovalClient::new(&config)?;
            if client.retry_policy().is_enabled() {
                debug!("retrying up to {} attempts", client.retry_policy().max_attempts);
            }
            run_client_command(command, &client, out).await
        }
    }
}

async fn run_client_command<W: Write>(
    command: Commands,
    client: &ApprovalClient,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Commands::Create {
            fn_name,
            kwargs,
            args,
            channel,
            wait,
        } => {
            let spec = FunctionCallSpec {
                fn_name,
                kwargs: parse_kwargs(kwargs.as_deref(), &args)?,
                channel: channel_from(&channel),
                reject_options: None,
                state: None,
            };
            let call = client.create_function_call(spec).await?;
            if wait {
                info!("waiting for a decision on {}", call.call_id);
                let cancel = cancel_on_ctrl_c();
                let decision = client.wait_for_decision(&call.call_id, None, &cancel).await?;
                print_json(out, &json!({"call": call, "decision": decision}))
            } else {
                print_json(out, &call)
            }
        }

        Commands::Get { call_id } => {
            let call = client.get_function_call(&CallId::new(call_id)).await?;
            print_json(out, &call)
        }

        Commands::Decision { call_id } => {
            let status = client.fetch_decision(&CallId::new(call_id)).await?;
            print_json(out, &status)
        }

        Commands::Wait {
            call_id,
            interval_ms,
        } => {
            let cancel = cancel_on_ctrl_c();
            let decision = client
                .wait_for_decision(
                    &CallId::new(call_id),
                    interval_ms.map(Duration::from_millis),
                    &cancel,
                )
                .await?;
            print_json(out, &decision)
        }

        Commands::Escalate {
            call_id,
            escalation,
        } => {
            let call = client
                .escalate_function_call(&CallId::new(call_id), &escalation_from(&escalation))
                .await?;
            print_json(out, &call)
        }

        Commands::Approve { call_id, comment } => {
            let call = client
                .approve_function_call(&CallId::new(call_id), comment)
                .await?;
            print_json(out, &call)
        }

        Commands::Deny { call_id, reason } => {
            let call = client
                .deny_function_call(&CallId::new(call_id), reason)
                .await?;
            print_json(out, &call)
        }

        Commands::Pending { contacts } => {
            if contacts {
                print_json(out, &client.pending_human_contacts().await?)
            } else {
                print_json(out, &client.pending_function_calls().await?)
            }
        }

        Commands::Contact {
            msg,
            subject,
            channel,
            wait,
        } => {
            let spec = HumanContactSpec {
                subject,
                channel: channel_from(&channel),
                ..HumanContactSpec::new(msg)
            };
            let contact = client.create_human_contact(spec).await?;
            if wait {
                let cancel = cancel_on_ctrl_c();
                let response = client
                    .wait_for_response(&contact.call_id, None, &cancel)
                    .await?;
                print_json(out, &json!({"contact": contact, "response": response}))
            } else {
                print_json(out, &contact)
            }
        }

        Commands::ContactGet { call_id } => {
            let contact = client.get_human_contact(&CallId::new(call_id)).await?;
            print_json(out, &contact)
        }

        Commands::ContactEscalate {
            call_id,
            escalation,
        } => {
            let contact = client
                .escalate_human_contact(&CallId::new(call_id), &escalation_from(&escalation))
                .await?;
            print_json(out, &contact)
        }

        Commands::Respond {
            call_id,
            response,
            option,
        } => {
            let body = HumanContactResponse {
                response,
                response_option_name: option,
            };
            let contact = client
                .respond_to_human_contact(&CallId::new(call_id), &body)
                .await?;
            print_json(out, &contact)
        }

        Commands::Watch {
            types,
            session,
            for_run,
        } => {
            let mut filter = EventFilter::types(types);
            filter.session_id = session;
            filter.run_id = for_run;
            watch(client, filter, out).await
        }

        Commands::Review => interactive::run(client, out).await,

        Commands::Config { .. } | Commands::Completions { .. } => {
            bail!("command does not use the approval service")
        }
    }
}

/// Logs connection changes on stderr
struct LogHooks;

impl SubscriptionHooks for LogHooks {
    fn on_connect(&self) {
        info!("watching events");
    }

    fn on_disconnect(&self, reason: &str) {
        warn!("event stream disconnected: {}", reason);
    }
}

async fn watch<W: Write>(client: &ApprovalClient, filter: EventFilter, out: &mut W) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrl_c();
    let events = client.event_stream();
    let stream = events.subscribe(filter, Arc::new(LogHooks), cancel)?;
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        print_json_line(out, &event?)?;
    }
    Ok(())
}

fn run_config<W: Write>(action: ConfigAction, config: &ClientConfig, out: &mut W) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            write!(out, "{}", config.to_toml_string()?)?;
            Ok(())
        }
        ConfigAction::Init { path, force } => {
            let path = match path.or_else(default_config_path) {
                Some(path) => path,
                None => bail!("no configuration directory on this platform; pass --path"),
            };
            init_config(&path, force)?;
            writeln!(out, "wrote {}", path.display())?;
            Ok(())
        }
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, ClientConfig::generate_example())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Build kwargs from a JSON object plus `key=value` pairs.
///
/// Pair values that parse as JSON keep their type (`x=2` is a number);
/// anything else is a string.
pub fn parse_kwargs(json: Option<&str>, pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut kwargs = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--kwargs is not valid JSON")? {
            Value::Object(map) => map,
            other => bail!("--kwargs must be a JSON object, got {}", other),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--arg expects KEY=VALUE, got '{}'", pair);
        };
        if key.trim().is_empty() {
            bail!("--arg has an empty key in '{}'", pair);
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        kwargs.insert(key.trim().to_string(), value);
    }
    Ok(kwargs)
}

/// `None` leaves the choice to the configured default channel
pub fn channel_from(args: &ChannelArgs) -> Option<ContactChannel> {
    if args.email.is_none() && args.slack.is_none() {
        return None;
    }
    let mut channel = args
        .email
        .as_ref()
        .map(ContactChannel::email)
        .unwrap_or_default();
    channel.slack = args.slack.as_ref().map(|id| SlackContactChannel {
        channel_or_user_id: id.clone(),
        ..Default::default()
    });
    Some(channel)
}

pub fn escalation_from(args: &EscalationArgs) -> Escalation {
    let recipients: Vec<EmailRecipient> = [
        (RecipientField::To, &args.to),
        (RecipientField::Cc, &args.cc),
        (RecipientField::Bcc, &args.bcc),
    ]
    .into_iter()
    .flat_map(|(field, addresses)| {
        addresses.iter().map(move |address| EmailRecipient {
            address: address.clone(),
            field,
        })
    })
    .collect();

    Escalation {
        escalation_msg: args.msg.clone(),
        additional_recipients: (!recipients.is_empty()).then_some(recipients),
        channel: args.email.as_ref().map(ContactChannel::email),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            token.cancel();
        }
    });
    cancel
}
