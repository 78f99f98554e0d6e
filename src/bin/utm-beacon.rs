use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use utm_relay::config::Config;
use utm_relay::cookies::CookieState;
use utm_relay::models::{Event, Scope, TrackingContext};
use utm_relay::tracker::{TrackOutcome, Tracker};
use utm_relay::transport::ReqwestTransport;

#[derive(Parser)]
#[command(name = "utm-beacon")]
#[command(about = "Send a single tracking beacon from the command line", long_about = None)]
struct Cli {
    #[command(flatten)]
    visitor: VisitorArgs,

    /// Print the beacon without sending it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the full outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct VisitorArgs {
    /// Account id (overrides TRACKER_ACCOUNT)
    #[arg(long, global = true)]
    account: Option<String>,
    /// Host name the hit is reported for
    #[arg(long, global = true, default_value = "localhost")]
    host: String,
    #[arg(long, global = true)]
    referer: Option<String>,
    #[arg(long, global = true)]
    user_agent: Option<String>,
    #[arg(long, global = true)]
    accept_language: Option<String>,
    /// Visitor IPv4 address
    #[arg(long, global = true)]
    ip: Option<String>,
    /// Raw Cookie header carrying the visitor's tracking cookies
    #[arg(long, global = true)]
    cookies: Option<String>,
    /// Custom variable as index:name:value:scope (repeatable)
    #[arg(long = "custom-var", global = true)]
    custom_vars: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a page view
    PageView {
        /// Path or absolute URL of the page
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Track an event
    Event {
        category: String,
        action: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        value: Option<i64>,
        #[arg(long)]
        non_interaction: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(account) = &cli.visitor.account {
        config.tracker.set_option("account", account)?;
    }

    let mut context = TrackingContext::new(cli.visitor.host.as_str());
    if let Some(referer) = &cli.visitor.referer {
        context.set_document_referer(referer)?;
    }
    if let Some(user_agent) = &cli.visitor.user_agent {
        context.set_user_agent(user_agent.as_str());
    }
    if let Some(language) = &cli.visitor.accept_language {
        context.set_accept_language(language);
    }
    if let Some(ip) = &cli.visitor.ip {
        context.set_remote_address(ip)?;
    }
    let cookies = cli
        .visitor
        .cookies
        .as_deref()
        .map(CookieState::from_cookie_header)
        .unwrap_or_default();

    let mut tracker = Tracker::from_config(&config.tracker, context, cookies)?;
    for spec in &cli.visitor.custom_vars {
        let (index, name, value, scope) = parse_custom_var(spec)?;
        tracker.set_custom_var(&name, &value, scope, index)?;
    }
    if !cli.dry_run && config.transport.enabled {
        let transport = ReqwestTransport::new(Duration::from_secs(config.transport.timeout_secs))?;
        tracker = tracker.with_transport(Arc::new(transport));
    }

    let outcome = match cli.command {
        Commands::PageView { url, title } => {
            if let Some(title) = title {
                tracker.context_mut().set_page_title(title);
            }
            tracker.track_page_view(url.as_deref()).await?
        }
        Commands::Event {
            category,
            action,
            label,
            value,
            non_interaction,
        } => {
            let event = Event {
                category: Some(category),
                action: Some(action),
                label,
                value,
                non_interaction,
            };
            tracker.track_event(&event).await?
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match &outcome {
        TrackOutcome::Suppressed => println!("Visitor is a known bot, nothing sent"),
        TrackOutcome::Tracked(hit) => {
            for cookie in &hit.outbound_cookies {
                println!("Set-Cookie: {}", cookie.header_value());
            }
            println!("{}", hit.beacon.url);
        }
    }
    println!("outcome: {}", outcome.label());

    Ok(())
}

/// `index:name:value:scope`, where index may be empty for auto-assignment.
fn parse_custom_var(spec: &str) -> Result<(Option<u8>, String, String, Scope)> {
    let parts: Vec<&str> = spec.splitn(4, ':').collect();
    let [index, name, value, scope] = parts.as_slice() else {
        anyhow::bail!("custom variable '{spec}' must be index:name:value:scope");
    };
    let index = if index.is_empty() {
        None
    } else {
        Some(index.parse::<u8>().context("custom variable index must be a number")?)
    };
    let scope = Scope::try_from(scope.parse::<u8>().context("custom variable scope must be a number")?)?;
    Ok((index, name.to_string(), value.to_string(), scope))
}
