//! Site command handlers.

use std::fmt::Write;
use std::time::Duration;

use chrono::Utc;
use tabled::Tabled;
use tracing::debug;
use wpfleet_core::{CoreError, DeleteOutcome, Site, SiteId, SyncClient};

use crate::cli::{GlobalOpts, OutputFormat, SitesArgs, SitesCommand, WaitArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl SiteRow {
    fn new(site: &Site, color: bool) -> Self {
        Self {
            id: site.id.to_string(),
            name: site.name.clone(),
            status: output::status_label(site.status, color),
            port: site.port.map(|p| p.to_string()).unwrap_or_default(),
            url: site.url.clone().unwrap_or_default(),
            created: age(site),
            error: site.error.clone().unwrap_or_default(),
        }
    }
}

/// "3m ago", to the second.
fn age(site: &Site) -> String {
    let elapsed = (Utc::now() - site.created_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    let secs = Duration::from_secs(elapsed.as_secs());
    format!("{} ago", humantime::format_duration(secs))
}

fn detail(site: &Site, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ID:          {}", site.id);
    let _ = writeln!(out, "Name:        {}", site.name);
    let _ = writeln!(out, "Description: {}", site.description);
    let _ = writeln!(
        out,
        "Status:      {}",
        output::status_label(site.status, color)
    );
    if let Some(port) = site.port {
        let _ = writeln!(out, "Port:        {port}");
    }
    if let Some(url) = &site.url {
        let _ = writeln!(out, "URL:         {url}");
    }
    let _ = write!(
        out,
        "Created:     {}",
        site.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(error) = &site.error {
        let _ = write!(out, "\nError:       {error}");
    }
    out
}

fn print_site(site: &Site, global: &GlobalOpts) {
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        site,
        |s| detail(s, color),
        |s| s.id.to_string(),
    );
    output::print_output(&out, global.quiet);
}

fn print_sites(sites: &[Site], global: &GlobalOpts) {
    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        sites,
        |s| SiteRow::new(s, color),
        |s| s.id.to_string(),
    );
    output::print_output(&out, global.quiet);
}

// ── Waiting ─────────────────────────────────────────────────────────

async fn wait_for(
    client: &SyncClient,
    id: &SiteId,
    wait: &WaitArgs,
    global: &GlobalOpts,
    done: impl Fn(&Site) -> bool,
) -> Result<Site, CliError> {
    let pb = output::spinner(&format!("Waiting for site {id}..."), global.quiet);
    let result = client.wait_until(id, wait.wait_timeout, done).await;
    pb.finish_and_clear();
    match result {
        Ok(site) => Ok(site),
        Err(CoreError::Timeout { .. }) => Err(CliError::WaitTimeout {
            id: id.to_string(),
            seconds: wait.wait_timeout.as_secs(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// The view's copy of `id` after a command refreshed it, or a fresh read.
async fn current(client: &SyncClient, id: &SiteId) -> Result<Site, CliError> {
    if let Some(site) = client.snapshot().find(id) {
        return Ok(site.clone());
    }
    Ok(client.get(id).await?)
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &SyncClient,
    args: SitesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SitesCommand::List => {
            let snapshot = client.fetch_all().await?;
            if snapshot.is_empty() && matches!(global.output, OutputFormat::Table) {
                if !global.quiet {
                    eprintln!(
                        "No sites yet. Create one with: wpfleet sites create --name <NAME> --description <TEXT>"
                    );
                }
                return Ok(());
            }
            print_sites(&snapshot.sites, global);
            Ok(())
        }

        SitesCommand::Get { id } => {
            let site = client.get(&SiteId::new(id)).await?;
            print_site(&site, global);
            Ok(())
        }

        SitesCommand::Create {
            name,
            description,
            wait,
        } => {
            let pb = output::spinner("Creating site...", global.quiet);
            let created = client.create(&name, &description).await;
            pb.finish_and_clear();
            let mut site = created?;
            if !global.quiet {
                eprintln!("Site {} created, provisioning in the background", site.id);
            }
            if wait.wait {
                site = wait_for(client, &site.id, &wait, global, Site::is_start_settled).await?;
            }
            print_site(&site, global);
            Ok(())
        }

        SitesCommand::Start { id, wait } => {
            let id = SiteId::new(id);
            let pb = output::spinner(&format!("Starting site {id}..."), global.quiet);
            let sent = client.start(&id).await;
            pb.finish_and_clear();
            sent?;
            let site = if wait.wait {
                wait_for(client, &id, &wait, global, Site::is_start_settled).await?
            } else {
                current(client, &id).await?
            };
            print_site(&site, global);
            Ok(())
        }

        SitesCommand::Stop { id, wait } => {
            let id = SiteId::new(id);
            let pb = output::spinner(&format!("Stopping site {id}..."), global.quiet);
            let sent = client.stop(&id).await;
            pb.finish_and_clear();
            sent?;
            let site = if wait.wait {
                wait_for(client, &id, &wait, global, Site::is_settled).await?
            } else {
                current(client, &id).await?
            };
            print_site(&site, global);
            Ok(())
        }

        SitesCommand::Delete { id } => {
            let id = SiteId::new(id);
            // Load the view so the prompt can name the site.
            client.fetch_all().await?;
            let mut refused = None;
            let outcome = client
                .delete(&id, |site| {
                    let label = site.map_or_else(
                        || format!("site {id}"),
                        |s| format!("site '{}' ({id})", s.name),
                    );
                    match util::confirm(
                        &format!("Delete {label}? Its containers and data are removed."),
                        "sites delete",
                        global.yes,
                    ) {
                        Ok(answer) => answer,
                        Err(e) => {
                            refused = Some(e);
                            false
                        }
                    }
                })
                .await?;
            if let Some(err) = refused {
                return Err(err);
            }
            if !global.quiet {
                match outcome {
                    DeleteOutcome::Deleted => eprintln!("Site {id} deletion initiated"),
                    DeleteOutcome::Cancelled => eprintln!("Cancelled"),
                }
            }
            Ok(())
        }

        SitesCommand::Watch => watch(client, global).await,
    }
}

/// Reprint the site list on every change until Ctrl-C.
async fn watch(client: &SyncClient, global: &GlobalOpts) -> Result<(), CliError> {
    let mut changes = client.subscribe();
    let listener = client.spawn_change_listener();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = client.snapshot();
                debug!(generation = snapshot.generation, "site view changed");
                if let Some(err) = client.last_error() {
                    eprintln!("{err}");
                    client.dismiss_error();
                }
                print_sites(&snapshot.sites, global);
            }
        }
    }
    listener.abort();
    Ok(())
}
