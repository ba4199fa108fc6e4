// Docker Compose provisioner.
//
// Each site gets `<data_dir>/<project>/docker-compose.yml` describing a
// MariaDB + WordPress pair with bind-mounted data next to it. The compose
// CLI is driven through a `CommandRunner`, so the whole provisioner can be
// exercised without Docker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::runner::display_command;
use super::{
    CommandRunner, Endpoint, PortAllocator, ProvisionError, ProvisionRequest, Provisioner,
};
use crate::model::SiteId;
use crate::registry::site_url;

const COMPOSE_FILE: &str = "docker-compose.yml";
const DB_IMAGE: &str = "mariadb:10.6";
const WORDPRESS_IMAGE: &str = "wordpress:latest";
const SITE_LABEL: &str = "wpfleet.site";

/// Host-side settings for the compose provisioner.
#[derive(Debug, Clone)]
pub struct ComposeSettings {
    /// Parent directory of the per-site project directories.
    pub data_dir: PathBuf,
    /// Compose invocation, e.g. `["docker", "compose"]`.
    pub compose_command: Vec<String>,
    pub public_host: String,
    /// Hard limit for a single compose invocation.
    pub command_timeout: Duration,
}

pub struct ComposeProvisioner {
    settings: ComposeSettings,
    ports: Arc<PortAllocator>,
    runner: Arc<dyn CommandRunner>,
}

impl ComposeProvisioner {
    pub fn new(
        settings: ComposeSettings,
        ports: Arc<PortAllocator>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, ProvisionError> {
        if settings.compose_command.is_empty() {
            return Err(ProvisionError::Command {
                command: String::new(),
                message: "compose command is empty".into(),
            });
        }
        Ok(Self {
            settings,
            ports,
            runner,
        })
    }

    pub fn project_dir(&self, request: &ProvisionRequest) -> PathBuf {
        self.settings
            .data_dir
            .join(project_name(&request.name, &request.site_id))
    }

    async fn compose(&self, project_dir: &Path, args: &[&str]) -> Result<(), ProvisionError> {
        let (program, base) = self
            .settings
            .compose_command
            .split_first()
            .ok_or_else(|| ProvisionError::Command {
                command: String::new(),
                message: "compose command is empty".into(),
            })?;

        let project = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut full: Vec<String> = base.to_vec();
        full.extend(["-p".to_owned(), project, "-f".to_owned(), COMPOSE_FILE.to_owned()]);
        full.extend(args.iter().map(|a| (*a).to_owned()));

        let output = self
            .runner
            .run(program, &full, project_dir, self.settings.command_timeout)
            .await?;
        if output.success {
            Ok(())
        } else {
            let detail = output.stderr.trim();
            Err(ProvisionError::Command {
                command: display_command(program, &full),
                message: if detail.is_empty() {
                    format!("exited with status {}", output.code.unwrap_or(-1))
                } else {
                    detail.to_owned()
                },
            })
        }
    }

    /// Write (or update) the compose file for `port`, keeping any
    /// existing database password so data stays readable.
    async fn write_compose_file(
        &self,
        project_dir: &Path,
        site_id: &SiteId,
        port: u16,
    ) -> Result<(), ProvisionError> {
        let path = project_dir.join(COMPOSE_FILE);
        let file = match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                let mut file: ComposeFile = serde_yaml::from_str(&existing)
                    .map_err(|e| ProvisionError::Render(format!("{}: {e}", path.display())))?;
                file.services.wordpress.ports = vec![port_mapping(port)];
                file
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                render_compose(site_id, port, &uuid::Uuid::new_v4().simple().to_string())
            }
            Err(e) => return Err(ProvisionError::io(format!("reading {}", path.display()), e)),
        };

        let yaml = serde_yaml::to_string(&file).map_err(|e| ProvisionError::Render(e.to_string()))?;
        tokio::fs::create_dir_all(project_dir)
            .await
            .map_err(|e| ProvisionError::io(format!("creating {}", project_dir.display()), e))?;
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| ProvisionError::io(format!("writing {}", path.display()), e))?;
        debug!(path = %path.display(), port, "compose file written");
        Ok(())
    }
}

#[async_trait]
impl Provisioner for ComposeProvisioner {
    fn name(&self) -> &'static str {
        "compose"
    }

    async fn provision_start(&self, request: &ProvisionRequest) -> Result<Endpoint, ProvisionError> {
        let port = self
            .ports
            .lease(&request.site_id, request.preferred_port)
            .await?;
        let project_dir = self.project_dir(request);

        let started = async {
            self.write_compose_file(&project_dir, &request.site_id, port)
                .await?;
            self.compose(&project_dir, &["up", "-d"]).await
        }
        .await;

        if let Err(e) = started {
            self.ports.release(&request.site_id).await;
            return Err(e);
        }
        info!(site_id = %request.site_id, port, project = %project_dir.display(), "compose project up");
        Ok(Endpoint {
            port,
            url: site_url(&self.settings.public_host, port),
        })
    }

    async fn provision_stop(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        let project_dir = self.project_dir(request);
        if project_dir.join(COMPOSE_FILE).exists() {
            self.compose(&project_dir, &["stop"]).await?;
        } else {
            warn!(site_id = %request.site_id, "no compose file, nothing to stop");
        }
        self.ports.release(&request.site_id).await;
        Ok(())
    }

    async fn provision_delete(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        let project_dir = self.project_dir(request);
        if project_dir.join(COMPOSE_FILE).exists() {
            self.compose(&project_dir, &["down", "--volumes"]).await?;
        }
        match tokio::fs::remove_dir_all(&project_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ProvisionError::io(
                    format!("removing {}", project_dir.display()),
                    e,
                ));
            }
        }
        self.ports.release(&request.site_id).await;
        info!(site_id = %request.site_id, "compose project removed");
        Ok(())
    }

    async fn restore(&self, request: &ProvisionRequest, port: u16) -> Result<(), ProvisionError> {
        self.ports.reserve(&request.site_id, port).await;
        Ok(())
    }
}

/// Compose project name for a site: the lowercased name with anything
/// outside `[a-z0-9_-]` replaced by `_`, prefixed with `x` unless it
/// starts alphanumerically, and suffixed with the site id.
pub fn project_name(name: &str, site_id: &SiteId) -> String {
    let mut sanitized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    if !sanitized.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        sanitized.insert(0, 'x');
    }
    let id: String = site_id
        .as_str()
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("{sanitized}-{id}")
}

// ── Compose file schema ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ComposeFile {
    services: Services,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Services {
    db: Service,
    wordpress: Service,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Service {
    image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    restart: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    environment: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    labels: IndexMap<String, String>,
}

fn port_mapping(port: u16) -> String {
    format!("{port}:80")
}

fn render_compose(site_id: &SiteId, port: u16, db_password: &str) -> ComposeFile {
    let env = |pairs: &[(&str, &str)]| -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    };
    let labels: IndexMap<String, String> =
        std::iter::once((SITE_LABEL.to_owned(), site_id.to_string())).collect();

    ComposeFile {
        services: Services {
            db: Service {
                image: DB_IMAGE.into(),
                restart: Some("unless-stopped".into()),
                environment: env(&[
                    ("MYSQL_ROOT_PASSWORD", db_password),
                    ("MYSQL_DATABASE", "wordpress"),
                    ("MYSQL_USER", "wordpress"),
                    ("MYSQL_PASSWORD", db_password),
                ]),
                volumes: vec!["./db_data:/var/lib/mysql".into()],
                labels: labels.clone(),
                ..Service::default()
            },
            wordpress: Service {
                image: WORDPRESS_IMAGE.into(),
                restart: Some("unless-stopped".into()),
                environment: env(&[
                    ("WORDPRESS_DB_HOST", "db"),
                    ("WORDPRESS_DB_USER", "wordpress"),
                    ("WORDPRESS_DB_PASSWORD", db_password),
                    ("WORDPRESS_DB_NAME", "wordpress"),
                ]),
                ports: vec![port_mapping(port)],
                volumes: vec!["./wp_data:/var/www/html".into()],
                depends_on: vec!["db".into()],
                labels,
            },
        },
    }
}
