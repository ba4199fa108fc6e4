//! `wpfleet serve`: run the backend until a shutdown signal.

use tracing::info;
use wpfleet_config::{Config, ProvisionerKind, ServerSettings};
use wpfleet_server::{AppState, shutdown_signal, spawn_server};

use crate::cli::{GlobalOpts, ProvisionerArg, ServeArgs};
use crate::error::CliError;

/// Flags win over the config file and environment.
fn apply_overrides(mut settings: ServerSettings, args: &ServeArgs) -> ServerSettings {
    if let Some(listen) = &args.listen {
        settings.listen_addr.clone_from(listen);
    }
    if let Some(dir) = &args.data_dir {
        settings.data_dir.clone_from(dir);
    }
    if let Some(kind) = args.provisioner {
        settings.provisioner = match kind {
            ProvisionerArg::Compose => ProvisionerKind::Compose,
            ProvisionerArg::Simulated => ProvisionerKind::Simulated,
        };
    }
    if let Some(host) = &args.public_host {
        settings.public_host.clone_from(host);
    }
    if args.no_auto_start {
        settings.auto_start = false;
    }
    settings
}

pub async fn handle(config: Config, args: &ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let settings = apply_overrides(config.server, args);
    let addr = settings.listen_socket_addr()?;

    let state = AppState::bootstrap(&settings).await?;
    let handle = spawn_server(state, addr).await?;
    if !global.quiet {
        eprintln!(
            "wpfleet listening on http://{} ({} provisioner, data in {})",
            handle.addr(),
            settings.provisioner,
            settings.data_dir.display()
        );
    }

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    handle.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cli::LogFormat;

    fn args() -> ServeArgs {
        ServeArgs {
            listen: None,
            data_dir: None,
            provisioner: None,
            public_host: None,
            no_auto_start: false,
            log_format: LogFormat::Text,
            log_dir: None,
        }
    }

    #[test]
    fn flags_override_settings() {
        let overridden = apply_overrides(
            ServerSettings::default(),
            &ServeArgs {
                listen: Some("127.0.0.1:6000".into()),
                data_dir: Some(PathBuf::from("/tmp/wp")),
                provisioner: Some(ProvisionerArg::Simulated),
                public_host: Some("wp.example.test".into()),
                no_auto_start: true,
                ..args()
            },
        );
        assert_eq!(overridden.listen_addr, "127.0.0.1:6000");
        assert_eq!(overridden.data_dir, PathBuf::from("/tmp/wp"));
        assert_eq!(overridden.provisioner, ProvisionerKind::Simulated);
        assert_eq!(overridden.public_host, "wp.example.test");
        assert!(!overridden.auto_start);
    }

    #[test]
    fn no_flags_keep_settings() {
        let settings = ServerSettings::default();
        assert_eq!(apply_overrides(settings.clone(), &args()), settings);
    }
}
