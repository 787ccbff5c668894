//! deckhand - deploy manifests, compose files, build recipes, charts and images
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use deckhand_common::telemetry::{init_logging, LogConfig, LogFormat};
use deckhand_deploy::{
    ControlPlane, DeployRequest, DeploySource, DeployerConfig, ExposureRequest, ExposureTier,
    HelmInstaller, IdentityProvider, IntegrationConfig, KeycloakAdmin, KubeControlPlane,
    NoIdentityProvider, Orchestrator, StorageRequest,
};
use deckhand_deploy::orchestrator::dry_run;
use deckhand_source::fetch::DEFAULT_FETCH_TIMEOUT;
use deckhand_source::{classify, GitHubFetcher, SourceFetcher};

/// deckhand - classify deployment sources and deploy them with integrations
#[derive(Parser, Debug)]
#[command(name = "deckhand", version, about, long_about = None)]
struct Cli {
    /// Deployer configuration file (YAML)
    #[arg(long, global = true, env = "DECKHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Platform domain for generated hostnames
    #[arg(long, global = true, env = "DECKHAND_DOMAIN")]
    domain: Option<String>,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report what kind of deployable artifact a file is
    Classify {
        /// File to classify
        file: PathBuf,
    },

    /// Deploy an application and apply integrations
    Deploy(DeployArgs),

    /// Delete an application and everything deployed with it
    Delete {
        /// Application name
        #[arg(long)]
        name: String,
        /// Namespace
        #[arg(long, default_value = "default")]
        namespace: String,
    },

    /// Show the stored credentials of an application
    Credentials {
        /// Application name
        app: String,
    },

    /// List deployed applications
    List {
        /// Namespace (all namespaces when omitted)
        #[arg(long)]
        namespace: Option<String>,
    },
}

/// Deploy arguments
#[derive(Args, Debug)]
struct DeployArgs {
    /// Application name (lowercase DNS label)
    #[arg(long)]
    name: String,

    /// Target namespace
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Manifest, compose file, build recipe or Chart.yaml
    #[arg(long, conflicts_with_all = ["url", "image", "chart"])]
    file: Option<PathBuf>,

    /// Source-host URL of a file or repository
    #[arg(long, conflicts_with_all = ["image", "chart"])]
    url: Option<String>,

    /// Pre-built image to run directly
    #[arg(long, conflicts_with = "chart")]
    image: Option<String>,

    /// Port the image listens on
    #[arg(long, default_value = "80", requires = "image")]
    port: u16,

    /// Chart reference (repo/chart, OCI URL or directory)
    #[arg(long)]
    chart: Option<String>,

    /// Values file for the chart
    #[arg(long, requires = "chart")]
    values: Option<PathBuf>,

    /// Attach persistent storage of this size
    #[arg(long)]
    storage_size: Option<String>,

    /// Where to mount persistent storage
    #[arg(long)]
    mount_path: Option<String>,

    /// Inject scoped object-storage credentials
    #[arg(long)]
    object_storage: bool,

    /// Expose on a gateway: user, admin or internal
    #[arg(long)]
    expose: Option<ExposureTier>,

    /// Hostname for the route
    #[arg(long, requires = "expose")]
    hostname: Option<String>,

    /// Put the app behind the external authorizer
    #[arg(long)]
    access_control: bool,

    /// Generate admin credentials
    #[arg(long)]
    credentials: bool,

    /// Print the planned objects instead of applying them
    #[arg(long)]
    dry_run: bool,
}

impl DeployArgs {
    fn integrations(&self) -> IntegrationConfig {
        let storage = (self.storage_size.is_some() || self.mount_path.is_some()).then(|| {
            StorageRequest {
                size: self.storage_size.clone(),
                mount_path: self.mount_path.clone(),
            }
        });
        IntegrationConfig {
            storage,
            object_storage: self.object_storage,
            exposure: self.expose.map(|tier| ExposureRequest {
                tier,
                hostname: self.hostname.clone(),
            }),
            access_control: self.access_control,
            generate_credentials: self.credentials,
        }
    }

    async fn source(&self) -> anyhow::Result<DeploySource> {
        if let Some(path) = &self.file {
            return file_source(path).await;
        }
        if let Some(url) = &self.url {
            let fetched = GitHubFetcher::new(DEFAULT_FETCH_TIMEOUT)?.fetch(url).await?;
            return Ok(DeploySource::Text {
                text: fetched.text,
                filename: fetched.filename,
                repo: fetched.repo,
            });
        }
        if let Some(image) = &self.image {
            return Ok(DeploySource::Image {
                image: image.clone(),
                port: self.port,
            });
        }
        if let Some(chart) = &self.chart {
            let values = match &self.values {
                Some(path) => tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                None => String::new(),
            };
            return Ok(DeploySource::Chart {
                reference: chart.clone(),
                values,
            });
        }
        anyhow::bail!("one of --file, --url, --image or --chart is required")
    }
}

/// A local `Chart.yaml` deploys its chart directory
async fn file_source(path: &Path) -> anyhow::Result<DeploySource> {
    let filename = path.file_name().map(|f| f.to_string_lossy().to_string());
    if filename.as_deref() == Some("Chart.yaml") {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        return Ok(DeploySource::Chart {
            reference: dir.display().to_string(),
            values: String::new(),
        });
    }
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(DeploySource::Text {
        text,
        filename,
        repo: None,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_config(cli: &Cli) -> anyhow::Result<DeployerConfig> {
    let mut config = match &cli.config {
        Some(path) => DeployerConfig::load(path).await?,
        None => DeployerConfig::default(),
    };
    if let Some(domain) = &cli.domain {
        config.domain = domain.clone();
    }
    Ok(config)
}

async fn connect(config: DeployerConfig) -> anyhow::Result<Orchestrator> {
    let timeout = config.upstream_timeout();
    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        KubeControlPlane::connect(timeout)
            .await
            .context("connecting to the cluster")?,
    );
    let identity: Arc<dyn IdentityProvider> = if config.identity.enabled {
        Arc::new(KeycloakAdmin::new(&config, control_plane.clone())?)
    } else {
        Arc::new(NoIdentityProvider)
    };
    Ok(Orchestrator::new(
        config,
        control_plane,
        Arc::new(HelmInstaller::new(timeout)),
        identity,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.pretty_logs {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    init_logging(LogConfig {
        format,
        ..Default::default()
    })?;

    let config = load_config(&cli).await?;

    match &cli.command {
        Commands::Classify { file } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let filename = file.file_name().map(|f| f.to_string_lossy().to_string());
            print_json(&classify(&text, filename.as_deref()))
        }
        Commands::Deploy(args) => {
            let request = DeployRequest {
                name: args.name.clone(),
                namespace: args.namespace.clone(),
                source: args.source().await?,
                integrations: args.integrations(),
            };
            if args.dry_run {
                return print_json(&dry_run(&request)?);
            }
            let report = connect(config).await?.deploy(&request).await?;
            info!(app = %report.app, success = report.success(), "deploy finished");
            print_json(&report)
        }
        Commands::Delete { name, namespace } => {
            print_json(&connect(config).await?.delete(name, namespace).await?)
        }
        Commands::Credentials { app } => {
            print_json(&connect(config).await?.credentials(app).await?)
        }
        Commands::List { namespace } => {
            let namespace = namespace.as_deref().unwrap_or_default();
            print_json(&connect(config).await?.list_applications(namespace).await?)
        }
    }
}
