//! CLI command definitions and handlers

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use katib_ui_operator::host::{HostHandles, MemoryHost, RelationId};
use katib_ui_operator::interface::{INGRESS, VERSIONS_KEY};
use katib_ui_operator::sidebar::{self, SidebarEntry, SIDEBAR};
use katib_ui_operator::{
    CharmConfig, CharmEvent, ConfigSource, FileImageResource, ImageDetails, ImageResource, KubePodSpecSink,
    OperatorBuilder, OperatorConfig, OperatorManager, StaticImageResource,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Remote application assumed for relations first seen in an event stream
const STREAM_REMOTE_APP: &str = "remote";

/// Main CLI structure
#[derive(Parser)]
#[command(name = "katib-ui-operator")]
#[command(about = "Operator for the Katib UI microservice")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile once against an in-memory host and print the result
    Render {
        #[command(flatten)]
        charm: CharmArgs,

        #[command(flatten)]
        host: SimulatedHostArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Reconcile once and apply the pod spec to the current cluster
    Apply {
        #[command(flatten)]
        charm: CharmArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Handle JSON-lines charm events read from stdin
    Run {
        #[command(flatten)]
        charm: CharmArgs,

        /// Apply pod specs to the current cluster instead of keeping them in memory
        #[arg(long)]
        apply: bool,

        /// Versions listed by ingress providers first seen in the stream, comma separated
        #[arg(long, value_delimiter = ',')]
        ingress_versions: Vec<String>,
    },

    /// Print the dashboard sidebar payload
    Sidebar {
        /// Application name
        #[arg(long, default_value = "katib-ui")]
        app_name: String,

        /// Print the payload sent when the relation departs
        #[arg(long)]
        departed: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Operator identity, configuration and image inputs
#[derive(Args, Debug, Clone)]
pub struct CharmArgs {
    /// Application name
    #[arg(long, default_value = "katib-ui")]
    pub app_name: String,

    /// Model name, also the namespace the workload runs in
    #[arg(short, long, default_value = "kubeflow")]
    pub model: String,

    /// Charm config file, re-read for every event
    #[arg(short, long, conflicts_with = "port")]
    pub config: Option<PathBuf>,

    /// HTTP port
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// OCI image resource file
    #[arg(long, conflicts_with = "image_path")]
    pub image_resource: Option<PathBuf>,

    /// Fixed image reference
    #[arg(long)]
    pub image_path: Option<String>,
}

impl CharmArgs {
    pub fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            app_name: self.app_name.clone(),
            model_name: self.model.clone(),
            ..Default::default()
        }
    }

    pub fn config_source(&self) -> ConfigSource {
        match (&self.config, self.port) {
            (Some(path), _) => ConfigSource::File(path.clone()),
            (None, Some(port)) => ConfigSource::Static(CharmConfig::new(port)),
            (None, None) => ConfigSource::default(),
        }
    }

    pub fn image_resource(&self, operator: &OperatorConfig) -> Result<Arc<dyn ImageResource>> {
        if let Some(path) = &self.image_resource {
            Ok(Arc::new(FileImageResource::new(operator.image_resource.clone(), path.clone())))
        } else if let Some(image_path) = &self.image_path {
            Ok(Arc::new(StaticImageResource::new(
                operator.image_resource.clone(),
                ImageDetails::new(image_path.clone()),
            )))
        } else {
            Err(anyhow::anyhow!("Either --image-resource or --image-path must be specified"))
        }
    }

    /// Manager for this charm over `handles`
    pub fn manager(&self, handles: HostHandles) -> Result<OperatorManager> {
        let operator = self.operator_config();
        let image = self.image_resource(&operator)?;

        Ok(OperatorBuilder::new(image, handles)
            .app_name(operator.app_name)
            .model_name(operator.model_name)
            .config_source(self.config_source())
            .build())
    }
}

/// Shape of the simulated host for `render`
#[derive(Args, Debug, Clone, Default)]
pub struct SimulatedHostArgs {
    /// Render as a unit that is not the leader
    #[arg(long)]
    pub not_leader: bool,

    /// Relate an ingress provider with this application name
    #[arg(long)]
    pub ingress_app: Option<String>,

    /// Versions the ingress provider lists, comma separated
    #[arg(long, value_delimiter = ',', requires = "ingress_app")]
    pub ingress_versions: Vec<String>,
}

/// Output format options
#[derive(Clone, Debug, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    JsonPretty,
}

/// Command execution result
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Execute CLI commands
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute a CLI command
    pub async fn execute(&mut self, command: Commands) -> Result<CommandResult> {
        match command {
            Commands::Render { charm, host, format } => self.execute_render(charm, host, format).await,
            Commands::Apply { charm, format } => self.execute_apply(charm, format).await,
            Commands::Run {
                charm,
                apply,
                ingress_versions,
            } => self.execute_run(charm, apply, ingress_versions).await,
            Commands::Sidebar {
                app_name,
                departed,
                format,
            } => self.execute_sidebar(app_name, departed, format),
        }
    }

    async fn execute_render(
        &self,
        charm: CharmArgs,
        host_args: SimulatedHostArgs,
        format: OutputFormat,
    ) -> Result<CommandResult> {
        let host = Arc::new(MemoryHost::new());
        host.set_leader(!host_args.not_leader);

        let ingress = match &host_args.ingress_app {
            Some(app) => {
                let id = host.add_relation(INGRESS, app).await;
                if !host_args.ingress_versions.is_empty() {
                    let versions = serde_json::to_string(&host_args.ingress_versions)?;
                    host.set_remote_app_data(id, VERSIONS_KEY, versions).await?;
                }
                Some(id)
            }
            None => None,
        };

        let manager = charm.manager(HostHandles::in_memory(host.clone()))?;
        manager.handle_event(&CharmEvent::Install).await?;

        report(&host, ingress, &format).await
    }

    async fn execute_apply(&self, charm: CharmArgs, format: OutputFormat) -> Result<CommandResult> {
        let operator = charm.operator_config();
        let sink = KubePodSpecSink::try_default(&operator).await?;
        let host = Arc::new(MemoryHost::leader());
        let handles = HostHandles::in_memory(host.clone()).with_pod_spec_sink(Arc::new(sink));

        let manager = charm.manager(handles)?;
        manager.handle_event(&CharmEvent::Install).await?;

        report(&host, None, &format).await
    }

    async fn execute_run(&self, charm: CharmArgs, apply: bool, ingress_versions: Vec<String>) -> Result<CommandResult> {
        let host = Arc::new(MemoryHost::leader());
        let mut handles = HostHandles::in_memory(host.clone());
        if apply {
            let sink = KubePodSpecSink::try_default(&charm.operator_config()).await?;
            handles = handles.with_pod_spec_sink(Arc::new(sink));
        }
        let manager = charm.manager(handles)?;

        let seed = RelationSeed::new(&ingress_versions)?;
        let (tx, rx) = mpsc::channel(64);
        let stdin = BufReader::new(tokio::io::stdin());
        let reader = tokio::spawn(forward_events(stdin, host, seed, tx));

        info!("Reading charm events from stdin, press Ctrl+C to stop");
        let metrics = manager.run(rx).await;
        reader.abort();

        println!("{}", serde_json::to_string(&metrics)?);

        Ok(CommandResult {
            success: metrics.events_failed == 0,
            message: format!("Handled {} events", metrics.events_handled),
            data: Some(serde_json::to_value(metrics)?),
        })
    }

    fn execute_sidebar(&self, app_name: String, departed: bool, format: OutputFormat) -> Result<CommandResult> {
        let entries = if departed {
            Vec::new()
        } else {
            vec![SidebarEntry::katib(app_name)]
        };

        let payload = sidebar::encode(&entries)?;
        match format {
            OutputFormat::Text | OutputFormat::Json => println!("{}", payload),
            OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&entries)?),
        }

        Ok(CommandResult {
            success: true,
            message: format!("Sidebar payload with {} entries", entries.len()),
            data: Some(serde_json::to_value(&entries)?),
        })
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote data given to relations first seen in an event stream
#[derive(Debug, Clone, Default)]
pub struct RelationSeed {
    ingress_versions: Option<String>,
}

impl RelationSeed {
    pub fn new(ingress_versions: &[String]) -> Result<Self> {
        let ingress_versions = if ingress_versions.is_empty() {
            None
        } else {
            Some(serde_json::to_string(ingress_versions)?)
        };
        Ok(Self { ingress_versions })
    }

    async fn apply(&self, host: &MemoryHost, relation_id: RelationId, endpoint: &str) {
        let Some(versions) = self.ingress_versions.as_ref().filter(|_| endpoint == INGRESS) else {
            return;
        };
        if let Err(e) = host.set_remote_app_data(relation_id, VERSIONS_KEY, versions.clone()).await {
            warn!(relation_id, error = %e, "Failed to seed ingress versions");
        }
    }
}

/// Parse JSON-lines events from `reader` into `tx`, relating unknown relation ids on the fly
pub async fn forward_events<R>(reader: R, host: Arc<MemoryHost>, seed: RelationSeed, tx: mpsc::Sender<CharmEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read charm events");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<CharmEvent>(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, line = %line, "Skipping malformed event");
                continue;
            }
        };

        if let Some((relation_id, endpoint)) = relation_of(&event) {
            if host.ensure_relation(relation_id, endpoint, STREAM_REMOTE_APP).await {
                info!(relation_id, endpoint, "Related new remote application");
                seed.apply(&host, relation_id, endpoint).await;
            }
        }

        if tx.send(event).await.is_err() {
            break;
        }
    }
}

fn relation_of(event: &CharmEvent) -> Option<(RelationId, &'static str)> {
    match event {
        CharmEvent::IngressRelationChanged { relation_id } => Some((*relation_id, INGRESS)),
        CharmEvent::SidebarRelationJoined { relation_id } | CharmEvent::SidebarRelationDeparted { relation_id } => {
            Some((*relation_id, SIDEBAR))
        }
        _ => None,
    }
}

/// Print the host state after one reconciliation
async fn report(host: &MemoryHost, ingress: Option<RelationId>, format: &OutputFormat) -> Result<CommandResult> {
    let status = host.current_status().await;
    let pod_spec = host.last_pod_spec().await;
    let ingress_data = match ingress {
        Some(id) => host.local_app_data(id).await,
        None => None,
    };

    let data = json!({
        "status": status,
        "podSpec": pod_spec,
        "ingress": ingress_data,
    });

    match format {
        OutputFormat::Text => {
            match &status {
                Some(status) => println!("Status: {}", status),
                None => println!("Status: unknown"),
            }
            match &pod_spec {
                Some(spec) => println!("Pod spec:\n{}", serde_json::to_string_pretty(spec)?),
                None => println!("Pod spec: not published"),
            }
            if let Some(bag) = &ingress_data {
                println!("Ingress data:");
                for (key, value) in bag {
                    println!("  {}: {}", key, value.trim_end());
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&data)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&data)?),
    }

    let success = status.as_ref().is_some_and(|status| status.is_active());
    Ok(CommandResult {
        success,
        message: status.map_or_else(|| "No status set".to_string(), |status| status.to_string()),
        data: Some(data),
    })
}
