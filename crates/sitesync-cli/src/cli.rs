use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sitesync_core::models::{
    ActionKind, BackoffStrategy, ConflictPolicy, ConnectionType, NetworkStatus, Priority,
    StorageItemKind,
};
use sitesync_core::sync::ConflictDecision;

#[derive(Parser)]
#[command(name = "sitesync")]
#[command(about = "Queue and sync offline field changes from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Link to assume when no probe URL is configured
    #[arg(long, global = true, value_enum, default_value_t = LinkArg::Ethernet)]
    pub link: LinkArg,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for the remote
    #[command(alias = "add")]
    Enqueue(EnqueueArgs),
    /// List queued actions
    List {
        /// Only show actions with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Number of actions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one queued action
    Show {
        /// Action ID or unique ID prefix
        id: String,
    },
    /// Send queued actions to the remote now
    #[command(alias = "sync")]
    Drain {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return a failed action to the queue
    Retry {
        /// Action ID or unique ID prefix
        id: String,
    },
    /// Discard a queued action
    #[command(alias = "rm")]
    Remove {
        /// Action ID or unique ID prefix
        id: String,
    },
    /// List unresolved conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict
    Resolve {
        /// Action ID or unique ID prefix
        id: String,
        #[arg(value_enum)]
        decision: DecisionArg,
        /// Merged payload as JSON (required for `merge`, read from stdin when piped)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
    /// Show or change sync settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Manage cached storage items
    Storage {
        #[command(subcommand)]
        command: StorageCommands,
    },
    /// Summarize queue, network and storage state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the background scheduler and print queue changes until Ctrl-C
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct EnqueueArgs {
    #[arg(value_enum)]
    pub kind: KindArg,
    /// Entity type, e.g. `task` or `daily_log`
    pub entity_type: String,
    /// Entity identifier
    pub entity_id: String,
    /// Payload as JSON (read from stdin when omitted and piped)
    #[arg(long, value_name = "JSON")]
    pub payload: Option<String>,
    /// Display label
    #[arg(long)]
    pub label: Option<String>,
    #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
    pub priority: PriorityArg,
    /// Override the configured retry budget
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Print current settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update one or more settings
    Set(SettingsSetArgs),
}

#[derive(Args, Default)]
pub struct SettingsSetArgs {
    #[arg(long)]
    pub auto_sync: Option<bool>,
    #[arg(long, value_name = "SECS")]
    pub sync_interval: Option<u64>,
    #[arg(long)]
    pub wifi_only: Option<bool>,
    #[arg(long)]
    pub background_sync: Option<bool>,
    #[arg(long, value_enum)]
    pub conflict_resolution: Option<PolicyArg>,
    #[arg(long)]
    pub max_retries: Option<u32>,
    #[arg(long, value_name = "SECS")]
    pub retry_interval: Option<u64>,
    #[arg(long)]
    pub compression: Option<bool>,
    #[arg(long, value_enum)]
    pub backoff: Option<BackoffArg>,
}

#[derive(Subcommand)]
pub enum StorageCommands {
    /// Register a cached item, evicting old ones if needed
    Add {
        #[arg(value_enum)]
        kind: ItemKindArg,
        name: String,
        /// Size in bytes
        size: u64,
        /// Never evict or delete this item
        #[arg(long)]
        essential: bool,
    },
    /// List cached items, most recently used first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a cached item
    Remove {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Mark a cached item as just used
    Touch {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Show capacity and usage
    Usage {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LinkArg {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
    Offline,
}

impl LinkArg {
    pub const fn connection_type(self) -> ConnectionType {
        match self {
            Self::Wifi => ConnectionType::Wifi,
            Self::Cellular => ConnectionType::Cellular,
            Self::Ethernet => ConnectionType::Ethernet,
            Self::Unknown | Self::Offline => ConnectionType::Unknown,
        }
    }

    pub const fn status(self) -> NetworkStatus {
        match self {
            Self::Offline => NetworkStatus::offline(),
            other => NetworkStatus::online(other.connection_type()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Create,
    Update,
    Delete,
    Upload,
}

impl From<KindArg> for ActionKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
            KindArg::Upload => Self::Upload,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Self::High,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::Low => Self::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Syncing,
    Failed,
    Conflict,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum DecisionArg {
    ServerWins,
    ClientWins,
    Merge,
}

impl From<DecisionArg> for ConflictDecision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::ServerWins => Self::ServerWins,
            DecisionArg::ClientWins => Self::ClientWins,
            DecisionArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PolicyArg {
    Manual,
    ServerWins,
    ClientWins,
    Merge,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Manual => Self::Manual,
            PolicyArg::ServerWins => Self::ServerWins,
            PolicyArg::ClientWins => Self::ClientWins,
            PolicyArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackoffArg {
    Fixed,
    Exponential,
}

impl From<BackoffArg> for BackoffStrategy {
    fn from(value: BackoffArg) -> Self {
        match value {
            BackoffArg::Fixed => Self::Fixed,
            BackoffArg::Exponential => Self::Exponential,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ItemKindArg {
    Project,
    Template,
    Media,
    Document,
    Other,
}

impl From<ItemKindArg> for StorageItemKind {
    fn from(value: ItemKindArg) -> Self {
        match value {
            ItemKindArg::Project => Self::Project,
            ItemKindArg::Template => Self::Template,
            ItemKindArg::Media => Self::Media,
            ItemKindArg::Document => Self::Document,
            ItemKindArg::Other => Self::Other,
        }
    }
}
