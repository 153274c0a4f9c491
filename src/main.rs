use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pdf_rag::Result;
use pdf_rag::commands::{
    Services, add_document, ask, delete_document, list_conversations, list_documents,
    new_conversation, rebuild_index, show_status,
};
use pdf_rag::config::{Config, get_config_dir, run_interactive_config, show_config};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pdf-rag")]
#[command(about = "Ask questions about your PDF documents with a local language model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a PDF or text document and index it
    Add {
        /// Path to the document
        path: PathBuf,
        /// Name to show instead of the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// List all documents
    List,
    /// Delete a document and rebuild the index
    Delete {
        /// Document ID or file name
        document: String,
    },
    /// Rebuild the vector index
    Rebuild {
        /// Only index these documents (ID or file name); repeatable
        #[arg(long = "document")]
        documents: Vec<String>,
    },
    /// Ask a question about the indexed documents
    Ask {
        question: String,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<Uuid>,
        /// Only search these documents (ID or file name); repeatable
        #[arg(long = "document")]
        documents: Vec<String>,
        /// Number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Manage conversations
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Show detailed status of the pipeline
    Status,
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// Start a new conversation and print its id
    New,
    /// List recent conversations
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show } = cli.command {
        let config_dir = get_config_dir().map_err(|e| pdf_rag::RagError::Config(e.to_string()))?;
        if show {
            show_config(&config_dir)?;
        } else {
            run_interactive_config(&config_dir)?;
        }
        return Ok(());
    }

    let services = Services::open(Config::load_default()?).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Add { path, name } => {
            add_document(&services, &path, name.as_deref()).await?;
        }
        Commands::List => {
            list_documents(&services).await?;
        }
        Commands::Delete { document } => {
            delete_document(&services, &document).await?;
        }
        Commands::Rebuild { documents } => {
            rebuild_index(&services, &documents).await?;
        }
        Commands::Ask {
            question,
            conversation,
            documents,
            top_k,
        } => {
            ask(&services, &question, conversation, &documents, top_k).await?;
        }
        Commands::Conversations { command } => match command {
            ConversationCommands::New => new_conversation(&services).await?,
            ConversationCommands::List { limit } => list_conversations(&services, limit).await?,
        },
        Commands::Status => {
            show_status(&services).await?;
        }
    }

    Ok(())
}
