use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::info;
use std::io::{self, Write};
use std::path::PathBuf;

use local_rag::app::App;
use local_rag::config::Config;
use local_rag::database::Store;
use local_rag::ollama::{OllamaClient, OllamaConfig};
use local_rag::rag::RagSession;

type LocalApp = App<OllamaClient, Store, OllamaClient>;

/// A local question-answering assistant over your own documents
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory receiving copies of uploaded files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding the persisted vector collection
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Number of chunks retrieved per question
    #[arg(long, global = true)]
    top_k: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files (pdf, txt, md, csv, xlsx, xls) and add them to the vector store
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ask a single question
    Ask { question: String },
    /// Interactive question loop
    Chat,
    /// Delete the vector store
    Clear,
    /// Delete the vector store and re-ingest everything in the data directory
    Rebuild,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(store_dir) = args.store_dir {
        config.store_dir = store_dir;
    }
    if let Some(top_k) = args.top_k {
        config.retriever_k = top_k;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        "LLM: {} | Embedding: {} | Endpoint: {}",
        config.llm_model, config.embed_model, config.ollama_base_url
    );

    let ollama = OllamaClient::new(OllamaConfig::from(&config));
    let store = Store::from_config(&config).context("Failed to initialize vector store")?;
    let session = RagSession::new(ollama.clone(), store, ollama, &config);
    let mut app = App::start(session, &config.data_dir).await;

    match args.command {
        Command::Ingest { files } => println!("{}", app.process_files(&files).await),
        Command::Ask { question } => {
            app.chat(&question).await;
            if let Some(reply) = app.history().last_reply() {
                println!("{}", reply);
            }
        }
        Command::Chat => run_chat_loop(&mut app).await.context("Error in chat loop")?,
        Command::Clear => println!("{}", app.clear_all().await),
        Command::Rebuild => println!("{}", app.rebuild().await),
    }

    Ok(())
}

/// Read questions from stdin until `exit` or end of input
async fn run_chat_loop(app: &mut LocalApp) -> Result<()> {
    println!("Ask questions about your documents. Type 'exit' to quit.");
    println!("Commands: /upload <files...>, /clear (chat only), /reset (everything)");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("\nYour question: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let line = buffer.trim();

        if line.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        if let Some(rest) = line.strip_prefix("/upload") {
            let files: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
            println!("{}", app.process_files(&files).await);
            continue;
        }

        match line {
            "" => continue,
            "/clear" => {
                app.clear_chat();
                println!("Chat cleared.");
            }
            "/reset" => println!("{}", app.clear_all().await),
            question => {
                app.chat(question).await;
                if let Some(reply) = app.history().last_reply() {
                    println!("\n{}", reply);
                }
            }
        }
    }

    Ok(())
}
