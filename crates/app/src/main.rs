use std::fmt;
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use services::{AppServices, BookStore, Clock, ServicesConfig, SessionContext, SessionError};
use shelf_core::model::{Book, BookDraft, BookId, BookPatch, Session};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_URL: &str = "sqlite://bookshelf.sqlite3";

#[derive(Debug)]
enum ArgsError {
    InvalidDbUrl { raw: String },
    DemoNotAllowed { command: &'static str },
    EmptyPatch,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::DemoNotAllowed { command } => {
                write!(f, "--demo cannot be combined with `{command}`")
            }
            ArgsError::EmptyPatch => write!(f, "edit needs at least one field to change"),
        }
    }
}

impl std::error::Error for ArgsError {}

/// Personal bookshelf: track what you are reading and how far you got.
#[derive(Parser)]
#[command(name = "bookshelf", version)]
struct Cli {
    /// SQLite database URL or file path.
    #[arg(long, global = true, env = "BOOKSHELF_DB_URL", default_value = DEFAULT_DB_URL)]
    db: String,

    /// Run the command against a fresh demo shelf. Nothing is saved.
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account.
    Register { username: String, password: String },
    /// Log in; the session is remembered for later commands.
    Login { username: String, password: String },
    /// Forget the remembered session.
    Logout,
    /// Show who is logged in.
    Whoami,
    /// List books, split into finished and unfinished shelves.
    List,
    /// List books whose title contains TERM (case-insensitive).
    Search { term: String },
    /// Add a book.
    Add {
        title: String,
        author: String,
        year: i32,
        /// Put the book straight on the finished shelf.
        #[arg(long)]
        complete: bool,
        /// Readable text of the book.
        #[arg(long)]
        content: Option<String>,
    },
    /// Change fields of a book.
    Edit {
        id: BookId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        complete: Option<bool>,
        #[arg(long)]
        read: Option<bool>,
        #[arg(long)]
        content: Option<String>,
    },
    /// Remove a book.
    Remove { id: BookId },
    /// Move a book between the finished and unfinished shelves.
    Toggle { id: BookId },
    /// Mark a book as read, or unread if it already is.
    Read { id: BookId },
    /// Record reading progress in percent (clamped to 0..=100).
    Progress {
        id: BookId,
        #[arg(allow_negative_numbers = true)]
        percent: i64,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Logout => "logout",
            Command::Whoami => "whoami",
            Command::List => "list",
            Command::Search { .. } => "search",
            Command::Add { .. } => "add",
            Command::Edit { .. } => "edit",
            Command::Remove { .. } => "remove",
            Command::Toggle { .. } => "toggle",
            Command::Read { .. } => "read",
            Command::Progress { .. } => "progress",
        }
    }

    fn manages_accounts(&self) -> bool {
        matches!(
            self,
            Command::Register { .. } | Command::Login { .. } | Command::Logout
        )
    }
}

fn load_dotenv() -> Result<(), dotenvy::Error> {
    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    }
    Ok(())
}

/// Our crates at info and sqlx quiet. Event targets default to the module
/// path, whose root is this crate's name.
fn default_log_filter() -> String {
    format!(
        "{}=info,services=info,storage=info,shelf_core=info,sqlx=warn",
        env!("CARGO_CRATE_NAME")
    )
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_filter());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn print_book(book: &Book) {
    let read = if book.is_read() { " [read]" } else { "" };
    let origin = if book.is_custom() { "" } else { " (catalog)" };
    println!(
        "  [{}] {} by {} ({}) {}{}{}",
        book.id(),
        book.title(),
        book.author(),
        book.year(),
        book.progress(),
        read,
        origin
    );
}

async fn print_shelves(store: &BookStore, term: Option<&str>) {
    let shelves = match term {
        Some(term) => store.shelves_matching(term).await,
        None => store.shelves().await,
    };

    println!("Unfinished ({}):", shelves.incomplete.len());
    shelves.incomplete.iter().for_each(print_book);
    println!("Finished ({}):", shelves.complete.len());
    shelves.complete.iter().for_each(print_book);
}

fn report_missing(id: BookId) {
    println!("no book with id {id}");
}

async fn describe_session(sessions: &SessionContext) -> String {
    match sessions.session().await {
        Session::Anonymous => "not logged in".to_string(),
        Session::Demo => "demo session".to_string(),
        Session::Authenticated(id) => match sessions.user().await {
            Some(user) => format!("{} (id {id})", user.username()),
            None => format!("user {id}"),
        },
    }
}

async fn active_store(sessions: &SessionContext) -> Result<Arc<BookStore>, SessionError> {
    sessions.store().await.ok_or(SessionError::NotLoggedIn)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv()?;
    init_tracing();

    let cli = Cli::parse();
    if cli.demo && cli.command.manages_accounts() {
        return Err(ArgsError::DemoNotAllowed {
            command: cli.command.name(),
        }
        .into());
    }

    let config = ServicesConfig::from_env()?;
    if cli.db.trim().is_empty() {
        return Err(ArgsError::InvalidDbUrl { raw: cli.db }.into());
    }
    let db_url = normalize_sqlite_url(cli.db);

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&db_url)?;
    let services = AppServices::new_sqlite(&db_url, Clock::default_clock(), config).await?;
    let sessions = services.sessions();
    tracing::debug!(session = ?services.restored_session(), %db_url, "services ready");

    if cli.demo {
        sessions.visit_demo().await;
    }

    match cli.command {
        Command::Register { username, password } => {
            let user = sessions.register(&username, &password).await?;
            println!("registered {} (id {})", user.username(), user.id());
        }
        Command::Login { username, password } => {
            let store = sessions.login(&username, &password).await?;
            if store.is_ephemeral() {
                println!("demo credentials accepted; demo shelves are not kept between runs, use --demo instead");
            } else {
                println!("logged in as {}", describe_session(&sessions).await);
            }
        }
        Command::Logout => {
            let was = describe_session(&sessions).await;
            sessions.logout().await?;
            println!("logged out ({was})");
        }
        Command::Whoami => println!("{}", describe_session(&sessions).await),
        Command::List => print_shelves(&*active_store(&sessions).await?, None).await,
        Command::Search { term } => {
            print_shelves(&*active_store(&sessions).await?, Some(&term)).await;
        }
        Command::Add {
            title,
            author,
            year,
            complete,
            content,
        } => {
            let store = active_store(&sessions).await?;
            let mut draft = BookDraft::new(title, author, year).complete(complete);
            if let Some(content) = content {
                draft = draft.with_content(content);
            }
            let book = store.add(draft).await?;
            println!("added:");
            print_book(&book);
        }
        Command::Edit {
            id,
            title,
            author,
            year,
            complete,
            read,
            content,
        } => {
            let patch = BookPatch {
                title,
                author,
                year,
                is_complete: complete,
                is_read: read,
                content,
            };
            if patch.is_empty() {
                return Err(ArgsError::EmptyPatch.into());
            }
            let store = active_store(&sessions).await?;
            if store.update(id, patch).await? {
                if let Some(book) = store.get(id).await {
                    println!("updated:");
                    print_book(&book);
                }
            } else {
                report_missing(id);
            }
        }
        Command::Remove { id } => {
            if active_store(&sessions).await?.remove(id).await? {
                println!("removed book {id}");
            } else {
                report_missing(id);
            }
        }
        Command::Toggle { id } => match active_store(&sessions).await?.toggle_complete(id).await? {
            Some(book) => print_book(&book),
            None => report_missing(id),
        },
        Command::Read { id } => match active_store(&sessions).await?.toggle_read(id).await? {
            Some(book) => print_book(&book),
            None => report_missing(id),
        },
        Command::Progress { id, percent } => {
            match active_store(&sessions).await?.set_progress(id, percent).await? {
                Some(book) => print_book(&book),
                None => report_missing(id),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
